//! Error handling for the secure partition bootstrap
//!
//! Every failure of the one-shot bootstrap is a [`BootError`]. The boot halts
//! with the small negative exit code of the error's [`Status`]; the mapping
//! to exit codes happens in one place, [`Status::exit_code`].

use core::fmt;

/// Firmware status a boot step completes with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Step completed
    Success,
    /// Operation or version not supported
    Unsupported,
    /// Input rejected (bad magic, missing property, bad encoding)
    InvalidParameter,
    /// Searched item absent
    NotFound,
    /// Peer ran out of resources
    OutOfResources,
    /// Peer refused the request
    AccessDenied,
    /// Any other failure reported by the peer
    DeviceError,
}

impl Status {
    /// Exit code reported by the entry point
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Unsupported => -1,
            Status::InvalidParameter => -2,
            Status::NotFound => -7,
            _ => 0,
        }
    }

    /// Human-readable name
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::Unsupported => "Unsupported",
            Status::InvalidParameter => "Invalid Parameter",
            Status::NotFound => "Not Found",
            Status::OutOfResources => "Out of Resources",
            Status::AccessDenied => "Access Denied",
            Status::DeviceError => "Device Error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes returned by the SPM in `FFA_ERROR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfaError {
    /// -1
    NotSupported,
    /// -2
    InvalidParameters,
    /// -3
    NoMemory,
    /// -4
    Busy,
    /// -5
    Interrupted,
    /// -6
    Denied,
    /// -7
    Retry,
    /// -8
    Aborted,
    /// -9
    NoData,
    /// Code outside the FF-A v1.1 table
    Unknown(i32),
}

impl FfaError {
    /// Decode an FF-A error code
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => FfaError::NotSupported,
            -2 => FfaError::InvalidParameters,
            -3 => FfaError::NoMemory,
            -4 => FfaError::Busy,
            -5 => FfaError::Interrupted,
            -6 => FfaError::Denied,
            -7 => FfaError::Retry,
            -8 => FfaError::Aborted,
            -9 => FfaError::NoData,
            other => FfaError::Unknown(other),
        }
    }

    /// Raw FF-A error code
    pub fn code(self) -> i32 {
        match self {
            FfaError::NotSupported => -1,
            FfaError::InvalidParameters => -2,
            FfaError::NoMemory => -3,
            FfaError::Busy => -4,
            FfaError::Interrupted => -5,
            FfaError::Denied => -6,
            FfaError::Retry => -7,
            FfaError::Aborted => -8,
            FfaError::NoData => -9,
            FfaError::Unknown(code) => code,
        }
    }

    /// Firmware status for this error
    pub fn status(self) -> Status {
        match self {
            FfaError::NotSupported => Status::Unsupported,
            FfaError::InvalidParameters => Status::InvalidParameter,
            FfaError::NoMemory => Status::OutOfResources,
            FfaError::Denied => Status::AccessDenied,
            FfaError::NoData => Status::NotFound,
            _ => Status::DeviceError,
        }
    }
}

/// Why the manifest (or the blob pointing at it) could not be found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMissingKind {
    /// Boot information address was null
    NullBootInfo,
    /// Boot information magic mismatch
    BadBootInfoMagic(u32),
    /// No descriptor of type {standard, device tree}
    NoManifestDescriptor,
    /// Manifest blob does not start with the device tree magic
    BadManifestMagic(u32),
    /// Manifest header or structure block could not be walked
    Unreadable(ManifestFault),
    /// No node is compatible with the manifest identifier
    NoManifestNode,
    /// Required property absent
    MissingProperty(&'static str),
    /// No memory-regions node
    NoMemoryRegions,
}

impl ManifestMissingKind {
    fn status(self) -> Status {
        match self {
            ManifestMissingKind::NoManifestDescriptor
            | ManifestMissingKind::BadManifestMagic(_)
            | ManifestMissingKind::Unreadable(_)
            | ManifestMissingKind::NoManifestNode => Status::NotFound,
            _ => Status::InvalidParameter,
        }
    }
}

/// Manifest content that is present but cannot be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFault {
    /// `xlat-granule` outside {0, 1, 2}
    UnknownGranule(u32),
    /// Property length differs from the width it is read at
    PropertyWidth {
        /// Property name
        name: &'static str,
        /// Expected width in bytes
        expected: usize,
        /// Length found in the blob
        actual: usize,
    },
    /// An offset or length points outside the blob
    OutOfBounds,
    /// Unexpected token in the structure block
    BadStructure,
}

/// Image headers that cannot be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFault {
    /// Firmware volume header invalid
    BadVolume,
    /// Neither a TE nor a PE32+ signature
    BadSignature,
    /// Header or section table outside the image data
    Truncated,
}

/// Memory permission update that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOp {
    /// Clearing instruction access
    SetNoExec,
    /// Removing write access
    SetReadOnly,
    /// Granting write access
    ClearReadOnly,
}

/// Bootstrap error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// `FFA_VERSION` failed
    VersionQueryFailed(FfaError),
    /// Peer major version differs from ours
    VersionIncompatible {
        /// Major version we advertised
        local_major: u16,
        /// Major version the SPM reported
        peer_major: u16,
    },
    /// Boot information or manifest content absent
    ManifestMissing(ManifestMissingKind),
    /// Manifest content malformed
    ManifestMalformed(ManifestFault),
    /// Manifest carries no usable heap region
    HeapRegionMissing,
    /// MM core image absent from the firmware volume
    ImageNotFound,
    /// MM core image headers malformed
    ImageMalformed(ImageFault),
    /// The SPM rejected a permission change
    PermissionUpdateFailure {
        /// Operation attempted
        op: PermissionOp,
        /// Base address of the region
        base: u64,
        /// Error returned by the SPM
        error: FfaError,
    },
}

impl BootError {
    /// Firmware status the boot halts with
    pub fn status(&self) -> Status {
        match self {
            BootError::VersionQueryFailed(err) => err.status(),
            BootError::VersionIncompatible { .. } => Status::Unsupported,
            BootError::ManifestMissing(kind) => kind.status(),
            BootError::ManifestMalformed(_) => Status::InvalidParameter,
            BootError::HeapRegionMissing => Status::Unsupported,
            BootError::ImageNotFound => Status::NotFound,
            BootError::ImageMalformed(_) => Status::Unsupported,
            BootError::PermissionUpdateFailure { error, .. } => error.status(),
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            BootError::VersionQueryFailed(_) => "FF-A version query failed",
            BootError::VersionIncompatible { .. } => "FF-A major version mismatch",
            BootError::ManifestMissing(kind) => match kind {
                ManifestMissingKind::NullBootInfo => "FF-A boot information is NULL",
                ManifestMissingKind::BadBootInfoMagic(_) => "Invalid boot information magic",
                ManifestMissingKind::NoManifestDescriptor => "SP manifest descriptor not found",
                ManifestMissingKind::BadManifestMagic(_) => "Invalid manifest magic",
                ManifestMissingKind::Unreadable(_) => "Manifest is not a readable device tree",
                ManifestMissingKind::NoManifestNode => "Missing FF-A boot information in manifest",
                ManifestMissingKind::MissingProperty(_) => "Property missing in manifest",
                ManifestMissingKind::NoMemoryRegions => "memory-regions missing in manifest",
            },
            BootError::ManifestMalformed(fault) => match fault {
                ManifestFault::UnknownGranule(_) => "Invalid page type",
                ManifestFault::PropertyWidth { .. } => "Property has unexpected width",
                ManifestFault::OutOfBounds => "Manifest offset out of bounds",
                ManifestFault::BadStructure => "Malformed manifest structure",
            },
            BootError::HeapRegionMissing => "Failed to read heap region",
            BootError::ImageNotFound => "MM core image not found",
            BootError::ImageMalformed(fault) => match fault {
                ImageFault::BadVolume => "Invalid firmware volume",
                ImageFault::BadSignature => "Unknown image signature",
                ImageFault::Truncated => "Image headers truncated",
            },
            BootError::PermissionUpdateFailure { .. } => "Memory permission update failed",
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BootError: {} ({})", self.description(), self.status())?;
        match self {
            BootError::VersionQueryFailed(err) => write!(f, ": ffa error {}", err.code()),
            BootError::VersionIncompatible {
                local_major,
                peer_major,
            } => write!(f, ": local v{}, peer v{}", local_major, peer_major),
            BootError::ManifestMissing(ManifestMissingKind::BadBootInfoMagic(magic))
            | BootError::ManifestMissing(ManifestMissingKind::BadManifestMagic(magic)) => {
                write!(f, ": {:#x}", magic)
            }
            BootError::ManifestMissing(ManifestMissingKind::MissingProperty(name)) => {
                write!(f, ": {}", name)
            }
            BootError::ManifestMissing(ManifestMissingKind::Unreadable(fault)) => {
                write!(f, ": {:?}", fault)
            }
            BootError::ManifestMalformed(ManifestFault::UnknownGranule(value)) => {
                write!(f, ": {}", value)
            }
            BootError::ManifestMalformed(ManifestFault::PropertyWidth {
                name,
                expected,
                actual,
            }) => write!(f, ": {} is {} bytes, expected {}", name, actual, expected),
            BootError::PermissionUpdateFailure { op, base, error } => {
                write!(f, ": {:?} at {:#x}, ffa error {}", op, base, error.code())
            }
            _ => Ok(()),
        }
    }
}

/// Result type used throughout the bootstrap
pub type Result<T = ()> = core::result::Result<T, BootError>;
