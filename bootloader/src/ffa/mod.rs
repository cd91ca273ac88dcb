//! FF-A interface
//!
//! The partition talks to the SPM through FF-A function calls carried in
//! registers x0-x7. [`FfaConduit`] is the seam between the ABI encoding in
//! this module and the instruction that traps into the SPM.

pub mod memory_perm;
pub mod version;

use core::fmt;

use sp_api::FfaError;
use static_assertions::assert_eq_size;

pub use memory_perm::{FfaMemoryPermissions, MemPermAttributes, MemoryAttributes};
pub use version::{Negotiation, VersionNegotiator};
#[cfg(test)]
pub use memory_perm::MockMemoryAttributes;

/// `FFA_ERROR`
pub const FFA_ERROR: u64 = 0x8400_0060;
/// `FFA_SUCCESS` (32-bit)
pub const FFA_SUCCESS_32: u64 = 0x8400_0061;
/// `FFA_VERSION`
pub const FFA_VERSION: u64 = 0x8400_0063;
/// `FFA_MEM_PERM_GET`
pub const FFA_MEM_PERM_GET: u64 = 0x8400_0088;
/// `FFA_MEM_PERM_SET`
pub const FFA_MEM_PERM_SET: u64 = 0x8400_0089;

/// Register file of an FF-A call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FfaArgs {
    /// x0 (function id / status) to x7
    pub x: [u64; 8],
}

assert_eq_size!(FfaArgs, [u64; 8]);

impl FfaArgs {
    /// Call `function` with the given leading arguments; the rest are zero
    pub fn new(function: u64, args: &[u64]) -> Self {
        let mut x = [0; 8];
        x[0] = function;
        for (slot, arg) in x[1..].iter_mut().zip(args) {
            *slot = *arg;
        }
        Self { x }
    }

    /// Decode an `FFA_ERROR` response
    pub fn error(&self) -> Option<FfaError> {
        if self.x[0] == FFA_ERROR {
            Some(FfaError::from_code(self.x[2] as u32 as i32))
        } else {
            None
        }
    }

    /// Require an `FFA_SUCCESS` response
    pub fn into_success(self) -> Result<Self, FfaError> {
        match self.error() {
            Some(error) => Err(error),
            None if self.x[0] == FFA_SUCCESS_32 => Ok(self),
            None => Err(FfaError::Unknown(self.x[0] as u32 as i32)),
        }
    }
}

/// Transport into the SPM
#[cfg_attr(test, mockall::automock)]
pub trait FfaConduit {
    /// Issue one FF-A call and return the response registers
    fn call(&self, args: FfaArgs) -> FfaArgs;
}

/// FF-A protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FfaVersion {
    /// Major version, bits [30:16] of the encoding
    pub major: u16,
    /// Minor version, bits [15:0] of the encoding
    pub minor: u16,
}

impl FfaVersion {
    /// FF-A v1.0
    pub const V1_0: Self = Self::new(1, 0);
    /// FF-A v1.1
    pub const V1_1: Self = Self::new(1, 1);

    /// Create a version
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Register encoding
    pub const fn encode(self) -> u32 {
        ((self.major as u32 & 0x7fff) << 16) | self.minor as u32
    }

    /// Decode a register value; bit 31 must be clear
    pub const fn decode(value: u32) -> Self {
        Self {
            major: ((value >> 16) & 0x7fff) as u16,
            minor: (value & 0xffff) as u16,
        }
    }
}

impl fmt::Display for FfaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}
