//! FF-A version negotiation
//!
//! One synchronous `FFA_VERSION` call. A different major version is fatal;
//! an older minor version means the SPM supports only the legacy subset of
//! the ABIs we advertised.

use sp_api::FfaError;

use super::{FFA_VERSION, FfaArgs, FfaConduit, FfaVersion};

/// Result of a version query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    /// Version reported by the SPM
    pub peer: FfaVersion,
    /// Major versions match
    pub compatible: bool,
    /// The SPM supports every ABI of the advertised version
    pub full_capability_set: bool,
}

impl Negotiation {
    /// Compare the advertised version against the one the SPM reported
    pub fn evaluate(local: FfaVersion, peer: FfaVersion) -> Self {
        let compatible = peer.major == local.major;
        Self {
            peer,
            compatible,
            full_capability_set: compatible && peer.minor >= local.minor,
        }
    }
}

/// Queries the SPM version against the one we advertise
pub struct VersionNegotiator<'a, C: FfaConduit + ?Sized> {
    conduit: &'a C,
    local: FfaVersion,
}

impl<'a, C: FfaConduit + ?Sized> VersionNegotiator<'a, C> {
    /// Create a negotiator advertising `local`
    pub fn new(conduit: &'a C, local: FfaVersion) -> Self {
        Self { conduit, local }
    }

    /// Ask the SPM for its version
    pub fn query(&self) -> Result<FfaVersion, FfaError> {
        let response = self
            .conduit
            .call(FfaArgs::new(FFA_VERSION, &[self.local.encode() as u64]));
        let value = response.x[0] as u32;
        if (value as i32) < 0 {
            return Err(FfaError::from_code(value as i32));
        }
        Ok(FfaVersion::decode(value))
    }

    /// Query and evaluate in one step; query failures propagate
    pub fn negotiate(&self) -> Result<Negotiation, FfaError> {
        let peer = self.query()?;
        let negotiation = Negotiation::evaluate(self.local, peer);
        log::info!(
            "FF-A version: local {}, SPM {} (compatible: {}, full: {})",
            self.local,
            peer,
            negotiation.compatible,
            negotiation.full_capability_set
        );
        Ok(negotiation)
    }
}
