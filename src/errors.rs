//! User-visible error conditions.
//!
//! None of these are fatal: each is surfaced as a transient notice and the
//! alert session can always return to Idle and be retried.

use crate::location::LocationError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SafetyError {
    /// A position request failed; the alert proceeds without a fix.
    #[error(transparent)]
    Location(#[from] LocationError),

    /// Dispatch found an empty contact list. The state transition still
    /// happens; this is reported alongside it.
    #[error("no emergency contacts found, add contacts first")]
    NoContactsConfigured,

    /// The external bridge script could not be loaded.
    #[error("bridge resource {source_url} unavailable: {reason}")]
    BridgeResourceUnavailable { source_url: String, reason: String },
}

impl SafetyError {
    /// Stable kind name for logs and notices.
    pub fn kind(&self) -> &'static str {
        match self {
            SafetyError::Location(LocationError::Unsupported { .. }) => "LocationUnsupported",
            SafetyError::Location(LocationError::PermissionDenied { .. }) => {
                "LocationPermissionDenied"
            }
            SafetyError::Location(LocationError::Timeout { .. }) => "LocationTimeout",
            SafetyError::Location(LocationError::PositionUnavailable { .. }) => {
                "LocationUnavailable"
            }
            SafetyError::NoContactsConfigured => "NoContactsConfigured",
            SafetyError::BridgeResourceUnavailable { .. } => "BridgeResourceUnavailable",
        }
    }
}
