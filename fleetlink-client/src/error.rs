//! Error taxonomy for a registration attempt.

use crate::transport::TransportError;

/// Terminal failure of a registration attempt.
///
/// Every failure mode a caller can observe is a distinct variant so callers
/// pattern-match instead of inspecting strings. Validation failures never
/// touch the network; every other variant aborts the whole attempt, with
/// transport teardown guaranteed on the way out. Authentication and protocol
/// failures are never downgraded to timeouts.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// A credential field was missing or malformed. Raised before any I/O.
    #[error("invalid credential: {0}")]
    Validation(String),

    /// Transport or TLS handshake failure.
    #[error(transparent)]
    Connection(#[from] TransportError),

    /// The service rejected the attempt's authentication (401).
    /// Never retried or polled.
    #[error("authentication rejected by the provisioning service (status {status})")]
    Auth { status: u16 },

    /// The service answered with a non-success status or an
    /// uninterpretable body.
    #[error("provisioning service returned status {status}: {message}")]
    Protocol {
        status: u16,
        message: String,
        error_code: Option<i64>,
        tracking_id: Option<String>,
    },

    /// The overall deadline elapsed, or every poll attempt was exhausted
    /// without a terminal response.
    #[error("registration attempt exceeded its deadline")]
    TimedOut,

    /// The caller canceled the attempt.
    #[error("registration attempt was canceled")]
    Canceled,
}

impl From<fleetlink_auth::CredentialError> for ProvisionError {
    fn from(err: fleetlink_auth::CredentialError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<fleetlink_auth::SasError> for ProvisionError {
    fn from(err: fleetlink_auth::SasError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<fleetlink_auth::CsrError> for ProvisionError {
    fn from(err: fleetlink_auth::CsrError) -> Self {
        Self::Validation(err.to_string())
    }
}
