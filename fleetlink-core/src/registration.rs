//! Registration status and terminal result model.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a registration as reported by the service.
///
/// This is a closed set validated at the parse boundary: an unknown status
/// string fails deserialization and surfaces as a protocol error, never as
/// a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Device is not yet assigned to a hub.
    Unassigned,
    /// Assignment is in progress; poll for the outcome.
    Assigning,
    /// Device has been assigned to a hub.
    Assigned,
    /// Assignment failed.
    Failed,
    /// The enrollment is disabled; the device may not register.
    Disabled,
}

impl RegistrationStatus {
    /// Returns true if no further status transition can occur.
    ///
    /// Transitions are monotonic: `Unassigned`/`Assigning` move to exactly
    /// one of the terminal states and stay there.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Assigned | Self::Failed | Self::Disabled)
    }
}

/// Ordered certificate chain returned after CSR-based issuance.
///
/// Index 0 is the leaf/device certificate, followed by zero or more
/// intermediates, optionally the root. Each element is base64 DER. Order is
/// significant and preserved end-to-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuedCertificateChain(pub Vec<String>);

impl IssuedCertificateChain {
    /// The leaf/device certificate, if the chain is non-empty.
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Terminal outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    /// Registration id the attempt was made for.
    pub registration_id: String,
    /// Hub-assigned device id, when assigned.
    pub device_id: Option<String>,
    /// Hostname of the assigned hub, when assigned.
    pub assigned_hub: Option<String>,
    /// Terminal status reported by the service.
    pub status: RegistrationStatus,
    /// Assignment substatus, e.g. `initialAssignment`. Left as a free
    /// string; the service adds values over time.
    pub substatus: Option<String>,
    /// Issued certificate chain, when issuance was requested and granted.
    pub issued_certificate_chain: Option<IssuedCertificateChain>,
    /// Service error code, populated on failed registrations.
    pub error_code: Option<i64>,
    /// Service error message, populated on failed registrations.
    pub error_message: Option<String>,
}
