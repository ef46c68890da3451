//! Per-attempt registration identity.

use serde::{Deserialize, Serialize};

use crate::topics;

/// Default provisioning service port (MQTT over TLS).
pub const DEFAULT_PORT: u16 = 8883;

/// Everything that identifies one device against one provisioning endpoint.
///
/// Immutable for the duration of a registration attempt. Produced by an
/// external configuration loader; the protocol engine treats it as
/// already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationIdentity {
    /// Service-assigned scope for the enrollment, e.g. `0ne00AAAA`.
    pub id_scope: String,
    /// Registration id of this device within the scope.
    pub registration_id: String,
    /// Provisioning service hostname.
    pub host: String,
    /// Provisioning service port.
    pub port: u16,
    /// Stable API version used when no certificate issuance is requested.
    /// The engine substitutes the preview version when a CSR is attached.
    pub api_version: String,
}

impl RegistrationIdentity {
    /// Build an identity with the default port and stable API version.
    pub fn new(
        id_scope: impl Into<String>,
        registration_id: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            id_scope: id_scope.into(),
            registration_id: registration_id.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            api_version: topics::STABLE_API_VERSION.to_string(),
        }
    }
}
