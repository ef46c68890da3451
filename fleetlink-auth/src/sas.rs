//! Shared-access-signature (SAS) token generation.
//!
//! Symmetric-key attestation authenticates a device with a time-bound token
//! derived from a per-device key. For enrollment groups the per-device key
//! is itself derived from the group key by keyed hashing.
//!
//! Token layout:
//! `SharedAccessSignature sr=<enc-uri>&sig=<enc-sig>&se=<expiry>&skn=registration`
//! - `sr`: percent-encoded resource URI `{idScope}/registrations/{registrationId}`
//! - `sig`: percent-encoded base64 HMAC-SHA256 over `"{enc-uri}\n{expiry}"`
//! - `se`: expiry as Unix seconds
//! - `skn`: always the `registration` policy name
//!
//! The resource URI is percent-encoded exactly once and that encoded form is
//! both the signing input and the `sr=` output. The URI is never lowercased;
//! only the registration id is lowercased, and only for device-key
//! derivation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Key name carried by every registration token.
const POLICY_NAME: &str = "registration";

/// Errors that can occur during signature generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SasError {
    /// A key that should be base64 was not decodable.
    #[error("key is not valid base64")]
    InvalidKey,

    /// The registration id was empty.
    #[error("registration id must not be empty")]
    EmptyRegistrationId,
}

/// Derive the per-device key for an enrollment-group member.
///
/// The registration id is normalized to lowercase, the group key is
/// base64-decoded, and the device key is the base64-encoded HMAC-SHA256 of
/// the normalized id keyed by the decoded group key. Pure and deterministic:
/// the same inputs always yield the same key.
///
/// # Errors
///
/// Returns `SasError::InvalidKey` if the group key is not valid base64, and
/// `SasError::EmptyRegistrationId` for an empty id.
pub fn derive_device_key(
    registration_id: &str,
    group_key_base64: &str,
) -> Result<Zeroizing<String>, SasError> {
    if registration_id.is_empty() {
        return Err(SasError::EmptyRegistrationId);
    }
    let group_key = Zeroizing::new(
        STANDARD
            .decode(group_key_base64.trim())
            .map_err(|_| SasError::InvalidKey)?,
    );

    let normalized = registration_id.to_lowercase();
    let mut mac = HmacSha256::new_from_slice(&group_key).map_err(|_| SasError::InvalidKey)?;
    mac.update(normalized.as_bytes());

    Ok(Zeroizing::new(STANDARD.encode(mac.finalize().into_bytes())))
}

/// A time-bound shared-access-signature token.
///
/// Ephemeral: a token is generated for a single connection attempt and
/// discarded with it. `Debug` redacts the signature so the token is never
/// logged in full.
#[derive(Clone)]
pub struct SasToken {
    token: String,
    resource_uri: String,
    expires_at: u64,
}

impl SasToken {
    /// Generate a token expiring `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `SasError::InvalidKey` if the device key is not valid base64.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set to before the Unix epoch. This
    /// indicates a severely misconfigured system and is not recoverable.
    pub fn generate(
        id_scope: &str,
        registration_id: &str,
        device_key_base64: &str,
        ttl: Duration,
    ) -> Result<Self, SasError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_secs();
        Self::generate_at(id_scope, registration_id, device_key_base64, ttl, now)
    }

    /// Generate a token against a fixed clock.
    ///
    /// `now_unix` is the current time as Unix seconds; the token expires at
    /// `now_unix + ttl`.
    pub fn generate_at(
        id_scope: &str,
        registration_id: &str,
        device_key_base64: &str,
        ttl: Duration,
        now_unix: u64,
    ) -> Result<Self, SasError> {
        if registration_id.is_empty() {
            return Err(SasError::EmptyRegistrationId);
        }
        let key = Zeroizing::new(
            STANDARD
                .decode(device_key_base64.trim())
                .map_err(|_| SasError::InvalidKey)?,
        );

        let resource_uri = format!("{id_scope}/registrations/{registration_id}");
        let expires_at = now_unix + ttl.as_secs();

        let encoded_uri = urlencoding::encode(&resource_uri);
        let string_to_sign = format!("{encoded_uri}\n{expires_at}");

        let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SasError::InvalidKey)?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let token = format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            urlencoding::encode(&signature),
            expires_at,
            POLICY_NAME,
        );

        Ok(Self {
            token,
            resource_uri,
            expires_at,
        })
    }

    /// The full token string, used as the connection password.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// The unencoded resource URI the token was signed for.
    #[must_use]
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Expiry as Unix seconds.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

impl std::fmt::Debug for SasToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasToken")
            .field("resource_uri", &self.resource_uri)
            .field("expires_at", &self.expires_at)
            .field("sig", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_KEY: &str = "Z3JvdXAtbWFzdGVyLWtleQ=="; // "group-master-key"
    const DEVICE_KEY: &str = "ZGV2aWNlLWtleQ=="; // "device-key"

    #[test]
    fn derive_device_key_is_deterministic() {
        let a = derive_device_key("device-01", GROUP_KEY).unwrap();
        let b = derive_device_key("device-01", GROUP_KEY).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn derive_device_key_is_case_insensitive_on_id() {
        let lower = derive_device_key("device-01", GROUP_KEY).unwrap();
        let mixed = derive_device_key("DeViCe-01", GROUP_KEY).unwrap();
        let upper = derive_device_key("DEVICE-01", GROUP_KEY).unwrap();
        assert_eq!(*lower, *mixed);
        assert_eq!(*lower, *upper);
    }

    #[test]
    fn derive_device_key_distinct_per_device() {
        let a = derive_device_key("device-01", GROUP_KEY).unwrap();
        let b = derive_device_key("device-02", GROUP_KEY).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn derive_device_key_rejects_malformed_base64() {
        assert_eq!(
            derive_device_key("device-01", "!!not-base64!!"),
            Err(SasError::InvalidKey)
        );
    }

    #[test]
    fn derive_device_key_rejects_empty_id() {
        assert_eq!(
            derive_device_key("", GROUP_KEY),
            Err(SasError::EmptyRegistrationId)
        );
    }

    /// Token for `device-01` in scope `0ne00AAAA` against a fixed clock.
    fn fixed_clock_token(ttl_secs: u64) -> SasToken {
        SasToken::generate_at(
            "0ne00AAAA",
            "device-01",
            DEVICE_KEY,
            Duration::from_secs(ttl_secs),
            1_700_000_000,
        )
        .unwrap()
    }

    #[test]
    fn token_has_expected_structure() {
        let token = fixed_clock_token(3600);
        let s = token.as_str();

        assert!(s.starts_with("SharedAccessSignature sr="));
        assert_eq!(s.matches("sr=").count(), 1);
        assert_eq!(s.matches("sig=").count(), 1);
        assert_eq!(s.matches("se=").count(), 1);
        assert_eq!(s.matches("skn=registration").count(), 1);
    }

    #[test]
    fn token_expiry_is_now_plus_ttl() {
        let token = fixed_clock_token(900);
        assert_eq!(token.expires_at(), 1_700_000_900);
        assert!(token.as_str().contains("&se=1700000900&"));
    }

    #[test]
    fn resource_uri_is_encoded_in_token_but_kept_raw_on_type() {
        let token = fixed_clock_token(60);
        assert_eq!(token.resource_uri(), "0ne00AAAA/registrations/device-01");
        // Slashes are percent-encoded in the sr= field
        assert!(token
            .as_str()
            .contains("sr=0ne00AAAA%2Fregistrations%2Fdevice-01&"));
    }

    #[test]
    fn token_is_deterministic_for_fixed_clock() {
        let a = fixed_clock_token(60);
        let b = fixed_clock_token(60);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn token_rejects_malformed_device_key() {
        assert!(matches!(
            SasToken::generate_at("0ne00AAAA", "device-01", "%%%", Duration::from_secs(60), 0),
            Err(SasError::InvalidKey)
        ));
    }

    #[test]
    fn debug_redacts_signature() {
        let token = fixed_clock_token(60);
        let rendered = format!("{token:?}");
        assert!(rendered.contains("<redacted>"));
        // The signature itself must not appear
        let sig_part = token
            .as_str()
            .split("sig=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap();
        assert!(!rendered.contains(sig_part));
    }
}
