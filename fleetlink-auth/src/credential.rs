//! Attestation credential abstraction.
//!
//! A [`Credential`] captures both how a device proves its identity to the
//! provisioning service and what it is simultaneously requesting: a new
//! certificate (CSR variants) or nothing. Exactly one variant is active per
//! registration attempt.
//!
//! Validation is pure and runs before any network I/O; a credential with a
//! missing required field never produces wire traffic.

use crate::secret::SecretString;

/// Errors produced by credential validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// The registration id was empty.
    #[error("registration id must not be empty")]
    MissingRegistrationId,

    /// A required field was empty.
    #[error("{0} must not be empty")]
    MissingField(&'static str),
}

/// Symmetric-key attestation for an individual enrollment.
#[derive(Debug, Clone)]
pub struct SymmetricKeyAttestation {
    pub registration_id: String,
    /// Primary device key, base64.
    pub primary_key: SecretString,
    /// Secondary device key, base64. Retained for caller-driven rollover;
    /// the primary key is what a registration attempt uses.
    pub secondary_key: Option<SecretString>,
}

/// Client-certificate attestation.
#[derive(Debug, Clone)]
pub struct CertAttestation {
    pub registration_id: String,
    /// PEM leaf certificate.
    pub cert_pem: String,
    /// PEM intermediates, in order, if any.
    pub chain_pem: Option<String>,
    /// PEM private key for the leaf certificate.
    pub key_pem: SecretString,
}

/// Symmetric-key attestation via an enrollment-group key, requesting
/// issuance of a new certificate from the supplied CSR.
#[derive(Debug, Clone)]
pub struct CsrGroupKeyAttestation {
    pub registration_id: String,
    /// PEM certificate-signing request to submit for issuance.
    pub csr_pem: String,
    /// PEM private key matching the CSR.
    pub key_pem: SecretString,
    /// Enrollment-group master key, base64.
    pub group_key_base64: SecretString,
}

/// Client-certificate attestation, additionally requesting issuance of a
/// new certificate from the supplied CSR.
#[derive(Debug, Clone)]
pub struct CsrCertAttestation {
    pub registration_id: String,
    /// PEM certificate used to authenticate this attempt.
    pub auth_cert_pem: String,
    /// PEM intermediates for the authentication certificate, if any.
    pub auth_chain_pem: Option<String>,
    /// PEM private key for the authentication certificate.
    pub auth_key_pem: SecretString,
    /// PEM certificate-signing request to submit for issuance.
    pub csr_pem: String,
}

/// How the device proves its identity for one registration attempt.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Shared secret for an individual enrollment.
    SymmetricKey(SymmetricKeyAttestation),
    /// Existing client certificate.
    X509Cert(CertAttestation),
    /// Enrollment-group key plus a CSR for new-certificate issuance.
    X509CsrWithGroupKey(CsrGroupKeyAttestation),
    /// Existing client certificate plus a CSR for new-certificate issuance.
    X509CsrWithCert(CsrCertAttestation),
}

impl Credential {
    /// Shorthand for an individual symmetric-key credential.
    pub fn symmetric_key(
        registration_id: impl Into<String>,
        primary_key_base64: impl Into<String>,
    ) -> Self {
        Self::SymmetricKey(SymmetricKeyAttestation {
            registration_id: registration_id.into(),
            primary_key: SecretString::new(primary_key_base64.into()),
            secondary_key: None,
        })
    }

    /// The registration id this credential attests for.
    #[must_use]
    pub fn registration_id(&self) -> &str {
        match self {
            Self::SymmetricKey(c) => &c.registration_id,
            Self::X509Cert(c) => &c.registration_id,
            Self::X509CsrWithGroupKey(c) => &c.registration_id,
            Self::X509CsrWithCert(c) => &c.registration_id,
        }
    }

    /// Returns true if this attempt requests issuance of a new certificate.
    #[must_use]
    pub fn requests_certificate(&self) -> bool {
        self.csr_pem().is_some()
    }

    /// The PEM CSR to submit, when issuance is requested.
    #[must_use]
    pub fn csr_pem(&self) -> Option<&str> {
        match self {
            Self::X509CsrWithGroupKey(c) => Some(&c.csr_pem),
            Self::X509CsrWithCert(c) => Some(&c.csr_pem),
            Self::SymmetricKey(_) | Self::X509Cert(_) => None,
        }
    }

    /// Returns true for the variants that authenticate with a SAS token.
    #[must_use]
    pub fn uses_symmetric_key(&self) -> bool {
        matches!(self, Self::SymmetricKey(_) | Self::X509CsrWithGroupKey(_))
    }

    /// Check that every required field is present.
    ///
    /// Pure; never touches the network. A failure here aborts the attempt
    /// before any connection is opened.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.registration_id().is_empty() {
            return Err(CredentialError::MissingRegistrationId);
        }
        match self {
            Self::SymmetricKey(c) => {
                if c.primary_key.is_empty() {
                    return Err(CredentialError::MissingField("primary key"));
                }
            }
            Self::X509Cert(c) => {
                if c.cert_pem.is_empty() {
                    return Err(CredentialError::MissingField("certificate"));
                }
                if c.key_pem.is_empty() {
                    return Err(CredentialError::MissingField("private key"));
                }
            }
            Self::X509CsrWithGroupKey(c) => {
                if c.csr_pem.is_empty() {
                    return Err(CredentialError::MissingField("csr"));
                }
                if c.key_pem.is_empty() {
                    return Err(CredentialError::MissingField("private key"));
                }
                if c.group_key_base64.is_empty() {
                    return Err(CredentialError::MissingField("group key"));
                }
            }
            Self::X509CsrWithCert(c) => {
                if c.auth_cert_pem.is_empty() {
                    return Err(CredentialError::MissingField("authentication certificate"));
                }
                if c.auth_key_pem.is_empty() {
                    return Err(CredentialError::MissingField("private key"));
                }
                if c.csr_pem.is_empty() {
                    return Err(CredentialError::MissingField("csr"));
                }
            }
        }
        Ok(())
    }
}
