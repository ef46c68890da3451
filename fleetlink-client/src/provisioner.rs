//! Orchestrator: binds a credential to the protocol engine.
//!
//! Selects the authentication path from the credential variant, assembles
//! the auth material (SAS token or TLS identity, plus the CSR body when
//! issuance is requested) and delegates to the engine. The typed error of
//! any stage is propagated to the caller unchanged.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use fleetlink_auth::{derive_device_key, extract_der_base64, Credential, SasToken};
use fleetlink_core::{RegistrationIdentity, RegistrationResult};

use crate::engine::{ProtocolEngine, RegisterRequest};
use crate::error::ProvisionError;
use crate::tls::ClientIdentity;
use crate::transport::{AuthStrategy, Transport};

/// Lifetime of a generated SAS token. One token serves one connection
/// attempt; an hour leaves room for slow assignment without renewal.
const DEFAULT_SAS_TTL: Duration = Duration::from_secs(3600);

/// A device provisioning client for one endpoint and one credential.
pub struct ProvisioningClient<T: Transport> {
    identity: RegistrationIdentity,
    credential: Credential,
    engine: ProtocolEngine<T>,
    sas_ttl: Duration,
}

impl<T: Transport> ProvisioningClient<T> {
    /// Bind a credential to an engine against the given endpoint and scope.
    ///
    /// The registration id comes from the credential; port and API version
    /// take their defaults and can be adjusted on [`identity_mut`].
    ///
    /// [`identity_mut`]: Self::identity_mut
    pub fn new(
        endpoint: impl Into<String>,
        id_scope: impl Into<String>,
        credential: Credential,
        engine: ProtocolEngine<T>,
    ) -> Self {
        let identity = RegistrationIdentity::new(
            id_scope,
            credential.registration_id().to_string(),
            endpoint,
        );
        Self {
            identity,
            credential,
            engine,
            sas_ttl: DEFAULT_SAS_TTL,
        }
    }

    pub fn identity(&self) -> &RegistrationIdentity {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut RegistrationIdentity {
        &mut self.identity
    }

    pub fn set_sas_ttl(&mut self, ttl: Duration) {
        self.sas_ttl = ttl;
    }

    /// Run one registration attempt.
    ///
    /// Fails fast with [`ProvisionError::Validation`] before any network
    /// I/O when the credential is incomplete. Repetition after a failure is
    /// the caller's decision.
    pub async fn register(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RegistrationResult, ProvisionError> {
        self.credential.validate()?;
        let (auth, csr_der_base64) = self.build_auth()?;

        let request = RegisterRequest {
            identity: &self.identity,
            auth,
            csr_der_base64,
        };
        self.engine.register(request, cancel).await
    }

    /// Assemble the auth material for the active credential variant.
    fn build_auth(&self) -> Result<(AuthStrategy, Option<String>), ProvisionError> {
        let registration_id = self.identity.registration_id.as_str();
        let id_scope = self.identity.id_scope.as_str();

        match &self.credential {
            Credential::SymmetricKey(attestation) => {
                let token = SasToken::generate(
                    id_scope,
                    registration_id,
                    attestation.primary_key.as_str(),
                    self.sas_ttl,
                )?;
                Ok((AuthStrategy::SasToken(token), None))
            }
            Credential::X509CsrWithGroupKey(attestation) => {
                let device_key: Zeroizing<String> =
                    derive_device_key(registration_id, attestation.group_key_base64.as_str())?;
                let token =
                    SasToken::generate(id_scope, registration_id, &device_key, self.sas_ttl)?;
                let csr = extract_der_base64(&attestation.csr_pem)?;
                Ok((AuthStrategy::SasToken(token), Some(csr)))
            }
            Credential::X509Cert(attestation) => {
                let chain = concat_chain(&attestation.cert_pem, attestation.chain_pem.as_deref());
                let identity = ClientIdentity::from_pem(&chain, attestation.key_pem.as_str())
                    .map_err(|e| ProvisionError::Validation(e.to_string()))?;
                Ok((AuthStrategy::ClientCertificate(Arc::new(identity)), None))
            }
            Credential::X509CsrWithCert(attestation) => {
                let chain = concat_chain(
                    &attestation.auth_cert_pem,
                    attestation.auth_chain_pem.as_deref(),
                );
                let identity = ClientIdentity::from_pem(&chain, attestation.auth_key_pem.as_str())
                    .map_err(|e| ProvisionError::Validation(e.to_string()))?;
                let csr = extract_der_base64(&attestation.csr_pem)?;
                Ok((
                    AuthStrategy::ClientCertificate(Arc::new(identity)),
                    Some(csr),
                ))
            }
        }
    }
}

fn concat_chain(cert_pem: &str, chain_pem: Option<&str>) -> String {
    match chain_pem {
        Some(chain) => format!("{cert_pem}\n{chain}"),
        None => cert_pem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::topics;

    #[test]
    fn identity_is_built_from_credential_and_endpoint() {
        let credential = Credential::symmetric_key("device-01", "a2V5");
        let client = ProvisioningClient::new(
            "prov.example.net",
            "0ne00AAAA",
            credential,
            ProtocolEngine::new(crate::transport::MqttTransport::new()),
        );

        let identity = client.identity();
        assert_eq!(identity.registration_id, "device-01");
        assert_eq!(identity.id_scope, "0ne00AAAA");
        assert_eq!(identity.host, "prov.example.net");
        assert_eq!(identity.api_version, topics::STABLE_API_VERSION);
    }

    #[test]
    fn symmetric_key_yields_sas_auth_without_csr() {
        let credential = Credential::symmetric_key("device-01", "a2V5");
        let client = ProvisioningClient::new(
            "prov.example.net",
            "0ne00AAAA",
            credential,
            ProtocolEngine::new(crate::transport::MqttTransport::new()),
        );

        let (auth, csr) = client.build_auth().unwrap();
        assert!(matches!(auth, AuthStrategy::SasToken(_)));
        assert!(csr.is_none());
    }

    #[test]
    fn group_key_variant_attaches_der_csr() {
        use fleetlink_auth::credential::CsrGroupKeyAttestation;
        use fleetlink_auth::SecretString;

        let material = fleetlink_auth::generate_csr(
            "device-01",
            fleetlink_auth::KeyAlgorithm::Ecdsa,
            256,
            fleetlink_auth::HashAlgorithm::Sha256,
        )
        .unwrap();
        let credential = Credential::X509CsrWithGroupKey(CsrGroupKeyAttestation {
            registration_id: "device-01".to_string(),
            csr_pem: material.csr_pem.clone(),
            key_pem: SecretString::new(material.private_key_pem.as_str()),
            group_key_base64: SecretString::new("Z3JvdXAtbWFzdGVyLWtleQ=="),
        });
        let client = ProvisioningClient::new(
            "prov.example.net",
            "0ne00AAAA",
            credential,
            ProtocolEngine::new(crate::transport::MqttTransport::new()),
        );

        let (auth, csr) = client.build_auth().unwrap();
        assert!(matches!(auth, AuthStrategy::SasToken(_)));
        assert_eq!(csr.as_deref(), Some(material.der_base64.as_str()));
    }

    #[test]
    fn cert_variant_yields_client_certificate_auth() {
        use fleetlink_auth::credential::CertAttestation;
        use fleetlink_auth::SecretString;

        let generated = fleetlink_auth::generate_self_signed(
            "device-01",
            30,
            fleetlink_auth::KeyAlgorithm::Ecdsa,
            256,
        )
        .unwrap();
        let credential = Credential::X509Cert(CertAttestation {
            registration_id: "device-01".to_string(),
            cert_pem: generated.cert_pem.clone(),
            chain_pem: None,
            key_pem: SecretString::new(generated.key_pem.as_str()),
        });
        let client = ProvisioningClient::new(
            "prov.example.net",
            "0ne00AAAA",
            credential,
            ProtocolEngine::new(crate::transport::MqttTransport::new()),
        );

        let (auth, csr) = client.build_auth().unwrap();
        assert!(matches!(auth, AuthStrategy::ClientCertificate(_)));
        assert!(csr.is_none());
    }
}
