//! TLS client identity loading for certificate-based attestation.
//!
//! A [`ClientIdentity`] is the leaf certificate plus private key a device
//! presents during the TLS handshake. Loading re-materializes the key
//! through an export/reimport round trip (PKCS#8 decode, re-encode) so the
//! identity stays usable across repeated handshakes; some TLS stacks reject
//! directly-constructed ephemeral keys for client authentication, so the
//! round trip is mandatory whenever the identity is reused.

use std::io::Cursor;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use zeroize::Zeroizing;

/// Errors from identity loading.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("failed to read identity material: {0}")]
    Io(#[from] std::io::Error),

    /// The chain file contained no certificate.
    #[error("no certificate found in chain")]
    NoCertificate,

    /// The key file contained no private key.
    #[error("no private key found")]
    NoPrivateKey,

    /// The key could not be decoded or re-encoded.
    #[error("invalid private key: {0}")]
    InvalidKey(String),
}

/// Client TLS identity (leaf certificate + private key).
///
/// The private key is zeroized on drop.
#[derive(Clone)]
pub struct ClientIdentity {
    /// DER-encoded leaf certificate.
    pub cert_der: Vec<u8>,
    /// DER-encoded private key (PKCS#8), zeroized on drop.
    key_der: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_der_len", &self.cert_der.len())
            .finish()
    }
}

impl ClientIdentity {
    /// Build an identity from PEM strings.
    ///
    /// Only the first certificate of the chain is used: that is the
    /// leaf/device certificate, and intermediates in the same document are
    /// ignored for identity purposes.
    pub fn from_pem(cert_chain_pem: &str, key_pem: &str) -> Result<Self, IdentityError> {
        let mut chain_reader = Cursor::new(cert_chain_pem.as_bytes());
        let leaf = rustls_pemfile::certs(&mut chain_reader)
            .next()
            .transpose()?
            .ok_or(IdentityError::NoCertificate)?;

        let mut key_reader = Cursor::new(key_pem.as_bytes());
        let key = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or(IdentityError::NoPrivateKey)?;
        let key_der = rematerialize_key(key)?;

        Ok(Self {
            cert_der: leaf.as_ref().to_vec(),
            key_der: Zeroizing::new(key_der),
        })
    }

    /// The certificate in rustls form.
    pub(crate) fn rustls_cert(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.cert_der.clone())
    }

    /// The private key in rustls form.
    pub(crate) fn rustls_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.to_vec()))
    }
}

/// Load a client identity from a PEM chain file and a PEM key file.
pub fn load_client_identity(
    cert_chain_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<ClientIdentity, IdentityError> {
    let chain_pem = std::fs::read_to_string(cert_chain_path)?;
    let key_pem = Zeroizing::new(std::fs::read_to_string(key_path)?);
    ClientIdentity::from_pem(&chain_pem, &key_pem)
}

/// Export/reimport round trip for the private key.
///
/// PKCS#1 RSA keys are rewrapped into PKCS#8 first; the PKCS#8 bytes are
/// then decoded and re-encoded so the key the handshake sees went through a
/// full interchange cycle.
fn rematerialize_key(key: PrivateKeyDer<'_>) -> Result<Vec<u8>, IdentityError> {
    let pkcs8_der: Zeroizing<Vec<u8>> = match key {
        PrivateKeyDer::Pkcs8(der) => Zeroizing::new(der.secret_pkcs8_der().to_vec()),
        PrivateKeyDer::Pkcs1(der) => {
            use rsa::pkcs1::DecodeRsaPrivateKey;
            use rsa::pkcs8::EncodePrivateKey;

            let key = rsa::RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der())
                .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
            let doc = key
                .to_pkcs8_der()
                .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
            Zeroizing::new(doc.as_bytes().to_vec())
        }
        PrivateKeyDer::Sec1(_) => {
            return Err(IdentityError::InvalidKey(
                "SEC1 EC keys are not supported; use PKCS#8".to_string(),
            ));
        }
        _ => {
            return Err(IdentityError::InvalidKey(
                "unsupported key encoding".to_string(),
            ));
        }
    };

    let key_pair = rcgen::KeyPair::try_from(&pkcs8_der[..])
        .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
    Ok(key_pair.serialize_der())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_auth::{generate_self_signed, KeyAlgorithm};
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_identity_from_pem_files() {
        let generated = generate_self_signed("device-01", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let cert_file = write_temp(&generated.cert_pem);
        let key_file = write_temp(&generated.key_pem);

        let identity = load_client_identity(cert_file.path(), key_file.path()).unwrap();
        assert!(!identity.cert_der.is_empty());
        assert!(matches!(identity.rustls_key(), PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn takes_only_the_first_certificate_of_a_chain() {
        let leaf = generate_self_signed("leaf-device", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let other = generate_self_signed("intermediate", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let chain = format!("{}{}", leaf.cert_pem, other.cert_pem);

        let identity = ClientIdentity::from_pem(&chain, &leaf.key_pem).unwrap();

        let mut reader = Cursor::new(leaf.cert_pem.as_bytes());
        let expected = rustls_pemfile::certs(&mut reader)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(identity.cert_der, expected.as_ref());
    }

    #[test]
    fn key_survives_the_reimport_round_trip() {
        let generated = generate_self_signed("device-01", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let identity = ClientIdentity::from_pem(&generated.cert_pem, &generated.key_pem).unwrap();

        // The round-tripped key must still parse as PKCS#8
        let key = identity.rustls_key();
        let PrivateKeyDer::Pkcs8(der) = key else {
            panic!("expected PKCS#8 key");
        };
        assert!(rcgen::KeyPair::try_from(der.secret_pkcs8_der()).is_ok());
    }

    #[test]
    fn missing_certificate_is_an_error() {
        let generated = generate_self_signed("device-01", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let err = ClientIdentity::from_pem("not a pem", &generated.key_pem).unwrap_err();
        assert!(matches!(err, IdentityError::NoCertificate));
    }

    #[test]
    fn missing_key_is_an_error() {
        let generated = generate_self_signed("device-01", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let err = ClientIdentity::from_pem(&generated.cert_pem, "not a pem").unwrap_err();
        assert!(matches!(err, IdentityError::NoPrivateKey));
    }

    #[test]
    fn debug_does_not_expose_key_material() {
        let generated = generate_self_signed("device-01", 30, KeyAlgorithm::Ecdsa, 256).unwrap();
        let identity = ClientIdentity::from_pem(&generated.cert_pem, &generated.key_pem).unwrap();
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("cert_der_len"));
        assert!(!rendered.contains("key_der"));
    }
}
