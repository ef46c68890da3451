//! Key-pair, CSR and self-signed certificate generation.
//!
//! Uses rcgen for X.509 assembly. ECDSA key pairs are generated by rcgen
//! itself; RSA key pairs are generated with the `rsa` crate and imported as
//! PKCS#8. All outputs are PEM; the raw base64 DER body a wire payload needs
//! is recovered with [`extract_der_base64`].

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use zeroize::Zeroizing;

/// Key-pair algorithm for generated CSRs and certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

/// Signature hash for generated CSRs and certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

/// Errors that can occur during certificate operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CsrError {
    /// The algorithm / key size / hash combination is not supported.
    #[error("unsupported algorithm combination: {algorithm:?}/{key_size}/{hash:?}")]
    UnsupportedAlgorithm {
        algorithm: KeyAlgorithm,
        key_size: u32,
        hash: HashAlgorithm,
    },

    /// Key-pair generation or import failed.
    #[error("failed to create key pair: {0}")]
    KeyPair(String),

    /// Building or signing the request failed.
    #[error("failed to build certificate request: {0}")]
    Request(String),

    /// Certificate generation failed.
    #[error("failed to generate certificate: {0}")]
    Generation(String),

    /// The input is not a PEM document.
    #[error("input is not a PEM document")]
    InvalidPem,
}

/// Material produced for a certificate-signing request.
///
/// `der_base64` is the request body with the PEM envelope stripped, ready
/// for embedding in a wire payload that expects raw base64 DER.
pub struct CsrMaterial {
    /// PEM-encoded certificate-signing request.
    pub csr_pem: String,
    /// PKCS#8 PEM private key, zeroized on drop.
    pub private_key_pem: Zeroizing<String>,
    /// Base64 DER body of the request, no envelope, no newlines.
    pub der_base64: String,
}

impl std::fmt::Debug for CsrMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrMaterial")
            .field("csr_pem_len", &self.csr_pem.len())
            .field("der_base64_len", &self.der_base64.len())
            .finish()
    }
}

/// A self-signed leaf certificate and its private key.
pub struct SelfSignedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PKCS#8 PEM private key, zeroized on drop.
    pub key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for SelfSignedCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfSignedCert")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish()
    }
}

/// Generate a fresh key pair and a certificate-signing request with subject
/// `CN=<common_name>`.
///
/// Supported combinations: ECDSA P-256 with SHA-256, ECDSA P-384 with
/// SHA-384, and RSA 2048/3072/4096 with SHA-256. Anything else is
/// `CsrError::UnsupportedAlgorithm`.
pub fn generate_csr(
    common_name: &str,
    algorithm: KeyAlgorithm,
    key_size: u32,
    hash: HashAlgorithm,
) -> Result<CsrMaterial, CsrError> {
    let key_pair = build_key_pair(algorithm, key_size, hash)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CsrError::Request(e.to_string()))?;
    let csr_pem = csr.pem().map_err(|e| CsrError::Request(e.to_string()))?;
    let der_base64 = extract_der_base64(&csr_pem)?;

    Ok(CsrMaterial {
        csr_pem,
        private_key_pem: Zeroizing::new(key_pair.serialize_pem()),
        der_base64,
    })
}

/// Generate a self-signed leaf certificate for client authentication.
///
/// The certificate carries `basicConstraints=CA:false`,
/// `keyUsage=digitalSignature,keyEncipherment` and
/// `extendedKeyUsage=clientAuth`, valid from now for `validity_days`.
pub fn generate_self_signed(
    common_name: &str,
    validity_days: u32,
    algorithm: KeyAlgorithm,
    key_size: u32,
) -> Result<SelfSignedCert, CsrError> {
    let hash = default_hash(algorithm, key_size);
    let key_pair = build_key_pair(algorithm, key_size, hash)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(i64::from(validity_days));

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CsrError::Generation(e.to_string()))?;

    Ok(SelfSignedCert {
        cert_pem: cert.pem(),
        key_pem: Zeroizing::new(key_pair.serialize_pem()),
    })
}

/// Strip the PEM envelope and return the base64 body with no newlines.
///
/// Exact inverse of standard PEM wrapping: the first `BEGIN`/`END` block of
/// the input is used; header and footer lines are dropped and the body lines
/// concatenated.
///
/// # Errors
///
/// Returns `CsrError::InvalidPem` if the input contains no complete PEM
/// block or the block is empty.
pub fn extract_der_base64(pem: &str) -> Result<String, CsrError> {
    let mut body = String::new();
    let mut in_block = false;

    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN ") {
            in_block = true;
            continue;
        }
        if line.starts_with("-----END ") {
            if !in_block || body.is_empty() {
                return Err(CsrError::InvalidPem);
            }
            return Ok(body);
        }
        if in_block && !line.is_empty() {
            body.push_str(line);
        }
    }

    Err(CsrError::InvalidPem)
}

fn default_hash(algorithm: KeyAlgorithm, key_size: u32) -> HashAlgorithm {
    match (algorithm, key_size) {
        (KeyAlgorithm::Ecdsa, 384) => HashAlgorithm::Sha384,
        _ => HashAlgorithm::Sha256,
    }
}

fn build_key_pair(
    algorithm: KeyAlgorithm,
    key_size: u32,
    hash: HashAlgorithm,
) -> Result<KeyPair, CsrError> {
    match (algorithm, key_size, hash) {
        (KeyAlgorithm::Ecdsa, 256, HashAlgorithm::Sha256) => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                .map_err(|e| CsrError::KeyPair(e.to_string()))
        }
        (KeyAlgorithm::Ecdsa, 384, HashAlgorithm::Sha384) => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
                .map_err(|e| CsrError::KeyPair(e.to_string()))
        }
        (KeyAlgorithm::Rsa, bits @ (2048 | 3072 | 4096), HashAlgorithm::Sha256) => {
            use rsa::pkcs8::EncodePrivateKey;

            let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits as usize)
                .map_err(|e| CsrError::KeyPair(e.to_string()))?;
            let pkcs8 = key
                .to_pkcs8_der()
                .map_err(|e| CsrError::KeyPair(e.to_string()))?;
            KeyPair::try_from(pkcs8.as_bytes()).map_err(|e| CsrError::KeyPair(e.to_string()))
        }
        _ => Err(CsrError::UnsupportedAlgorithm {
            algorithm,
            key_size,
            hash,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn csr_common_name(der_base64: &str) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let der = STANDARD.decode(der_base64).unwrap();
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
        let common_name = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        common_name
    }

    #[test]
    fn rsa_csr_carries_common_name() {
        let material = generate_csr("my-device", KeyAlgorithm::Rsa, 2048, HashAlgorithm::Sha256)
            .unwrap();

        assert!(material.csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(material.csr_pem.contains("END CERTIFICATE REQUEST"));
        assert!(material
            .private_key_pem
            .contains("BEGIN PRIVATE KEY"));
        assert_eq!(csr_common_name(&material.der_base64), "my-device");
    }

    #[test]
    fn ecdsa_csr_carries_common_name() {
        let material = generate_csr("edge-sensor-7", KeyAlgorithm::Ecdsa, 256, HashAlgorithm::Sha256)
            .unwrap();
        assert_eq!(csr_common_name(&material.der_base64), "edge-sensor-7");
    }

    #[test]
    fn unsupported_combination_is_rejected() {
        let err = generate_csr("dev", KeyAlgorithm::Rsa, 1024, HashAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, CsrError::UnsupportedAlgorithm { .. }));

        let err = generate_csr("dev", KeyAlgorithm::Ecdsa, 256, HashAlgorithm::Sha384).unwrap_err();
        assert!(matches!(err, CsrError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn der_base64_is_envelope_free() {
        let material = generate_csr("dev", KeyAlgorithm::Ecdsa, 256, HashAlgorithm::Sha256).unwrap();
        assert!(!material.der_base64.contains('\n'));
        assert!(!material.der_base64.contains("BEGIN"));
    }

    #[test]
    fn extract_der_base64_inverts_pem_wrapping() {
        let original = "TUlJQ1dqQ0NBY09nQXdJQkFnSUJBRE1B";
        // Standard 64-column PEM wrapping
        let pem = format!(
            "-----BEGIN CERTIFICATE REQUEST-----\n{}\n-----END CERTIFICATE REQUEST-----\n",
            original
                .as_bytes()
                .chunks(64)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect::<Vec<_>>()
                .join("\n")
        );

        assert_eq!(extract_der_base64(&pem).unwrap(), original);
    }

    #[test]
    fn extract_der_base64_rejects_non_pem() {
        assert_eq!(extract_der_base64("not a pem"), Err(CsrError::InvalidPem));
        assert_eq!(
            extract_der_base64("-----BEGIN X-----\n-----END X-----\n"),
            Err(CsrError::InvalidPem)
        );
        // Unterminated block
        assert_eq!(
            extract_der_base64("-----BEGIN X-----\nYWJj\n"),
            Err(CsrError::InvalidPem)
        );
    }

    #[test]
    fn self_signed_is_client_leaf_certificate() {
        let generated =
            generate_self_signed("device-01", 90, KeyAlgorithm::Ecdsa, 256).unwrap();

        let body = extract_der_base64(&generated.cert_pem).unwrap();
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let der = STANDARD.decode(body).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap();
        assert_eq!(cn, "device-01");
        assert!(!cert.is_ca());

        let eku = cert.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.client_auth);
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = generate_csr("dev", KeyAlgorithm::Ecdsa, 256, HashAlgorithm::Sha256).unwrap();
        let b = generate_csr("dev", KeyAlgorithm::Ecdsa, 256, HashAlgorithm::Sha256).unwrap();
        assert_ne!(a.der_base64, b.der_base64);
    }
}
