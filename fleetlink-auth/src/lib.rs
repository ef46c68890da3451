//! Pure attestation library for Fleetlink device provisioning.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! It provides the material a provisioning attempt needs before any byte
//! goes on the wire:
//! - [`credential::Credential`] - How the device proves its identity, and
//!   what it is simultaneously requesting (a new certificate, or nothing)
//! - [`sas`] - Enrollment-group device-key derivation and time-bound
//!   shared-access-signature tokens
//! - [`csr`] - Key-pair, certificate-signing-request and self-signed
//!   certificate generation, plus PEM/DER handling
//! - [`secret::SecretString`] - Zeroize-on-drop container for key material
//!
//! # Example
//!
//! ```ignore
//! use fleetlink_auth::{Credential, SasToken};
//! use std::time::Duration;
//!
//! let credential = Credential::symmetric_key("device-01", "cHJpbWFyeQ==");
//! credential.validate()?;
//!
//! let token = SasToken::generate(
//!     "0ne00AAAA",
//!     credential.registration_id(),
//!     "cHJpbWFyeQ==",
//!     Duration::from_secs(3600),
//! )?;
//! ```

pub mod credential;
pub mod csr;
pub mod sas;
pub mod secret;

pub use credential::{Credential, CredentialError};
pub use csr::{
    CsrError, CsrMaterial, HashAlgorithm, KeyAlgorithm, SelfSignedCert, extract_der_base64,
    generate_csr, generate_self_signed,
};
pub use sas::{SasError, SasToken, derive_device_key};
pub use secret::SecretString;
