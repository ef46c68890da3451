//! Zeroize-on-drop container for textual key material.
//!
//! Group keys, device keys and private-key PEM bodies move through the
//! credential layer as strings. [`SecretString`] keeps them out of logs and
//! clears them from memory when released:
//! - Zeroized on drop, on every exit path including error and cancellation
//! - `Debug` never prints the contents
//! - Equality uses constant-time comparison

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A zeroize-on-drop wrapper for secret strings.
///
/// Cloning copies the secret; each copy is independently zeroized when it
/// goes out of scope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret string.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Get a reference to the secret.
    ///
    /// # Security
    ///
    /// The returned reference should not be stored. Copying the contents
    /// into an unmanaged `String` defeats the purpose of automatic
    /// zeroization.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

impl From<&str> for SecretString {
    fn from(secret: &str) -> Self {
        Self(secret.to_string())
    }
}

impl std::ops::Deref for SecretString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison to prevent timing attacks
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecretString {}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString(<{} bytes>)", self.0.len())
    }
}
