//! Key derivation from the application's long-term secret.

use secrecy::{ExposeSecret, SecretSlice, SecretString};
use sha2::Sha256;

/// Iteration count used when stretching the application secret.
pub const DEFAULT_ITERATIONS: u32 = 1000;

/// Derives purpose-bound keys from a long-term secret.
///
/// Implementations must be deterministic: the same `context` and `len` always
/// yield the same key for a given secret.
pub trait KeyDerivation: Send + Sync {
    fn derive_key(&self, context: &str, len: usize) -> SecretSlice<u8>;
}

/// PBKDF2-HMAC-SHA256 key generator seeded with the application secret.
///
/// The context label is used as the PBKDF2 salt, so keys derived for
/// different purposes are independent.
pub struct SecretKeyGenerator {
    secret: SecretString,
    iterations: u32,
}

impl SecretKeyGenerator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: SecretString::from(secret.into()), iterations: DEFAULT_ITERATIONS }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// True when no secret material was supplied.
    pub fn is_empty(&self) -> bool {
        self.secret.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for SecretKeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyGenerator")
            .field("secret", &"[REDACTED]")
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl KeyDerivation for SecretKeyGenerator {
    fn derive_key(&self, context: &str, len: usize) -> SecretSlice<u8> {
        let mut key = vec![0u8; len];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.secret.expose_secret().as_bytes(),
            context.as_bytes(),
            self.iterations,
            &mut key,
        );
        SecretSlice::from(key)
    }
}
