//! Tamper-evident hashing for cached payloads.
//!
//! Every payload written to a cache is stored next to an Argon2id hash that
//! binds it to the domain it was fetched from. The hash is keyed with a
//! pepper derived from the application secret, so an attacker with write
//! access to the cache store but not to the secret cannot forge entries, and
//! an entry copied under another domain's key no longer verifies.
//!
//! ### Construction
//! - pepper: PBKDF2-HMAC-SHA256(secret, `robots_cache_integrity`, 1000 rounds, 32 bytes)
//! - salt: first 16 bytes of SHA-256(`robots_cache_<domain>`)
//! - message: `data || 0x00 || domain`
//! - Argon2id v19, m=4096 KiB, t=1, p=1, 32-byte tag, pepper as Argon2 secret

mod key;

pub use key::{DEFAULT_ITERATIONS, KeyDerivation, SecretKeyGenerator};

use argon2::{Algorithm, Argon2, Params, Version};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::{Digest, Sha256};

/// Context label the pepper is derived under.
pub const INTEGRITY_CONTEXT: &str = "robots_cache_integrity";

const PEPPER_LEN: usize = 32;
const SALT_LEN: usize = 16;
const M_COST_KIB: u32 = 4096;
const T_COST: u32 = 1;
const P_COST: u32 = 1;
const OUTPUT_LEN: usize = 32;

/// Errors raised while producing an integrity hash.
///
/// Verification never surfaces these; it answers `false` instead.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("application secret is missing or empty")]
    MissingSecret,

    #[error("invalid argon2 parameters: {0}")]
    Params(String),

    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Produces and verifies domain-bound integrity hashes.
pub struct IntegrityHasher {
    pepper: SecretSlice<u8>,
    params: Params,
}

impl std::fmt::Debug for IntegrityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityHasher")
            .field("pepper", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}

impl IntegrityHasher {
    /// Build a hasher whose pepper comes from the given key derivation service.
    pub fn new(keys: &dyn KeyDerivation) -> Result<Self, IntegrityError> {
        let pepper = keys.derive_key(INTEGRITY_CONTEXT, PEPPER_LEN);
        let params = Params::new(M_COST_KIB, T_COST, P_COST, Some(OUTPUT_LEN))
            .map_err(|e| IntegrityError::Params(e.to_string()))?;
        Ok(Self { pepper, params })
    }

    /// Build a hasher straight from the application secret.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::MissingSecret` if `secret` is empty.
    pub fn from_secret(secret: &str) -> Result<Self, IntegrityError> {
        let keys = SecretKeyGenerator::new(secret);
        if keys.is_empty() {
            return Err(IntegrityError::MissingSecret);
        }
        Self::new(&keys)
    }

    /// Hash `data` as fetched from `domain`.
    ///
    /// The result is a PHC string (`$argon2id$v=19$...`). It is deterministic
    /// for a given secret, domain and payload.
    pub fn generate_hash(&self, data: &[u8], domain: &str) -> Result<String, IntegrityError> {
        let salt = domain_salt(domain)?;
        let message = bind_message(data, domain);
        let hash = self
            .argon2()?
            .hash_password(&message, &salt)
            .map_err(|e| IntegrityError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Check `stored_hash` against `data` and `domain`.
    ///
    /// Fails closed: a malformed hash, a salt that belongs to another domain,
    /// altered data or a different secret all yield `false`. Hashes carrying
    /// any algorithm, version or cost other than this hasher's are rejected
    /// before Argon2 runs.
    pub fn verify(&self, data: &[u8], domain: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        if !self.matches_params(&parsed) {
            return false;
        }
        let Ok(expected_salt) = domain_salt(domain) else {
            return false;
        };
        match parsed.salt {
            Some(salt) if salt.as_str() == expected_salt.as_str() => {}
            _ => return false,
        }
        let Ok(argon2) = self.argon2() else {
            return false;
        };
        argon2.verify_password(&bind_message(data, domain), &parsed).is_ok()
    }

    /// Stored hashes are untrusted; their cost must equal ours.
    fn matches_params(&self, parsed: &PasswordHash<'_>) -> bool {
        if parsed.algorithm != Algorithm::Argon2id.ident() || parsed.version != Some(Version::V0x13 as u32) {
            return false;
        }
        if parsed.hash.as_ref().map(|output| output.len()) != Some(OUTPUT_LEN) {
            return false;
        }
        let Ok(params) = Params::try_from(parsed) else {
            return false;
        };
        params.m_cost() == self.params.m_cost()
            && params.t_cost() == self.params.t_cost()
            && params.p_cost() == self.params.p_cost()
    }

    fn argon2(&self) -> Result<Argon2<'_>, IntegrityError> {
        Argon2::new_with_secret(
            self.pepper.expose_secret(),
            Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|e| IntegrityError::Params(e.to_string()))
    }
}

fn domain_salt(domain: &str) -> Result<SaltString, IntegrityError> {
    let mut hasher = Sha256::new();
    hasher.update(b"robots_cache_");
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();
    SaltString::encode_b64(&digest[..SALT_LEN]).map_err(|e| IntegrityError::Hash(e.to_string()))
}

fn bind_message(data: &[u8], domain: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(data.len() + domain.len() + 1);
    message.extend_from_slice(data);
    message.push(0);
    message.extend_from_slice(domain.as_bytes());
    message
}
