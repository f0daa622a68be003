// src/crypto.rs
use std::num::NonZeroU32;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};

use crate::error::{Error, Result};

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
const HASH_LEN: usize = digest::SHA256_OUTPUT_LEN;
const SALT_LEN: usize = 16;
const DEFAULT_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};
const MISSING_USER_SALT: [u8; SALT_LEN] = [0u8; SALT_LEN];

/// Password hashing and secret generation.
///
/// Hashes are stored as `iterations$base64(salt)$base64(hash)` so the work
/// factor can be raised without invalidating existing accounts.
#[derive(Clone)]
pub struct Crypto {
    rng: SystemRandom,
    iterations: NonZeroU32,
    #[cfg(test)]
    missing_checks: Arc<AtomicUsize>,
}

impl Default for Crypto {
    fn default() -> Self {
        Self::new()
    }
}

impl Crypto {
    pub fn new() -> Self {
        Crypto {
            rng: SystemRandom::new(),
            iterations: DEFAULT_ITERATIONS,
            #[cfg(test)]
            missing_checks: Arc::default(),
        }
    }

    pub fn with_iterations(iterations: NonZeroU32) -> Self {
        Crypto {
            rng: SystemRandom::new(),
            iterations,
            #[cfg(test)]
            missing_checks: Arc::default(),
        }
    }

    pub fn random_secret(&self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        self.rng
            .fill(&mut bytes)
            .map_err(|e| Error::Crypto(format!("Failed to generate random bytes: {}", e)))?;
        Ok(bytes)
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = self.random_secret(SALT_LEN)?;
        let mut hash = [0u8; HASH_LEN];
        pbkdf2::derive(PBKDF2_ALG, self.iterations, &salt, password.as_bytes(), &mut hash);
        Ok(format!(
            "{}${}${}",
            self.iterations,
            STANDARD.encode(&salt),
            STANDARD.encode(hash)
        ))
    }

    /// Returns `false` for a wrong password. A stored hash that cannot be
    /// parsed is an error, not a mismatch.
    pub fn verify_password(&self, password: &str, stored: &str) -> Result<bool> {
        let mut parts = stored.splitn(3, '$');
        let (Some(iterations), Some(salt), Some(hash)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Crypto("Malformed password hash".to_string()));
        };

        let iterations = iterations
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| Error::Crypto("Invalid iteration count in password hash".to_string()))?;
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| Error::Crypto(format!("Invalid salt encoding: {}", e)))?;
        let hash = STANDARD
            .decode(hash)
            .map_err(|e| Error::Crypto(format!("Invalid hash encoding: {}", e)))?;

        Ok(pbkdf2::verify(PBKDF2_ALG, iterations, &salt, password.as_bytes(), &hash).is_ok())
    }

    /// Checks a password for an account that does not exist. Costs one full
    /// derivation at the configured work factor and never matches.
    pub fn verify_missing(&self, password: &str) -> bool {
        #[cfg(test)]
        self.missing_checks.fetch_add(1, Ordering::SeqCst);
        let expected = [0u8; HASH_LEN];
        let _ = pbkdf2::verify(
            PBKDF2_ALG,
            self.iterations,
            &MISSING_USER_SALT,
            password.as_bytes(),
            &expected,
        );
        false
    }

    #[cfg(test)]
    pub(crate) fn missing_checks(&self) -> usize {
        self.missing_checks.load(Ordering::SeqCst)
    }
}
