//! Password hashing and verification.
//!
//! Uses Argon2id with configurable work factors. Stored hashes are PHC
//! strings; anything that is not an Argon2id PHC string never verifies.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
    },
};

use crate::config::PasswordHashConfig;

#[derive(Clone, Debug)]
pub struct PasswordService {
    params: Params,
}

impl PasswordService {
    pub fn new(config: &PasswordHashConfig) -> Result<Self, argon2::Error> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password, returning the PHC string for storage.
    pub fn hash(&self, password: &str) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self.argon2().hash_password(password.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    /// Verify `password` against a stored hash. Malformed or foreign hashes
    /// return false.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        if !looks_like_supported_hash(hash) {
            return false;
        }
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        // Verification uses the parameters embedded in the hash, so hashes
        // made with older work factors keep verifying.
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// [`PasswordService::hash`] on the blocking pool.
    pub async fn hash_blocking(&self, password: String) -> Result<String, String> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.hash(&password))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
    }

    /// [`PasswordService::verify`] on the blocking pool.
    pub async fn verify_blocking(&self, password: String, hash: String) -> bool {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.verify(&password, &hash))
            .await
            .unwrap_or(false)
    }
}

/// True for parseable PHC strings produced by Argon2id.
pub fn looks_like_supported_hash(hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => parsed.algorithm == Algorithm::Argon2id.ident(),
        Err(_) => false,
    }
}
