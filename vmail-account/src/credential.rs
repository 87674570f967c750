use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::AccountError;

pub type ArcHasher = Arc<dyn CredentialHasher + Send + Sync>;

/// One-way transformation of a plaintext credential into a string the mail
/// services can verify on their own.
pub trait CredentialHasher {
    fn hash(&self, plaintext: &str) -> Result<String, AccountError>;
    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, AccountError>;
}

/// Argon2id, PHC string output (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
/// Dovecot reads it as-is with `scheme=ARGON2ID`.
#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    min_length: usize,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self { min_length: 1 }
    }
}

impl Argon2Hasher {
    pub fn with_min_length(min_length: usize) -> Self {
        Self {
            min_length: min_length.max(1),
        }
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, AccountError> {
        if plaintext.chars().count() < self.min_length {
            tracing::debug!(min_length = self.min_length, "credential rejected, too short");
            return Err(AccountError::WeakOrEmptyCredential {
                min_length: self.min_length,
            });
        }

        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        Ok(argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!(err = %e, "argon2 hashing failed");
                AccountError::Hashing(e.to_string())
            })?
            .to_string())
    }

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, AccountError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::debug!(err = %e, "stored hash is not a PHC string");
            AccountError::MalformedHash
        })?;
        Ok(Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
