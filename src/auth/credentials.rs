//! Password digests.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};

/// Well-formed Argon2id digest at the default cost that no password matches.
///
/// Login verifies against it when the email is unknown, so that path spends
/// the same hashing work as a wrong password for a real account.
pub const DECOY_DIGEST: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$YoRp+6Sl5Qcv3g5WW6RLTA$t0u6z4gaQkA3A/GLa2yqwc2MVhZrzDXsY2UsZsgFWuU";

/// Hash and verify passwords without naming the primitive.
pub trait CredentialHasher: Send + Sync {
    /// Produce a self-describing digest for `password`.
    ///
    /// # Errors
    /// Returns an error if the primitive fails to hash.
    fn hash(&self, password: &str) -> Result<String>;

    /// `false` for a wrong password and for digests that do not parse.
    fn verify(&self, password: &str, digest: &str) -> bool;
}

/// Argon2id with default parameters, stored as a PHC string.
#[derive(Clone, Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(digest.to_string())
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
