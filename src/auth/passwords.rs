use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::RngCore;

use crate::error::{ImportError, ImportResult};

const SALT_LEN: usize = 16;
const M_COST_KIB: u32 = 19 * 1024;
const T_COST: u32 = 2;
const P_COST: u32 = 1;

/// One-way mapping from an imported plaintext secret to the stored credential.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &str) -> ImportResult<String>;

    /// Whether `secret` still matches the stored credential. A stored value
    /// that needs rehashing reports `false`.
    fn verify(&self, secret: &str, stored: &str) -> ImportResult<bool>;
}

/// Argon2id hasher for imported user passwords.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new() -> ImportResult<Self> {
        let params = Params::new(M_COST_KIB, T_COST, P_COST, None).map_err(ImportError::from)?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Stored hashes from another scheme or weaker parameters get replaced
    /// on the next import of the same password.
    fn is_current(hash: &PasswordHash<'_>) -> bool {
        if hash.algorithm != Algorithm::Argon2id.ident() {
            return false;
        }
        match Params::try_from(hash) {
            Ok(params) => {
                params.m_cost() == M_COST_KIB
                    && params.t_cost() == T_COST
                    && params.p_cost() == P_COST
            }
            Err(_) => false,
        }
    }
}

impl CredentialHasher for PasswordService {
    fn hash(&self, secret: &str) -> ImportResult<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(ImportError::from)?;
        Ok(self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(ImportError::from)?
            .to_string())
    }

    fn verify(&self, secret: &str, stored: &str) -> ImportResult<bool> {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return Ok(false);
        };
        if !Self::is_current(&parsed) {
            log::debug!("stored password hash uses outdated parameters");
            return Ok(false);
        }
        match self.argon2.verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(ImportError::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies_passwords() {
        let service = PasswordService::new().expect("password service");
        let hash = service.hash("super-secret").expect("hash generation");
        assert!(hash.starts_with("$argon2id$"));
        assert!(service.verify("super-secret", &hash).expect("verify runs"));
        assert!(!service.verify("wrong-password", &hash).expect("verify runs"));
    }

    #[test]
    fn foreign_hash_formats_do_not_verify() {
        let service = PasswordService::new().expect("password service");
        let legacy = "AQAAAAEAACcQAAAAEJ3Yb8rL2m6vXq1w==";
        assert!(!service.verify("super-secret", legacy).expect("verify runs"));
    }

    #[test]
    fn weaker_parameters_are_treated_as_stale() {
        let weak = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            Params::new(8 * 1024, 1, 1, None).expect("params"),
        );
        let salt = SaltString::encode_b64(&[7u8; SALT_LEN]).expect("salt");
        let stored = weak
            .hash_password(b"super-secret", &salt)
            .expect("weak hash")
            .to_string();

        let service = PasswordService::new().expect("password service");
        assert!(!service.verify("super-secret", &stored).expect("verify runs"));
    }
}
