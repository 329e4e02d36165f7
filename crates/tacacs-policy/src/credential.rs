// SPDX-License-Identifier: AGPL-3.0-only
//! Stored credentials and the verifiers that check presented secrets against them.

use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use openssl::hash::{MessageDigest, hash};
use openssl::memcmp;
use openssl::sha::sha256;
use std::fmt;

use crate::document::CredentialConfig;

const CHAP_DIGEST_LEN: usize = 16;

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Cleartext(Vec<u8>),
    /// PHC string, checked for syntax at load time.
    Argon2(String),
}

impl Credential {
    pub fn compile(config: &CredentialConfig) -> Result<Credential> {
        match config {
            CredentialConfig::Cleartext(secret) => {
                Ok(Credential::Cleartext(secret.as_bytes().to_vec()))
            }
            CredentialConfig::Argon2(phc) => {
                let parsed =
                    PasswordHash::new(phc).map_err(|e| anyhow!("invalid argon2 hash: {e}"))?;
                if !parsed.algorithm.as_str().starts_with("argon2") {
                    return Err(anyhow!("unsupported hash algorithm {}", parsed.algorithm));
                }
                Ok(Credential::Argon2(phc.clone()))
            }
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Credential::Cleartext(_) => "cleartext",
            Credential::Argon2(_) => "argon2",
        }
    }
}

// Never print secret material.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(..)", self.scheme())
    }
}

/// Checks presented material against a stored credential. Implementations must not
/// short-circuit on content so that every call does comparable work.
pub trait CredentialVerifier: Send + Sync + fmt::Debug {
    fn verify_password(&self, stored: &Credential, presented: &[u8]) -> bool;

    /// `response` must equal `MD5(chap_id || secret || challenge)`.
    fn verify_chap(
        &self,
        stored: &Credential,
        chap_id: u8,
        challenge: &[u8],
        response: &[u8],
    ) -> bool;
}

/// Default verifier for the schemes a policy file can carry.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredCredentialVerifier;

impl CredentialVerifier for StoredCredentialVerifier {
    fn verify_password(&self, stored: &Credential, presented: &[u8]) -> bool {
        match stored {
            Credential::Cleartext(expected) => {
                memcmp::eq(&sha256(expected), &sha256(presented))
            }
            Credential::Argon2(phc) => match PasswordHash::new(phc) {
                Ok(parsed) => Argon2::default().verify_password(presented, &parsed).is_ok(),
                Err(_) => false,
            },
        }
    }

    fn verify_chap(
        &self,
        stored: &Credential,
        chap_id: u8,
        challenge: &[u8],
        response: &[u8],
    ) -> bool {
        let Credential::Cleartext(secret) = stored else {
            return false;
        };
        let Some(expected) = chap_digest(chap_id, secret, challenge) else {
            return false;
        };
        response.len() == CHAP_DIGEST_LEN && memcmp::eq(&expected, response)
    }
}

pub fn chap_digest(chap_id: u8, secret: &[u8], challenge: &[u8]) -> Option<[u8; CHAP_DIGEST_LEN]> {
    let mut buf = Vec::with_capacity(1 + secret.len() + challenge.len());
    buf.push(chap_id);
    buf.extend_from_slice(secret);
    buf.extend_from_slice(challenge);
    let digest = hash(MessageDigest::md5(), &buf).ok()?;
    digest.as_ref().try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::PasswordHasher;
    use argon2::password_hash::SaltString;

    fn argon2_of(password: &str) -> String {
        let salt = SaltString::encode_b64(b"fixed-test-salt!").unwrap();
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    #[test]
    fn cleartext_comparison() {
        let stored = Credential::Cleartext(b"hunter22".to_vec());
        let v = StoredCredentialVerifier;
        assert!(v.verify_password(&stored, b"hunter22"));
        assert!(!v.verify_password(&stored, b"hunter2"));
        assert!(!v.verify_password(&stored, b""));
    }

    #[test]
    fn argon2_comparison() {
        let stored = Credential::compile(&CredentialConfig::Argon2(argon2_of("s3cret!"))).unwrap();
        let v = StoredCredentialVerifier;
        assert!(v.verify_password(&stored, b"s3cret!"));
        assert!(!v.verify_password(&stored, b"s3cret"));
    }

    #[test]
    fn malformed_argon2_is_rejected_at_compile() {
        assert!(Credential::compile(&CredentialConfig::Argon2("not-a-hash".into())).is_err());
    }

    #[test]
    fn chap_uses_md5_of_id_secret_challenge() {
        let stored = Credential::Cleartext(b"chap-secret".to_vec());
        let challenge = [0x11u8; 16];
        let response = chap_digest(7, b"chap-secret", &challenge).unwrap();
        let v = StoredCredentialVerifier;
        assert!(v.verify_chap(&stored, 7, &challenge, &response));
        assert!(!v.verify_chap(&stored, 8, &challenge, &response));
        assert!(!v.verify_chap(&stored, 7, &challenge, &response[..15]));
    }

    #[test]
    fn chap_never_passes_for_hashed_credentials() {
        let stored = Credential::compile(&CredentialConfig::Argon2(argon2_of("pw"))).unwrap();
        let challenge = [0u8; 16];
        let response = chap_digest(1, b"pw", &challenge).unwrap();
        assert!(!StoredCredentialVerifier.verify_chap(&stored, 1, &challenge, &response));
    }

    #[test]
    fn debug_output_hides_secret() {
        let stored = Credential::Cleartext(b"top-secret".to_vec());
        assert_eq!(format!("{stored:?}"), "Credential::cleartext(..)");
    }
}
