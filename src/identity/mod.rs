//! Caller identities backed by ed25519 key pairs.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::ledger::AccountId;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("keyfile {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("keyfile {}: {}", .path.display(), .source)]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("secret key must be 32 bytes of hex: {0}")]
    InvalidSecret(String),
    #[error("keyfile account {stored} does not match its secret key ({derived})")]
    Mismatch { stored: AccountId, derived: AccountId },
}

/// On-disk key pair. The account id is the hex verifying key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Keyfile {
    pub account: AccountId,
    pub secret_hex: String,
}

impl Keyfile {
    pub fn generate() -> Self {
        let mut sk_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut sk_bytes);
        Self::from_signing_key(&SigningKey::from_bytes(&sk_bytes))
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let key = decode_secret(secret_hex)?;
        Ok(Self::from_signing_key(&key))
    }

    fn from_signing_key(key: &SigningKey) -> Self {
        Self {
            account: account_of(key),
            secret_hex: hex::encode(key.to_bytes()),
        }
    }

    /// Caller identity derived from the secret, checked against the stored id.
    pub fn identity(&self) -> Result<AccountId, IdentityError> {
        let derived = account_of(&decode_secret(&self.secret_hex)?);
        if derived != self.account {
            return Err(IdentityError::Mismatch {
                stored: self.account.clone(),
                derived,
            });
        }
        Ok(derived)
    }

    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let raw = fs::read(path).map_err(|source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| IdentityError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let io_err = |source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|source| IdentityError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(io_err)
    }
}

fn account_of(key: &SigningKey) -> AccountId {
    hex::encode(key.verifying_key().as_bytes())
}

fn decode_secret(secret_hex: &str) -> Result<SigningKey, IdentityError> {
    let bytes = hex::decode(secret_hex.trim())
        .map_err(|e| IdentityError::InvalidSecret(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| IdentityError::InvalidSecret(format!("got {} bytes", b.len())))?;
    Ok(SigningKey::from_bytes(&bytes))
}
