use std::collections::HashMap;
use std::path::Path;

use ed25519_dalek::VerifyingKey;
use serde::Deserialize;

use crate::error::TokenError;

#[derive(Deserialize)]
struct KeysetFile {
    keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
struct KeyEntry {
    kid: String,
    pubkey_b64u: String,
}

/// The issuer's set of Ed25519 verifying keys, indexed by `kid`. Loaded
/// from the `{keys:[{kid,pubkey_b64u}]}` JSON file the control plane
/// publishes; swapped wholesale on reload, never mutated in place.
#[derive(Debug, Default)]
pub struct Keyset {
    keys: HashMap<String, VerifyingKey>,
}

impl Keyset {
    pub fn from_json(bytes: &[u8]) -> Result<Self, TokenError> {
        let file: KeysetFile = serde_json::from_slice(bytes)?;
        let mut keys = HashMap::with_capacity(file.keys.len());
        for entry in file.keys {
            let raw = flowersec_common::decode_b64u(&entry.pubkey_b64u)
                .map_err(|_| TokenError::InvalidKeysetEntry(entry.kid.clone()))?;
            let raw: [u8; 32] = raw
                .try_into()
                .map_err(|_| TokenError::InvalidKeysetEntry(entry.kid.clone()))?;
            let key = VerifyingKey::from_bytes(&raw)
                .map_err(|_| TokenError::InvalidKeysetEntry(entry.kid.clone()))?;
            keys.insert(entry.kid, key);
        }
        Ok(Self { keys })
    }

    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_json(&bytes)
    }

    pub fn get(&self, kid: &str) -> Option<&VerifyingKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
