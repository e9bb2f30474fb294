//! Durable backend on top of a sled tree.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::pattern::{literal_prefix, matches_pattern};
use super::{KvBackend, KvEntry, KvError};

/// Stored representation of one pair.
///
/// sled has no native expiry, so each value is wrapped in a small JSON
/// envelope carrying an optional unix-seconds deadline. Expired pairs are
/// deleted on the read that discovers them.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

impl Envelope {
    fn live(&self, now: i64) -> bool {
        match self.exp {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// Persistent backend storing pairs in a single sled tree.
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    const TREE_NAME: &'static str = "kvmodel_pairs";

    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// Opens a throwaway database that disappears when dropped.
    pub fn temporary() -> Result<Self, KvError> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn encode(value: &str, ttl: Option<u64>) -> Result<Vec<u8>, KvError> {
        let envelope = Envelope {
            v: value.to_string(),
            exp: ttl.map(|secs| Self::now() + secs as i64),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(bytes: &[u8]) -> Result<Envelope, KvError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Reads a key, deleting it on the spot when it turns out expired.
    fn read_live(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => {
                let envelope = Self::decode(&bytes)?;
                if envelope.live(Self::now()) {
                    Ok(Some(envelope.v))
                } else {
                    self.tree.remove(key.as_bytes())?;
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

impl KvBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.read_live(key)
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        keys.iter().map(|key| self.read_live(key)).collect()
    }

    fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), KvError> {
        self.tree.insert(key.as_bytes(), Self::encode(value, ttl)?)?;
        self.tree.flush()?;
        Ok(())
    }

    fn multi_set(&self, entries: &[KvEntry]) -> Result<(), KvError> {
        for entry in entries {
            self.tree
                .insert(entry.key.as_bytes(), Self::encode(&entry.value, entry.ttl)?)?;
        }
        self.tree.flush()?;
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<u64, KvError> {
        let now = Self::now();
        let mut removed = 0;
        for key in keys {
            if let Some(bytes) = self.tree.remove(key.as_bytes())? {
                if Self::decode(&bytes)?.live(now) {
                    removed += 1;
                }
            }
        }
        self.tree.flush()?;
        Ok(removed)
    }

    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let now = Self::now();
        let mut keys = Vec::new();
        for item in self.tree.scan_prefix(literal_prefix(pattern).as_bytes()) {
            let (key_bytes, value_bytes) = item?;
            let key = String::from_utf8_lossy(&key_bytes).into_owned();
            if !matches_pattern(&key, pattern) {
                continue;
            }
            if Self::decode(&value_bytes)?.live(now) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
