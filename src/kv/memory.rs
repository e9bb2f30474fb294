//! In-process backend backed by an ordered map.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::pattern::{literal_prefix, matches_pattern};
use super::{KvBackend, KvEntry, KvError};

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// Thread-safe in-memory backend.
///
/// Expiry is enforced lazily: expired pairs are dropped whenever a read or
/// write touches them, so no sweeper thread is needed. Keys come back from
/// scans in lexicographic order.
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<String, Slot>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live pairs. Mostly useful in tests.
    pub fn len(&self) -> Result<usize, KvError> {
        let now = Instant::now();
        let map = self.read_map()?;
        Ok(map.values().filter(|slot| slot.live(now)).count())
    }

    pub fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.len()? == 0)
    }

    fn read_map(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Slot>>, KvError> {
        self.map
            .read()
            .map_err(|_| KvError::Poisoned("memory backend map".to_string()))
    }

    fn write_map(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Slot>>, KvError> {
        self.map
            .write()
            .map_err(|_| KvError::Poisoned("memory backend map".to_string()))
    }

    fn slot_for(value: &str, ttl: Option<u64>) -> Slot {
        Slot {
            value: value.to_string(),
            expires_at: ttl.map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        {
            let map = self.read_map()?;
            match map.get(key) {
                Some(slot) if slot.live(now) => return Ok(Some(slot.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired entry: upgrade to a write lock and drop it.
        self.write_map()?.remove(key);
        Ok(None)
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let now = Instant::now();
        let map = self.read_map()?;
        Ok(keys
            .iter()
            .map(|key| match map.get(key) {
                Some(slot) if slot.live(now) => Some(slot.value.clone()),
                _ => None,
            })
            .collect())
    }

    fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), KvError> {
        self.write_map()?
            .insert(key.to_string(), Self::slot_for(value, ttl));
        Ok(())
    }

    fn multi_set(&self, entries: &[KvEntry]) -> Result<(), KvError> {
        let mut map = self.write_map()?;
        for entry in entries {
            map.insert(entry.key.clone(), Self::slot_for(&entry.value, entry.ttl));
        }
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<u64, KvError> {
        let now = Instant::now();
        let mut map = self.write_map()?;
        let mut removed = 0;
        for key in keys {
            if let Some(slot) = map.remove(key) {
                if slot.live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let prefix = literal_prefix(pattern).to_string();
        let map = self.read_map()?;
        Ok(map
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, slot)| slot.live(now) && matches_pattern(key, pattern))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
