//! Monotonic id allocation over the shared keyspace.
//!
//! Writers across processes coordinate through an advisory busy flag,
//! `__creating__:{prefix}`: poll until it reads clear, set it, pick the next
//! id, clear it. The flag is cooperative only — nothing enforces it — so the
//! allocator additionally tracks in-process reservations to stay correct
//! between threads of one process, and the wait is bounded so a crashed
//! writer cannot park everyone forever.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::keys::KeyCodec;
use crate::kv::KvBackend;

const FLAG_BUSY: &str = "1";
const FLAG_CLEAR: &str = "0";

#[derive(Default)]
struct AllocatorState {
    /// Highest id ever handed out per model in this process.
    high_water: HashMap<String, i64>,
    /// Ids reserved but not yet written or abandoned.
    pending: HashMap<String, BTreeSet<i64>>,
}

/// Hands out record ids, one model at a time.
pub struct IdAllocator {
    backend: Arc<dyn KvBackend>,
    codec: KeyCodec,
    single_process: bool,
    timeout: Duration,
    poll: Duration,
    state: Mutex<AllocatorState>,
}

impl IdAllocator {
    pub(crate) fn new(backend: Arc<dyn KvBackend>, codec: KeyCodec, config: &StoreConfig) -> Self {
        Self {
            backend,
            codec,
            single_process: config.single_process,
            timeout: Duration::from_millis(config.reserve_timeout_ms),
            poll: Duration::from_millis(config.reserve_poll_ms),
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Reserves the next id for `model`.
    ///
    /// The caller must pair every successful reservation with a
    /// [`release`](Self::release) once the record's keys are written (or the
    /// write abandoned), otherwise the id stays pinned as in-flight.
    pub fn reserve(&self, model: &str) -> StoreResult<i64> {
        self.wait_for_flag(model)?;
        self.backend
            .set(&self.codec.creating_flag(), FLAG_BUSY, None)?;

        let outcome = self.next_id(model);
        let cleared = self
            .backend
            .set(&self.codec.creating_flag(), FLAG_CLEAR, None);

        match (outcome, cleared) {
            (Ok(id), Ok(())) => {
                debug!("reserved id {id} for {model}");
                Ok(id)
            }
            (Ok(id), Err(e)) => {
                // The flag may still read busy for other writers; drop the
                // reservation and surface the failure.
                self.release(model, id);
                Err(StoreError::Backend(format!(
                    "failed to clear the busy flag: {e}"
                )))
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Returns a reserved id to the pool of settled ids.
    pub fn release(&self, model: &str, id: i64) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(pending) = state.pending.get_mut(model) {
                pending.remove(&id);
            }
        } else {
            warn!("allocator state lock poisoned while releasing id {id} for {model}");
        }
    }

    /// Polls the advisory flag until it reads clear or the deadline passes.
    fn wait_for_flag(&self, model: &str) -> StoreResult<()> {
        let flag = self.codec.creating_flag();
        let deadline = Instant::now() + self.timeout;
        let mut waited = false;
        loop {
            match self.backend.get(&flag)? {
                Some(value) if value == FLAG_BUSY => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::ReservationTimeout(format!(
                            "busy flag for {model} stayed set for {:?}",
                            self.timeout
                        )));
                    }
                    waited = true;
                    std::thread::sleep(self.poll);
                }
                _ => {
                    if waited {
                        debug!("busy flag cleared, continuing reservation for {model}");
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Picks `max(stored, handed out, in flight) + 1` under the state lock.
    fn next_id(&self, model: &str) -> StoreResult<i64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("allocator state lock poisoned".to_string()))?;

        // A store that owns its prefix outright can trust the in-process
        // high-water mark after the first scan seeds it.
        let stored_max = if self.single_process && state.high_water.contains_key(model) {
            0
        } else {
            self.scan_stored_max(model)?
        };

        let high_water = state.high_water.get(model).copied().unwrap_or(0);
        let in_flight = state
            .pending
            .get(model)
            .and_then(|ids| ids.iter().next_back().copied())
            .unwrap_or(0);

        let id = stored_max.max(high_water).max(in_flight) + 1;
        state.high_water.insert(model.to_string(), id);
        state.pending.entry(model.to_string()).or_default().insert(id);
        Ok(id)
    }

    /// Highest id present in the stored keyspace for `model`.
    fn scan_stored_max(&self, model: &str) -> StoreResult<i64> {
        let keys = self.backend.scan_keys(&self.codec.model_pattern(model))?;
        let mut max = 0;
        for key in &keys {
            match self.codec.parse(key) {
                Ok(parsed) if parsed.model == model => max = max.max(parsed.id),
                Ok(_) => {}
                Err(_) => debug!("skipping foreign key {key} during id scan"),
            }
        }
        Ok(max)
    }
}
