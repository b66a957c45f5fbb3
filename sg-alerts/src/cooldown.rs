//! Cooldown gate
//!
//! Per-(camera, track) suppression window. The check of the last trigger
//! instant and the write of the new one happen inside a single critical
//! section on the key's shard, so two concurrent admits for the same key can
//! never both succeed within the window.
//!
//! Keys hash onto a fixed set of shards, each behind its own mutex: events
//! for unrelated cameras rarely contend. Critical sections contain no
//! `.await` and no I/O.
//!
//! **Eviction:** a shard that grows past its share of `max_keys` drops the
//! entries whose window has already elapsed. Such entries can no longer
//! suppress anything, so pruning never changes a decision. Live entries are
//! never evicted; if a shard is full of live entries it grows, and the next
//! pass waits until it has doubled, keeping pruning amortized O(1) per admit.

use crate::event::DetectionEvent;
use crate::pipeline::SuppressionReason;
use chrono::{DateTime, Utc};
use sg_common::config::DEFAULT_MAX_TRACKED_KEYS;
use sg_common::time::{to_chrono, Clock};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of independently locked shards
pub const SHARD_COUNT: usize = 16;

/// Suppression identity: camera plus track when the event has one
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    camera_id: String,
    track_id: Option<String>,
}

impl CooldownKey {
    pub fn new(camera_id: &str, track_id: Option<&str>) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            track_id: track_id.map(str::to_string),
        }
    }

    pub fn from_event(event: &DetectionEvent) -> Self {
        Self::new(event.camera_id(), event.track_id())
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }
}

impl std::fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.track_id {
            Some(track) => write!(f, "{}/{}", self.camera_id, track),
            None => f.write_str(&self.camera_id),
        }
    }
}

/// Outcome of [`CooldownGate::admit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub admitted: bool,
    /// Instant recorded for the key when admitted
    pub at: Option<DateTime<Utc>>,
    /// Time left in the window when suppressed
    pub remaining: Option<Duration>,
}

impl Admission {
    fn admitted(at: DateTime<Utc>) -> Self {
        Self {
            admitted: true,
            at: Some(at),
            remaining: None,
        }
    }

    fn suppressed(remaining: Duration) -> Self {
        Self {
            admitted: false,
            at: None,
            remaining: Some(remaining),
        }
    }

    pub fn reason(&self) -> Option<SuppressionReason> {
        (!self.admitted).then_some(SuppressionReason::Cooldown)
    }

    /// Whole seconds left, rounded up, for reporting
    pub fn remaining_secs(&self) -> Option<u64> {
        self.remaining
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
    }
}

struct Shard {
    entries: HashMap<CooldownKey, DateTime<Utc>>,
    /// Size at which the next expired-entry pass runs
    prune_at: usize,
    prune_passes: u64,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            prune_at: capacity,
            prune_passes: 0,
        }
    }
}

/// Process-wide cooldown state, owned explicitly and shared via `Arc`
pub struct CooldownGate {
    window: Duration,
    clock: Arc<dyn Clock>,
    shards: Vec<Mutex<Shard>>,
    hasher: RandomState,
    shard_capacity: usize,
}

impl CooldownGate {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(window, clock, DEFAULT_MAX_TRACKED_KEYS)
    }

    pub fn with_capacity(window: Duration, clock: Arc<dyn Clock>, max_keys: usize) -> Self {
        let shard_capacity = (max_keys / SHARD_COUNT).max(1);
        Self {
            window,
            clock,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new(shard_capacity))).collect(),
            hasher: RandomState::new(),
            shard_capacity,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn shard(&self, key: &CooldownKey) -> MutexGuard<'_, Shard> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit or suppress an event for its camera/track key
    pub fn admit(&self, event: &DetectionEvent) -> Admission {
        self.admit_key(&CooldownKey::from_event(event))
    }

    /// Atomic check-and-update for one key
    pub fn admit_key(&self, key: &CooldownKey) -> Admission {
        let window = to_chrono(self.window);
        let mut shard = self.shard(key);
        let now = self.clock.now();

        if let Some(last) = shard.entries.get(key) {
            let elapsed = now.signed_duration_since(*last);
            if elapsed < window {
                let remaining = (window - elapsed).to_std().unwrap_or(self.window);
                debug!(key = %key, remaining_ms = remaining.as_millis() as u64, "Cooldown active");
                return Admission::suppressed(remaining);
            }
        } else if shard.entries.len() >= shard.prune_at {
            let before = shard.entries.len();
            shard.entries.retain(|_, last| now.signed_duration_since(*last) < window);
            let live = shard.entries.len();
            shard.prune_passes += 1;
            debug!("Pruned {} expired cooldown entries", before - live);

            shard.prune_at = self.shard_capacity.max(live * 2);
            if live >= self.shard_capacity {
                warn!(
                    "Cooldown shard holds {} live keys (capacity {}, pass {}); next prune at {}",
                    live, self.shard_capacity, shard.prune_passes, shard.prune_at
                );
            }
        }

        shard.entries.insert(key.clone(), now);
        debug!(key = %key, "Cooldown admitted");
        Admission::admitted(now)
    }

    /// Give back an admission that did not end in a trigger
    ///
    /// Removes the key only if it still holds `admitted_at`; a newer
    /// admission for the same key is left untouched. Returns whether the
    /// entry was removed.
    pub fn release(&self, key: &CooldownKey, admitted_at: DateTime<Utc>) -> bool {
        let mut shard = self.shard(key);
        if shard.entries.get(key) == Some(&admitted_at) {
            shard.entries.remove(key);
            debug!(key = %key, "Cooldown released");
            true
        } else {
            false
        }
    }

    /// Forget every recorded trigger
    pub fn reset(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            shard.entries.clear();
            shard.prune_at = self.shard_capacity;
        }
    }

    /// Number of keys currently remembered
    pub fn tracked_keys(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(|e| e.into_inner()).entries.len())
            .sum()
    }
}

impl std::fmt::Debug for CooldownGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownGate")
            .field("window", &self.window)
            .field("shard_capacity", &self.shard_capacity)
            .finish_non_exhaustive()
    }
}
