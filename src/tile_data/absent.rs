use crate::{config::AbsentResourceConfig, util::lock};
use bevy::utils::HashMap;
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Copy, Clone, Debug)]
struct AbsentEntry {
    tries: u32,
    last_try: Instant,
}

/// Tracks resources that recently failed to be retrieved, so they are not requested every frame.
///
/// A resource marked absent is not retried before the minimum check interval has passed.
/// Once it failed `max_tries` times, it is not retried until the try again interval has passed,
/// after which its try counter starts over at zero.
pub struct AbsentResourceList {
    max_tries: u32,
    min_check_interval: Duration,
    try_again_interval: Duration,
    entries: Mutex<HashMap<String, AbsentEntry>>,
}

impl Default for AbsentResourceList {
    fn default() -> Self {
        Self::from_config(&AbsentResourceConfig::default())
    }
}

impl AbsentResourceList {
    pub fn new(max_tries: u32, min_check_interval: Duration, try_again_interval: Duration) -> Self {
        Self {
            max_tries,
            min_check_interval,
            try_again_interval,
            entries: Mutex::new(HashMap::default()),
        }
    }

    pub fn from_config(config: &AbsentResourceConfig) -> Self {
        Self::new(
            config.max_tries,
            config.min_check_interval,
            config.try_again_interval,
        )
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn mark_resource_absent(&self, resource_id: &str) {
        self.mark_resource_absent_at(resource_id, Instant::now());
    }

    /// Records a failed attempt. Entries whose try again interval has passed are dropped on the way.
    pub fn mark_resource_absent_at(&self, resource_id: &str, now: Instant) {
        let mut entries = lock(&self.entries);

        entries.retain(|_, entry| now.saturating_duration_since(entry.last_try) < self.try_again_interval);

        let entry = entries
            .entry(resource_id.to_string())
            .or_insert(AbsentEntry {
                tries: 0,
                last_try: now,
            });

        entry.tries += 1;
        entry.last_try = now;
    }

    pub fn unmark_resource_absent(&self, resource_id: &str) {
        lock(&self.entries).remove(resource_id);
    }

    pub fn is_resource_absent(&self, resource_id: &str) -> bool {
        self.is_resource_absent_at(resource_id, Instant::now())
    }

    pub fn is_resource_absent_at(&self, resource_id: &str, now: Instant) -> bool {
        let mut entries = lock(&self.entries);

        let Some(entry) = entries.get(resource_id).copied() else {
            return false;
        };

        let elapsed = now.saturating_duration_since(entry.last_try);

        if elapsed >= self.try_again_interval {
            entries.remove(resource_id);
            return false;
        }

        elapsed < self.min_check_interval || entry.tries >= self.max_tries
    }

    /// The number of resources currently tracked, expired ones included until they are dropped.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// The number of failed attempts since the resource was last reset.
    pub fn tries(&self, resource_id: &str) -> u32 {
        lock(&self.entries)
            .get(resource_id)
            .map_or(0, |entry| entry.tries)
    }
}
