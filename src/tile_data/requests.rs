use crate::{
    notification::{Notification, NotificationCenter, Outcome, Payload, LOAD_EVENT, RETRIEVAL_EVENT},
    tile_data::{AbsentResourceList, TileKey},
};
use async_channel::Receiver;
use bevy::{
    log::{debug, warn},
    utils::HashSet,
};
use std::path::PathBuf;

/// Tracks the asynchronous work of one layer or elevation model.
///
/// A tile moves from absent to retrieving (bytes are fetched into the local cache),
/// to loading (the cached file is decoded into a cache entry), to ready or failed.
/// Failed tiles are kept in the absent list and are not requested again until it allows so.
///
/// Both sets are only touched on the thread owning the requests, completion events
/// arrive through the notification channel and are applied by [`TileRequests::process_notifications`].
pub struct TileRequests {
    owner: u64,
    retrieving: HashSet<TileKey>,
    loading: HashSet<TileKey>,
    absent: AbsentResourceList,
    events: Receiver<Notification>,
}

impl TileRequests {
    /// Subscribes to the retrieval and load events sent on behalf of `owner`.
    pub fn new(owner: u64, notifications: &NotificationCenter, absent: AbsentResourceList) -> Self {
        Self {
            owner,
            retrieving: HashSet::default(),
            loading: HashSet::default(),
            absent,
            events: notifications.subscribe(&[RETRIEVAL_EVENT, LOAD_EVENT], Some(owner)),
        }
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn absent(&self) -> &AbsentResourceList {
        &self.absent
    }

    pub fn num_retrieving(&self) -> usize {
        self.retrieving.len()
    }

    pub fn num_loading(&self) -> usize {
        self.loading.len()
    }

    pub fn is_retrieving(&self, key: TileKey) -> bool {
        self.retrieving.contains(&key)
    }

    pub fn is_loading(&self, key: TileKey) -> bool {
        self.loading.contains(&key)
    }

    /// Whether a retrieval or a load of the tile is in flight.
    pub fn is_pending(&self, key: TileKey) -> bool {
        self.retrieving.contains(&key) || self.loading.contains(&key)
    }

    pub fn is_absent(&self, key: TileKey) -> bool {
        self.absent.is_resource_absent(&key.to_string())
    }

    /// Whether new work may be started for the tile.
    pub fn can_request(&self, key: TileKey) -> bool {
        !self.is_pending(key) && !self.is_absent(key)
    }

    /// Moves the tile into the retrieving state.
    /// Returns false, if the tile is already pending or marked absent.
    pub fn begin_retrieval(&mut self, key: TileKey) -> bool {
        self.can_request(key) && self.retrieving.insert(key)
    }

    /// Moves the tile into the loading state.
    /// Returns false, if the tile is already loading, or retrieving on behalf of another request.
    pub fn begin_load(&mut self, key: TileKey) -> bool {
        !self.is_pending(key) && self.loading.insert(key)
    }

    /// Forgets a request that could not be scheduled, so it is retried on a later frame.
    pub fn abandon(&mut self, key: TileKey) {
        self.retrieving.remove(&key);
        self.loading.remove(&key);
    }

    /// Leaves the loading state, for owners that poll their load tasks instead of waiting for a [`LOAD_EVENT`].
    pub fn finish_load(&mut self, key: TileKey, outcome: &Outcome) {
        if self.loading.remove(&key) {
            self.record_outcome(key, outcome);
        }
    }

    /// Drains the completion events of the owner.
    ///
    /// Returns the tiles whose retrieval succeeded together with their local file,
    /// the owner starts loading them.
    pub fn process_notifications(&mut self) -> Vec<(TileKey, PathBuf)> {
        let mut retrieved = Vec::new();

        while let Ok(notification) = self.events.try_recv() {
            let Payload::Tile { key, path, outcome } = notification.payload else {
                continue;
            };

            let is_retrieval = notification.name == RETRIEVAL_EVENT;
            let pending = if is_retrieval {
                &mut self.retrieving
            } else {
                &mut self.loading
            };

            if !pending.remove(&key) {
                debug!("Ignoring the completion of tile {key}, it is no longer pending.");
                continue;
            }

            if let Outcome::Failure(reason) = &outcome {
                warn!("Tile {key} at {} failed: {reason}", path.display());
            }

            self.record_outcome(key, &outcome);

            if is_retrieval && outcome.is_success() {
                retrieved.push((key, path));
            }
        }

        retrieved
    }

    fn record_outcome(&self, key: TileKey, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.absent.unmark_resource_absent(&key.to_string()),
            Outcome::Failure(_) => self.absent.mark_resource_absent(&key.to_string()),
            Outcome::Canceled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(center: &NotificationCenter, name: &str, owner: u64, key: TileKey, outcome: Outcome) {
        center.post(Notification::new(
            name,
            Some(owner),
            Payload::Tile {
                key,
                path: key.path("cache", "png"),
                outcome,
            },
        ));
    }

    #[test]
    fn duplicate_requests_are_refused() {
        let center = NotificationCenter::default();
        let mut requests = TileRequests::new(1, &center, AbsentResourceList::default());
        let key = TileKey::new(2, 3, 4);

        assert!(requests.begin_retrieval(key));
        assert!(!requests.begin_retrieval(key));
        assert!(!requests.begin_load(key));
        assert_eq!(requests.num_retrieving(), 1);

        post(&center, RETRIEVAL_EVENT, 1, key, Outcome::Success);
        let retrieved = requests.process_notifications();

        assert_eq!(retrieved, vec![(key, key.path("cache", "png"))]);
        assert!(!requests.is_retrieving(key));

        assert!(requests.begin_load(key));
        assert!(!requests.begin_load(key));
        assert!(!requests.begin_retrieval(key));

        post(&center, LOAD_EVENT, 1, key, Outcome::Success);
        assert!(requests.process_notifications().is_empty());
        assert!(!requests.is_pending(key));
    }

    #[test]
    fn failures_mark_tiles_absent() {
        let center = NotificationCenter::default();
        let mut requests = TileRequests::new(1, &center, AbsentResourceList::default());
        let failed = TileKey::new(0, 0, 0);
        let canceled = TileKey::new(0, 0, 1);

        assert!(requests.begin_retrieval(failed));
        assert!(requests.begin_retrieval(canceled));

        post(&center, RETRIEVAL_EVENT, 1, failed, Outcome::Failure("not found".into()));
        post(&center, RETRIEVAL_EVENT, 1, canceled, Outcome::Canceled);

        assert!(requests.process_notifications().is_empty());
        assert!(requests.is_absent(failed));
        assert!(!requests.begin_retrieval(failed));
        assert_eq!(requests.absent().tries(&failed.to_string()), 1);

        assert!(!requests.is_absent(canceled));
        assert!(requests.begin_retrieval(canceled));
    }

    #[test]
    fn events_of_other_owners_are_ignored() {
        let center = NotificationCenter::default();
        let mut requests = TileRequests::new(1, &center, AbsentResourceList::default());
        let key = TileKey::new(1, 1, 1);

        assert!(requests.begin_retrieval(key));
        post(&center, RETRIEVAL_EVENT, 2, key, Outcome::Success);

        assert!(requests.process_notifications().is_empty());
        assert!(requests.is_retrieving(key));

        requests.abandon(key);
        assert!(requests.can_request(key));
    }

    #[test]
    fn polled_loads() {
        let center = NotificationCenter::default();
        let mut requests = TileRequests::new(1, &center, AbsentResourceList::default());
        let loaded = TileKey::new(3, 0, 0);
        let corrupt = TileKey::new(3, 0, 1);

        assert!(requests.begin_load(loaded));
        assert!(requests.begin_load(corrupt));

        requests.finish_load(loaded, &Outcome::Success);
        requests.finish_load(corrupt, &Outcome::Failure("corrupt raster".into()));

        assert_eq!(requests.num_loading(), 0);
        assert!(requests.can_request(loaded));
        assert!(requests.is_absent(corrupt));
    }
}
