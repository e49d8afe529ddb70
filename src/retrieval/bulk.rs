use crate::{
    math::Sector,
    notification::{Notification, Outcome, Payload, BULK_RETRIEVAL_EVENT},
    retrieval::{retrieve_to_file, RetrievalError, Retriever, UrlBuilder},
    services::{CancellationToken, RuntimeServices},
    tile_data::{LevelSet, Tile},
    util::{suffix_for_mime_type, unique_id},
};
use bevy::{
    log::{info, warn},
    tasks::Task,
};
use std::{path::PathBuf, sync::Arc};

/// The state of a bulk retrieval.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl BulkProgress {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }
}

/// Downloads every tile of a level set intersecting a sector into the local cache,
/// so the region can be viewed while offline.
///
/// Tiles already in the cache are counted as completed without retrieving them again.
pub struct BulkRetrieval {
    id: u64,
    level_set: LevelSet,
    sector: Sector,
    last_level: u32,
    cache_root: PathBuf,
    image_format: String,
    url_builder: Arc<dyn UrlBuilder>,
    retriever: Arc<dyn Retriever>,
}

impl BulkRetrieval {
    pub fn new(
        level_set: LevelSet,
        sector: Sector,
        last_level: u32,
        cache_root: impl Into<PathBuf>,
        image_format: &str,
        url_builder: Arc<dyn UrlBuilder>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            id: unique_id(),
            last_level: last_level.min(level_set.num_levels() - 1),
            level_set,
            sector,
            cache_root: cache_root.into(),
            image_format: image_format.to_string(),
            url_builder,
            retriever,
        }
    }

    /// Identifies the notifications of this retrieval.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The number of tiles the retrieval covers.
    pub fn total(&self) -> usize {
        self.level_set
            .tile_count_through_level(&self.sector, self.last_level)
    }

    /// Retrieves the tiles on the current thread, calling `progress` after every tile.
    ///
    /// Stops before the next tile once the token is canceled or the offline mode is activated.
    pub fn run(
        &self,
        token: &CancellationToken,
        mut progress: impl FnMut(&BulkProgress),
    ) -> (BulkProgress, Outcome) {
        let suffix = suffix_for_mime_type(&self.image_format);
        let mut state = BulkProgress {
            total: self.total(),
            ..Default::default()
        };

        for key in self.level_set.tiles_for_sector(&self.sector, self.last_level) {
            if token.is_canceled() {
                info!(
                    "Bulk retrieval {} stopped after {} of {} tiles.",
                    self.id,
                    state.completed + state.failed,
                    state.total
                );
                return (state, Outcome::Canceled);
            }

            let Some(tile) = Tile::from_key(&self.level_set, key) else {
                continue;
            };

            let path = key.path(&self.cache_root, suffix);

            let result = match self.url_builder.url_for_tile(&tile, &self.image_format) {
                Ok(url) => retrieve_to_file(self.retriever.as_ref(), &url, &path, token)
                    .map_err(anyhow::Error::from),
                Err(error) => Err(error),
            };

            match result {
                Ok(_) => state.completed += 1,
                Err(error)
                    if error
                        .downcast_ref::<RetrievalError>()
                        .is_some_and(RetrievalError::is_canceled) =>
                {
                    return (state, Outcome::Canceled);
                }
                Err(error) => {
                    warn!("Bulk retrieval of tile {key} failed: {error:#}");
                    state.failed += 1;
                }
            }

            progress(&state);
        }

        let outcome = if state.failed == 0 {
            Outcome::Success
        } else {
            Outcome::Failure(format!("{} of {} tiles failed", state.failed, state.total))
        };

        (state, outcome)
    }

    /// Runs the retrieval in the background, posting a [`BULK_RETRIEVAL_EVENT`] after every tile
    /// and a final one carrying the outcome.
    ///
    /// The retrieval is canceled by the returned token and by the offline mode.
    /// Returns `None`, if the scheduler is full.
    pub fn start(
        self,
        services: &RuntimeServices,
    ) -> Option<(CancellationToken, Task<BulkProgress>)> {
        let token = services.retrieval_token();
        let notifications = services.notifications.clone();

        let task = services.scheduler.try_spawn(token.clone(), move |token| {
            let post = |state: &BulkProgress, outcome: Option<Outcome>| {
                notifications.post(Notification::new(
                    BULK_RETRIEVAL_EVENT,
                    Some(self.id),
                    Payload::BulkProgress {
                        completed: state.completed,
                        failed: state.failed,
                        total: state.total,
                        outcome,
                    },
                ));
            };

            let (state, outcome) = self.run(token, |state| post(state, None));
            post(&state, Some(outcome));

            state
        })?;

        Some((token, task))
    }
}
