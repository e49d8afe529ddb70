//! Retrieval of tile resources into the local file cache and loading of cached files,
//! both running as background tasks that report back through notifications.

mod bulk;
mod retriever;
mod url_builder;

pub use self::{
    bulk::{BulkProgress, BulkRetrieval},
    retriever::{retrieve_to_file, FileRetriever, RetrievalError, Retriever},
    url_builder::{FileUrlBuilder, UrlBuilder, WmsUrlBuilder, WmsVersion},
};

use crate::{
    notification::{Notification, Outcome, Payload, LOAD_EVENT, REDRAW_EVENT, RETRIEVAL_EVENT},
    services::{CancellationToken, RuntimeServices},
    tile_data::TileKey,
};
use anyhow::Result;
use bevy::log::debug;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Schedules the retrieval of a tile into its local cache file.
///
/// The outcome is posted as a [`RETRIEVAL_EVENT`] on behalf of `owner`.
/// Returns false, if the scheduler is full and the retrieval has to be requested again later.
pub fn spawn_tile_retrieval(
    services: &RuntimeServices,
    retriever: Arc<dyn Retriever>,
    owner: u64,
    key: TileKey,
    url: String,
    path: PathBuf,
) -> bool {
    let notifications = services.notifications.clone();

    let task = services
        .scheduler
        .try_spawn(services.retrieval_token(), move |token| {
            let outcome = match retrieve_to_file(retriever.as_ref(), &url, &path, token) {
                Ok(_) => Outcome::Success,
                Err(error) if error.is_canceled() => Outcome::Canceled,
                Err(error) => Outcome::Failure(error.to_string()),
            };

            debug!("Retrieval of tile {key} from {url} finished: {outcome:?}");

            notifications.post(Notification::new(
                RETRIEVAL_EVENT,
                Some(owner),
                Payload::Tile { key, path, outcome },
            ));
        });

    task.map(|task| task.detach()).is_some()
}

/// Schedules loading the cached file of a tile with `load`, which inserts the result into its cache.
///
/// The outcome is posted as a [`LOAD_EVENT`] on behalf of `owner`, successful loads also post a [`REDRAW_EVENT`].
/// Returns false, if the scheduler is full and the load has to be requested again later.
pub fn spawn_tile_load<F>(
    services: &RuntimeServices,
    owner: u64,
    key: TileKey,
    path: PathBuf,
    load: F,
) -> bool
where
    F: FnOnce(&Path, &CancellationToken) -> Result<()> + Send + 'static,
{
    let notifications = services.notifications.clone();

    let task = services
        .scheduler
        .try_spawn(CancellationToken::new(), move |token| {
            let outcome = if token.is_canceled() {
                Outcome::Canceled
            } else {
                match load(&path, token) {
                    Ok(()) => Outcome::Success,
                    Err(error) => Outcome::Failure(format!("{error:#}")),
                }
            };

            let success = outcome.is_success();

            notifications.post(Notification::new(
                LOAD_EVENT,
                Some(owner),
                Payload::Tile { key, path, outcome },
            ));

            if success {
                notifications.post(Notification::new(REDRAW_EVENT, Some(owner), Payload::None));
            }
        });

    task.map(|task| task.detach()).is_some()
}
