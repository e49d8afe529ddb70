//! Named-event publish/subscribe, used to deliver completion events of worker tasks
//! back to the layers and elevation models that requested them.
//!
//! Observers receive notifications through an unbounded channel and drain it on their own thread,
//! so workers never touch the state of the observer directly.

use crate::{tile_data::TileKey, util::lock};
use async_channel::{Receiver, Sender};
use bevy::utils::HashMap;
use std::{path::PathBuf, sync::Mutex};

/// A tile retrieval finished.
pub const RETRIEVAL_EVENT: &str = "bevy_globe.retrieval";
/// A downloaded tile was decoded and inserted into its cache.
pub const LOAD_EVENT: &str = "bevy_globe.load";
/// New data arrived and the globe should be drawn again.
pub const REDRAW_EVENT: &str = "bevy_globe.redraw";
/// A bulk retrieval made progress or finished.
pub const BULK_RETRIEVAL_EVENT: &str = "bevy_globe.bulk_retrieval";

/// The result of an asynchronous task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
    Canceled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    None,
    Tile {
        key: TileKey,
        path: PathBuf,
        outcome: Outcome,
    },
    BulkProgress {
        completed: usize,
        failed: usize,
        total: usize,
        outcome: Option<Outcome>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub name: String,
    /// The identifier of the layer or model the notification concerns, if any.
    pub sender: Option<u64>,
    pub payload: Payload,
}

impl Notification {
    pub fn new(name: &str, sender: Option<u64>, payload: Payload) -> Self {
        Self {
            name: name.to_string(),
            sender,
            payload,
        }
    }
}

struct Observer {
    sender: Option<u64>,
    channel: Sender<Notification>,
}

/// Delivers named notifications to every observer subscribed to the name.
///
/// Dropping the receiver of a subscription ends it.
#[derive(Default)]
pub struct NotificationCenter {
    observers: Mutex<HashMap<String, Vec<Observer>>>,
}

impl NotificationCenter {
    /// Subscribes to the named events. If `sender` is set, only notifications from that sender are delivered.
    pub fn subscribe(&self, names: &[&str], sender: Option<u64>) -> Receiver<Notification> {
        let (channel, receiver) = async_channel::unbounded();
        let mut observers = lock(&self.observers);

        for name in names {
            observers
                .entry(name.to_string())
                .or_default()
                .push(Observer {
                    sender,
                    channel: channel.clone(),
                });
        }

        receiver
    }

    pub fn post(&self, notification: Notification) {
        let mut observers = lock(&self.observers);

        let Some(observers) = observers.get_mut(&notification.name) else {
            return;
        };

        observers.retain(|observer| {
            if observer.sender.is_some() && observer.sender != notification.sender {
                return !observer.channel.is_closed();
            }

            observer.channel.try_send(notification.clone()).is_ok()
        });
    }

    pub fn observer_count(&self, name: &str) -> usize {
        lock(&self.observers).get(name).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_notification(sender: u64) -> Notification {
        Notification::new(
            RETRIEVAL_EVENT,
            Some(sender),
            Payload::Tile {
                key: TileKey::new(0, 1, 2),
                path: PathBuf::from("cache/0/1/1_2.png"),
                outcome: Outcome::Success,
            },
        )
    }

    #[test]
    fn delivery_by_name_and_sender() {
        let center = NotificationCenter::default();

        let everything = center.subscribe(&[RETRIEVAL_EVENT, LOAD_EVENT], None);
        let only_seven = center.subscribe(&[RETRIEVAL_EVENT], Some(7));
        let redraws = center.subscribe(&[REDRAW_EVENT], None);

        center.post(tile_notification(7));
        center.post(tile_notification(8));

        assert_eq!(everything.len(), 2);
        assert_eq!(only_seven.len(), 1);
        assert_eq!(only_seven.try_recv().unwrap().sender, Some(7));
        assert!(redraws.is_empty());
    }

    #[test]
    fn dropped_receivers_unsubscribe() {
        let center = NotificationCenter::default();

        let receiver = center.subscribe(&[REDRAW_EVENT], None);
        assert_eq!(center.observer_count(REDRAW_EVENT), 1);

        drop(receiver);
        center.post(Notification::new(REDRAW_EVENT, None, Payload::None));

        assert_eq!(center.observer_count(REDRAW_EVENT), 0);
    }
}
