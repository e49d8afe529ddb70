use crate::{config::RetrievalConfig, notification::NotificationCenter, util::lock};
use bevy::{
    log::debug,
    prelude::*,
    tasks::{Task, TaskPool, TaskPoolBuilder},
};
use slab::Slab;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// The process wide offline switch.
///
/// While offline, retrievals and bulk retrievals abort as soon as they notice the flag.
#[derive(Clone, Debug, Default)]
pub struct OfflineMode(Arc<AtomicBool>);

impl OfflineMode {
    pub fn is_offline(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_offline(&self, offline: bool) {
        self.0.store(offline, Ordering::Release);
    }
}

/// Cooperative cancellation of a scheduled task.
///
/// Tasks check the token between units of work, so cancelling does not stop a task immediately.
/// Callers that need to know when the task has stopped wait for its completion notification.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
    offline: Option<OfflineMode>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also canceled while the offline mode is active.
    pub fn with_offline_mode(offline: OfflineMode) -> Self {
        Self {
            canceled: default(),
            offline: Some(offline),
        }
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire) || self.is_offline()
    }

    /// Whether the token is canceled only because of the offline mode.
    pub fn is_offline(&self) -> bool {
        self.offline.as_ref().is_some_and(OfflineMode::is_offline)
    }
}

/// Removes a task from the in-flight list once the task finishes, even if it panics.
struct InFlightGuard {
    in_flight: Arc<Mutex<Slab<CancellationToken>>>,
    slot: usize,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).try_remove(self.slot);
    }
}

/// A bounded queue of background tasks, running on a dedicated task pool.
///
/// At most `max_in_flight` tasks run or wait at any time, further submissions are refused
/// and have to be retried by the caller on a later frame.
pub struct TaskScheduler {
    pool: TaskPool,
    in_flight: Arc<Mutex<Slab<CancellationToken>>>,
    max_in_flight: usize,
}

impl TaskScheduler {
    pub fn new(num_threads: usize, max_in_flight: usize) -> Self {
        let pool = TaskPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name("bevy_globe worker".to_string())
            .build();

        Self {
            pool,
            in_flight: Arc::new(Mutex::new(Slab::with_capacity(max_in_flight))),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight() >= self.max_in_flight
    }

    /// Schedules the job, unless the queue is full.
    ///
    /// The returned task can be polled for the result or detached.
    pub fn try_spawn<T, F>(&self, token: CancellationToken, job: F) -> Option<Task<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
    {
        let slot = {
            let mut in_flight = lock(&self.in_flight);

            if in_flight.len() >= self.max_in_flight {
                debug!("Task queue is full, deferring the task.");
                return None;
            }

            in_flight.insert(token.clone())
        };

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            slot,
        };

        Some(self.pool.spawn(async move {
            let _guard = guard;
            job(&token)
        }))
    }

    /// Requests cancellation of every task in flight.
    pub fn cancel_all(&self) {
        for (_, token) in lock(&self.in_flight).iter() {
            token.cancel();
        }
    }
}

/// The runtime collaborators of the globe: the background task scheduler,
/// the notification center and the offline switch.
///
/// Layers and elevation models receive the services when they are created.
#[derive(Clone, Resource)]
pub struct RuntimeServices {
    pub scheduler: Arc<TaskScheduler>,
    pub notifications: Arc<NotificationCenter>,
    pub offline: OfflineMode,
}

impl Default for RuntimeServices {
    fn default() -> Self {
        Self::new(&RetrievalConfig::default())
    }
}

impl RuntimeServices {
    pub fn new(config: &RetrievalConfig) -> Self {
        let offline = OfflineMode::default();
        offline.set_offline(config.offline);

        Self {
            scheduler: Arc::new(TaskScheduler::new(config.worker_threads, config.max_in_flight)),
            notifications: default(),
            offline,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.is_offline()
    }

    /// Switches the offline mode. Going offline cancels the retrievals in flight.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set_offline(offline);
    }

    /// A cancellation token for network and bulk work, which is canceled while offline.
    pub fn retrieval_token(&self) -> CancellationToken {
        CancellationToken::with_offline_mode(self.offline.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::tasks::futures_lite::future;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn offline_cancels_retrieval_tokens() {
        let services = RuntimeServices::new(&RetrievalConfig::default());
        let retrieval = services.retrieval_token();
        let decode = CancellationToken::new();

        assert!(!retrieval.is_canceled());

        services.set_offline(true);

        assert!(retrieval.is_canceled() && retrieval.is_offline());
        assert!(!decode.is_canceled());

        services.set_offline(false);
        assert!(!retrieval.is_canceled());
    }

    #[test]
    fn scheduler_is_bounded() {
        let scheduler = TaskScheduler::new(2, 2);
        let released = Arc::new(AtomicBool::new(false));

        let wait_for_release = |released: Arc<AtomicBool>| {
            move |_: &CancellationToken| {
                let start = Instant::now();
                while !released.load(Ordering::Acquire) && start.elapsed() < Duration::from_secs(10) {
                    thread::sleep(Duration::from_millis(1));
                }
                1
            }
        };

        let first = scheduler.try_spawn(CancellationToken::new(), wait_for_release(released.clone()));
        let second = scheduler.try_spawn(CancellationToken::new(), wait_for_release(released.clone()));
        let third = scheduler.try_spawn(CancellationToken::new(), wait_for_release(released.clone()));

        assert!(first.is_some() && second.is_some());
        assert!(third.is_none());
        assert!(scheduler.is_full());

        released.store(true, Ordering::Release);

        let results = [first, second].map(|task| future::block_on(task.unwrap()));
        assert_eq!(results, [1, 1]);

        let start = Instant::now();
        while scheduler.in_flight() > 0 && start.elapsed() < Duration::from_secs(10) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn cancel_all_reaches_running_tasks() {
        let scheduler = TaskScheduler::new(1, 4);

        let task = scheduler
            .try_spawn(CancellationToken::new(), |token: &CancellationToken| {
                let start = Instant::now();
                while !token.is_canceled() {
                    if start.elapsed() > Duration::from_secs(10) {
                        return false;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                true
            })
            .unwrap();

        scheduler.cancel_all();

        assert!(future::block_on(task));
    }
}
