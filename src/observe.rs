//! Change observers with a polling fallback
//!
//! An [`Observer`] re-reads a snapshot whenever its topic is published and,
//! optionally, on a fixed interval. The listener only fires when the snapshot
//! actually changed, so the two triggers never produce duplicate renders.

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::events::{EventBus, Subscription, Topic};

/// Periodic task that is aborted when the handle is dropped
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Start calling `tick` every `interval` on the current Tokio runtime.
    ///
    /// Returns None when no runtime is available; callers then run
    /// without the fallback.
    pub fn spawn<F>(interval: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!("No Tokio runtime, polling fallback disabled");
                return None;
            }
        };

        let task = runtime.spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                tick();
            }
        });
        Some(Self { task })
    }

    /// Stop polling
    pub fn cancel(self) {}
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Live view of a snapshot. Dropping it unsubscribes and stops polling.
#[derive(Debug)]
pub struct Observer {
    _subscriptions: Vec<Subscription>,
    poll: Option<PollHandle>,
}

impl Observer {
    /// Whether a polling fallback task is running
    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Replace the polling fallback
    pub(crate) fn with_poll(mut self, poll: Option<PollHandle>) -> Self {
        self.poll = poll;
        self
    }
}

/// Watch `read()` for changes announced on `topics` or found by polling
pub(crate) fn observe<T, R, L>(
    bus: &EventBus,
    topics: &[Topic],
    poll_interval: Option<Duration>,
    read: R,
    listener: L,
) -> Observer
where
    T: PartialEq + Clone + Send + 'static,
    R: Fn() -> T + Send + Sync + 'static,
    L: Fn(&T) + Send + Sync + 'static,
{
    // Held from read to delivery so concurrent triggers deliver in order.
    // Reentrant: a listener may publish and refresh on the same thread.
    let last = ReentrantMutex::new(RefCell::new(read()));
    let refresh = Arc::new(move || {
        let guard = last.lock();
        let current = read();
        {
            let mut last = guard.borrow_mut();
            if *last == current {
                return;
            }
            *last = current.clone();
        }
        listener(&current);
    });

    let subscriptions = topics
        .iter()
        .map(|topic| {
            let refresh = Arc::clone(&refresh);
            bus.subscribe(*topic, move |_| refresh())
        })
        .collect();

    let poll = poll_interval.and_then(|interval| {
        let refresh = Arc::clone(&refresh);
        PollHandle::spawn(interval, move || refresh())
    });

    Observer {
        _subscriptions: subscriptions,
        poll,
    }
}
