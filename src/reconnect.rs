//! Reconnection supervisor and cancellable client tasks.
//!
//! The supervisor is level-triggered: on every tick it asks the client
//! whether it is connected and reopens it when it is not. With backoff
//! enabled, each tick that finds the connection down doubles the delay before
//! the next one (capped at [`MAX_RECONNECT_INTERVAL`]); the delay returns to
//! the base interval as soon as a tick finds the client connected.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::constants::{DEFAULT_RECONNECT_INTERVAL, MAX_RECONNECT_INTERVAL};
use crate::frame::Headers;

/// Settings for [`crate::StompClient::schedule_reconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Delay between checks.
    pub interval: Duration,
    /// CONNECT headers used when reopening. Empty means none.
    pub headers: Headers,
    /// Double the delay after every failed check.
    pub backoff: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            headers: Headers::new(),
            backoff: false,
        }
    }
}

impl ReconnectOptions {
    /// Options checking every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Set the CONNECT headers used when reopening.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Enable exponential backoff.
    #[must_use]
    pub fn backoff(mut self, backoff: bool) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What a supervisor tick found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Client connected; nothing to do.
    Up,
    /// Client down; a reopen was attempted.
    Down,
    /// Client dropped; the supervisor stops.
    Gone,
}

/// Delay policy between supervisor ticks.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    base: Duration,
    current: Duration,
    backoff: bool,
}

impl ReconnectPolicy {
    pub(crate) fn new(base: Duration, backoff: bool) -> Self {
        Self {
            base,
            current: base,
            backoff,
        }
    }

    /// Delay before the first tick.
    pub(crate) fn initial_delay(&self) -> Duration {
        self.base
    }

    /// Delay before the tick following one that observed `tick`.
    pub(crate) fn next_delay(&mut self, tick: Tick) -> Duration {
        match tick {
            Tick::Down if self.backoff => {
                let cap = MAX_RECONNECT_INTERVAL.max(self.base);
                self.current = self.current.saturating_mul(2).min(cap);
            }
            Tick::Down | Tick::Gone => {}
            Tick::Up => self.current = self.base,
        }
        self.current
    }
}

/// Owned handle to a spawned task. Dropping it aborts the task.
#[derive(Debug)]
pub(crate) struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn a supervisor calling `tick` with the reopen headers until it
/// reports [`Tick::Gone`] or the handle is dropped.
pub(crate) fn spawn_supervisor<F>(options: ReconnectOptions, mut tick: F) -> TaskHandle
where
    F: FnMut(&Headers) -> Tick + Send + 'static,
{
    let mut policy = ReconnectPolicy::new(options.interval, options.backoff);
    let headers = options.headers;

    TaskHandle::spawn(async move {
        let mut delay = policy.initial_delay();
        loop {
            tokio::time::sleep(delay).await;
            let observed = tick(&headers);
            if observed == Tick::Gone {
                log::debug!("[Stomp] Client dropped, reconnect supervisor exiting");
                break;
            }
            delay = policy.next_delay(observed);
            if observed == Tick::Down {
                log::info!("[Stomp] Connection down, reopening (next check in {delay:?})");
            }
        }
    })
}

/// Spawn a task running `action` once after `delay`.
pub(crate) fn spawn_after<F>(delay: Duration, action: F) -> TaskHandle
where
    F: FnOnce() + Send + 'static,
{
    TaskHandle::spawn(async move {
        tokio::time::sleep(delay).await;
        action();
    })
}
