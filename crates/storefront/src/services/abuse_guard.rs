//! Per-identity action limits.
//!
//! A fixed-window counter keyed by `(identity, action)`. The first request
//! for a key opens a window of the configured length; requests are admitted
//! until the count reaches the limit, and the window resets once it expires.
//!
//! The guard is an ordinary value: the server builds one at startup and
//! shares it through [`crate::state::AppState`], and tests build as many
//! isolated guards as they like. Expired windows are removed by a background
//! sweeper started with [`AbuseGuard::spawn_sweeper`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Mutations the guard rate-limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardedAction {
    CheckoutIntent,
    CheckoutProcess,
    TicketCreate,
}

impl GuardedAction {
    /// Stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckoutIntent => "checkout_intent",
            Self::CheckoutProcess => "checkout_process",
            Self::TicketCreate => "ticket_create",
        }
    }
}

/// At most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionLimit {
    pub limit: u32,
    pub window: Duration,
}

impl ActionLimit {
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at: Instant,
}

type WindowKey = (String, GuardedAction);

/// Fixed-window rate limiter for guarded actions.
#[derive(Debug, Default)]
pub struct AbuseGuard {
    windows: Mutex<HashMap<WindowKey, Window>>,
}

impl AbuseGuard {
    /// Create a guard with no recorded requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request and report whether it is within the limit.
    #[must_use]
    pub fn allow(&self, identity: &str, action: GuardedAction, limit: ActionLimit) -> bool {
        self.allow_at(identity, action, limit, Instant::now())
    }

    /// [`Self::allow`] with an explicit clock reading.
    #[must_use]
    pub fn allow_at(
        &self,
        identity: &str,
        action: GuardedAction,
        limit: ActionLimit,
        now: Instant,
    ) -> bool {
        let mut windows = self.lock();
        let key = (identity.to_string(), action);

        match windows.get_mut(&key) {
            Some(window) if now < window.expires_at => {
                if window.count >= limit.limit {
                    debug!(identity, action = action.as_str(), "Abuse guard rejected request");
                    return false;
                }
                window.count += 1;
                true
            }
            _ => {
                windows.insert(
                    key,
                    Window {
                        count: 1,
                        expires_at: now + limit.window,
                    },
                );
                limit.limit > 0
            }
        }
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`Self::sweep`] with an explicit clock reading.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, window| now < window.expires_at);
        before - windows.len()
    }

    /// Number of windows currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Sweep expired windows every `interval` until the handle is shut down
    /// or dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let guard = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = guard.sweep();
                        if removed > 0 {
                            debug!(removed, "Swept expired abuse guard windows");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        SweeperHandle {
            stop: stop_tx,
            task,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, Window>> {
        // Counters stay usable after a panicking holder; worst case one count is lost.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Running sweeper task. Dropping the handle stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Abuse guard sweeper ended abnormally");
        }
    }
}
