//! Binding between a rate limiter and the code that drives a protected form.
//!
//! A [`RateLimitGuard`] performs the initial check shortly after mounting,
//! publishes a [`GuardSnapshot`] on a watch channel for whoever renders it,
//! runs protected operations through the limiter, and ticks down an active
//! lockout once per second. The countdown is purely local: storage is read
//! again only when it reaches zero.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use cherut_core::{RateLimitResult, RateLimiter, Severity};

/// Guard timing configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Delay before the initial check after mounting.
    pub mount_delay: Duration,
    /// Countdown resolution.
    pub tick: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            mount_delay: Duration::from_millis(100),
            tick: Duration::from_secs(1),
        }
    }
}

/// Everything a form needs to render its rate limit state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSnapshot {
    /// `None` until the initial check has completed.
    pub result: Option<RateLimitResult>,
    pub can_submit: bool,
    pub is_locked: bool,
    pub lockout_time_remaining: u64,
    pub warning_message: String,
    pub severity: Severity,
    pub progress: f64,
}

impl Default for GuardSnapshot {
    fn default() -> Self {
        Self {
            result: None,
            can_submit: true,
            is_locked: false,
            lockout_time_remaining: 0,
            warning_message: String::new(),
            severity: Severity::Normal,
            progress: 0.0,
        }
    }
}

impl GuardSnapshot {
    fn from_result(result: &RateLimitResult, limiter: &RateLimiter) -> Self {
        let presenter = limiter.presenter();
        let is_locked = result.is_locked();
        Self {
            result: Some(result.clone()),
            can_submit: result.allowed && !is_locked,
            is_locked,
            lockout_time_remaining: result.lockout_time_remaining,
            warning_message: presenter.message(result),
            severity: presenter.severity(result),
            progress: presenter.progress(result),
        }
    }
}

/// Error returned by [`RateLimitGuard::handle_attempt`].
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The client is locked out; the operation was not run.
    #[error("{message}")]
    Blocked { message: String, retry_after: Duration },

    /// The operation ran and failed. The failure has been recorded.
    #[error("{0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardError::Blocked { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardError::Operation(e) => Some(e),
            GuardError::Blocked { .. } => None,
        }
    }
}

#[derive(Default)]
struct Tasks {
    mount: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

struct Inner {
    limiter: RateLimiter,
    config: GuardConfig,
    state: watch::Sender<GuardSnapshot>,
    tasks: Mutex<Tasks>,
}

impl Inner {
    async fn refresh(self: &Arc<Self>) -> RateLimitResult {
        let result = self.limiter.check_rate_limit().await;
        self.apply(&result);
        result
    }

    /// Publish a fresh result and start or stop the countdown to match it.
    fn apply(self: &Arc<Self>, result: &RateLimitResult) {
        self.publish(result);
        if result.is_locked() {
            self.start_countdown(result.clone());
        } else {
            self.stop_countdown();
        }
    }

    fn publish(&self, result: &RateLimitResult) {
        self.state
            .send_replace(GuardSnapshot::from_result(result, &self.limiter));
    }

    fn start_countdown(self: &Arc<Self>, mut result: RateLimitResult) {
        let inner = Arc::clone(self);
        let tick = self.config.tick;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                result.lockout_time_remaining = result.lockout_time_remaining.saturating_sub(1);
                if result.lockout_time_remaining == 0 {
                    break;
                }
                inner.publish(&result);
            }

            tracing::debug!(action = %inner.limiter.action(), "Lockout countdown finished, re-checking");
            let fresh = inner.limiter.check_rate_limit().await;
            inner.apply(&fresh);
        });

        if let Some(previous) = self.lock_tasks().countdown.replace(handle) {
            previous.abort();
        }
    }

    fn stop_countdown(&self) {
        if let Some(handle) = self.lock_tasks().countdown.take() {
            handle.abort();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rate limit binding for one protected form.
///
/// Dropping the guard cancels its pending check and countdown.
pub struct RateLimitGuard {
    inner: Arc<Inner>,
}

impl RateLimitGuard {
    /// Attach to a limiter. The initial check runs after `config.mount_delay`.
    ///
    /// Must be called within a tokio runtime.
    pub fn mount(limiter: RateLimiter, config: GuardConfig) -> Self {
        let (state, _) = watch::channel(GuardSnapshot::default());
        let inner = Arc::new(Inner {
            limiter,
            config,
            state,
            tasks: Mutex::new(Tasks::default()),
        });

        let task_inner = Arc::clone(&inner);
        let delay = inner.config.mount_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_inner.refresh().await;
        });
        inner.lock_tasks().mount = Some(handle);

        Self { inner }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change, including countdown ticks.
    pub fn subscribe(&self) -> watch::Receiver<GuardSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn can_submit(&self) -> bool {
        self.inner.state.borrow().can_submit
    }

    pub fn warning_message(&self) -> String {
        self.inner.state.borrow().warning_message.clone()
    }

    pub fn lockout_time_remaining(&self) -> u64 {
        self.inner.state.borrow().lockout_time_remaining
    }

    /// Re-evaluate eligibility against the persisted record.
    pub async fn refresh(&self) -> RateLimitResult {
        self.inner.refresh().await
    }

    /// Run a protected operation through the limiter.
    ///
    /// While locked out the operation is not invoked and
    /// [`GuardError::Blocked`] is returned. Otherwise its outcome is
    /// recorded and its error, if any, handed back unchanged.
    pub async fn handle_attempt<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.inner.refresh().await;
        if !self.can_submit() {
            let mut message = self.inner.limiter.get_message(&result);
            if message.is_empty() {
                message = "Too many attempts. Please try again later.".to_string();
            }
            return Err(GuardError::Blocked {
                message,
                retry_after: Duration::from_secs(result.lockout_time_remaining),
            });
        }

        match operation().await {
            Ok(value) => {
                self.inner.limiter.record_success().await;
                self.inner.refresh().await;
                Ok(value)
            }
            Err(e) => {
                let result = self.inner.limiter.record_failure().await;
                self.inner.apply(&result);
                Err(GuardError::Operation(e))
            }
        }
    }

    /// Detach from the limiter, cancelling timers.
    pub fn unmount(self) {}
}

impl Drop for RateLimitGuard {
    fn drop(&mut self) {
        let mut tasks = self.inner.lock_tasks();
        if let Some(handle) = tasks.mount.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.countdown.take() {
            handle.abort();
        }
    }
}
