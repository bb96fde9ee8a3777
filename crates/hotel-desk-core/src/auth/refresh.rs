//! Proactive access-token renewal.
//!
//! `SessionManager` keeps the stored access token fresh by refreshing it a
//! fixed margin before it expires. Each refresh schedules the next one from
//! the expiry of the token it just received, so the schedule follows whatever
//! lifetime the backend hands out.
//!
//! A failed refresh is not retried: the tokens are cleared and a
//! [`SessionEvent::Terminated`] is emitted so the host can send the user back
//! to the login screen.
//!
//! The stored token pair is assumed to be written only by this manager and by
//! the login/logout flows.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::models::RefreshResponse;

use super::clock::{Clock, SystemClock};
use super::storage::{clear_tokens, StorageError, TokenStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use super::token;

/// Refresh this long before the access token expires
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;

/// Session events are rare; a small buffer is plenty
const EVENT_CHANNEL_SIZE: usize = 16;

/// Exchanges a refresh token for a new access token
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, ApiError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No refresh pending
    Idle,
    /// Timer pending
    Armed,
    /// Refresh request in flight
    Refreshing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    MissingRefreshToken,
    RefreshFailed(String),
    StorageFailed(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::MissingRefreshToken => write!(f, "no refresh token available"),
            TerminationReason::RefreshFailed(e) => write!(f, "token refresh failed: {}", e),
            TerminationReason::StorageFailed(e) => write!(f, "could not store refreshed token: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A new access token was stored. `expires_at` is `None` when the new
    /// token could not be decoded, in which case nothing is scheduled.
    Refreshed { expires_at: Option<DateTime<Utc>> },
    /// The session is over and the user must log in again
    Terminated(TerminationReason),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A token refresh is already in flight")]
    RefreshInFlight,

    #[error("Session terminated: {0}")]
    Terminated(TerminationReason),

    #[error("Session was stopped while the refresh was in flight")]
    Cancelled,
}

struct Schedule {
    /// Bumped on every cancel; results from older generations are discarded
    generation: u64,
    phase: Phase,
    task: Option<JoinHandle<()>>,
    fires_at: Option<DateTime<Utc>>,
}

impl Schedule {
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            // An in-flight request is left to finish; the generation check drops its result
            if self.phase == Phase::Armed {
                task.abort();
            }
        }
        self.phase = Phase::Idle;
        self.fires_at = None;
    }
}

/// What to do with the next timer after a successful refresh
#[derive(Clone, Copy)]
enum Continuation {
    /// The refreshing task sleeps again itself
    Inline,
    /// No task is running; spawn one
    Spawn,
}

enum Outcome {
    Rearmed { access: String, delay: Duration },
    Unscheduled { access: String },
    Stale,
    Terminated(TerminationReason),
}

struct Shared<R> {
    storage: Arc<dyn TokenStorage>,
    refresher: Arc<R>,
    clock: Arc<dyn Clock>,
    margin: TimeDelta,
    events: mpsc::Sender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    schedule: Mutex<Schedule>,
}

/// Instant reported by `next_refresh_at`; an immediate refresh has none
fn pending_at(delay: Duration, fires_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (!delay.is_zero()).then_some(fires_at)
}

/// Margin actually used. A zero margin would refresh at the expiry instant
/// itself, so it falls back to the default like an out-of-range one.
fn effective_margin(margin: Duration) -> TimeDelta {
    let default = TimeDelta::seconds(DEFAULT_REFRESH_MARGIN_SECS as i64);
    if margin.is_zero() {
        warn!("Refresh margin must be positive, using the default");
        return default;
    }
    TimeDelta::from_std(margin).unwrap_or(default)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: TokenRefresher> Shared<R> {
    /// Time to wait before refreshing, and the instant that corresponds to
    fn plan(&self, expires_at: DateTime<Utc>) -> (Duration, DateTime<Utc>) {
        let now = self.clock.now();
        let refresh_at = expires_at.checked_sub_signed(self.margin).unwrap_or(expires_at);
        match (refresh_at - now).to_std() {
            Ok(delay) if !delay.is_zero() => (delay, refresh_at),
            _ => (Duration::ZERO, now),
        }
    }

    fn schedule_refresh(self: &Arc<Self>, access_token: &str) {
        let mut schedule = lock(&self.schedule);
        schedule.cancel();

        let expires_at = match token::expiration(access_token) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                // The token is left to expire; the next API call will get a 401
                warn!(error = %e, "Could not get token expiration, refresh not scheduled");
                return;
            }
        };
        let (delay, fires_at) = self.plan(expires_at);
        self.arm(&mut schedule, delay, fires_at);
    }

    fn arm(self: &Arc<Self>, schedule: &mut Schedule, delay: Duration, fires_at: DateTime<Utc>) {
        if delay.is_zero() {
            info!("Token expiring soon, refreshing immediately");
        } else {
            info!(delay_secs = delay.as_secs(), %fires_at, "Token refresh scheduled");
        }
        schedule.phase = Phase::Armed;
        schedule.fires_at = pending_at(delay, fires_at);
        schedule.task = Some(tokio::spawn(Self::run(
            Arc::downgrade(self),
            schedule.generation,
            Instant::now() + delay,
        )));
    }

    /// Timer chain for one generation. Holds only a weak reference while
    /// sleeping so dropping the manager ends the chain.
    async fn run(weak: Weak<Self>, generation: u64, mut wake_at: Instant) {
        loop {
            if wake_at > Instant::now() {
                tokio::time::sleep_until(wake_at).await;
            }
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.begin_refresh(generation) {
                return;
            }
            match shared.perform_refresh(generation, Continuation::Inline).await {
                Outcome::Rearmed { delay, .. } => wake_at = Instant::now() + delay,
                _ => return,
            }
        }
    }

    fn begin_refresh(&self, generation: u64) -> bool {
        let mut schedule = lock(&self.schedule);
        if schedule.generation != generation {
            return false;
        }
        schedule.phase = Phase::Refreshing;
        schedule.fires_at = None;
        true
    }

    async fn perform_refresh(self: &Arc<Self>, generation: u64, next: Continuation) -> Outcome {
        let Some(refresh_token) = self.storage.get(REFRESH_TOKEN_KEY) else {
            info!("No refresh token available");
            let mut schedule = lock(&self.schedule);
            if schedule.generation != generation {
                return Outcome::Stale;
            }
            return self.terminate(&mut schedule, TerminationReason::MissingRefreshToken);
        };

        debug!("Refreshing access token");
        let result = self.refresher.refresh(&refresh_token).await;

        let mut schedule = lock(&self.schedule);
        if schedule.generation != generation {
            debug!("Session stopped during refresh, discarding result");
            return Outcome::Stale;
        }

        let tokens = match result {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return self.terminate(&mut schedule, TerminationReason::RefreshFailed(e.to_string()));
            }
        };
        if let Err(e) = self.persist(&tokens) {
            warn!(error = %e, "Failed to store refreshed token");
            return self.terminate(&mut schedule, TerminationReason::StorageFailed(e.to_string()));
        }
        info!(rotated = tokens.refresh.is_some(), "Token refreshed successfully");

        match token::expiration(&tokens.access) {
            Ok(expires_at) => {
                self.emit(SessionEvent::Refreshed {
                    expires_at: Some(expires_at),
                });
                let (delay, fires_at) = self.plan(expires_at);
                match next {
                    Continuation::Inline => {
                        schedule.phase = Phase::Armed;
                        schedule.fires_at = pending_at(delay, fires_at);
                    }
                    Continuation::Spawn => self.arm(&mut schedule, delay, fires_at),
                }
                Outcome::Rearmed {
                    access: tokens.access,
                    delay,
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not get token expiration, refresh not scheduled");
                schedule.phase = Phase::Idle;
                schedule.fires_at = None;
                schedule.task = None;
                self.emit(SessionEvent::Refreshed { expires_at: None });
                Outcome::Unscheduled {
                    access: tokens.access,
                }
            }
        }
    }

    fn persist(&self, tokens: &RefreshResponse) -> Result<(), StorageError> {
        self.storage.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        if let Some(ref refresh) = tokens.refresh {
            self.storage.set(REFRESH_TOKEN_KEY, refresh)?;
        }
        Ok(())
    }

    /// Tear the session down. Called with the schedule lock held, possibly
    /// from inside the timer task, so the task handle is dropped rather than
    /// aborted.
    fn terminate(&self, schedule: &mut Schedule, reason: TerminationReason) -> Outcome {
        clear_tokens(self.storage.as_ref());
        schedule.generation = schedule.generation.wrapping_add(1);
        schedule.phase = Phase::Idle;
        schedule.fires_at = None;
        schedule.task = None;

        warn!(%reason, "Session terminated");
        self.emit(SessionEvent::Terminated(reason.clone()));
        Outcome::Terminated(reason)
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "Session event not delivered");
        }
    }
}

impl<R> Drop for Shared<R> {
    fn drop(&mut self) {
        let schedule = self.schedule.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = schedule.task.take() {
            task.abort();
        }
    }
}

/// Owns the refresh schedule of one session.
///
/// Clone is cheap and clones share the same schedule. Methods that arm a
/// timer must be called from within a Tokio runtime.
pub struct SessionManager<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for SessionManager<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct SessionManagerBuilder<R> {
    storage: Arc<dyn TokenStorage>,
    refresher: Arc<R>,
    clock: Arc<dyn Clock>,
    margin: Duration,
}

impl<R: TokenRefresher> SessionManagerBuilder<R> {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn build(self) -> SessionManager<R> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let margin = effective_margin(self.margin);

        SessionManager {
            shared: Arc::new(Shared {
                storage: self.storage,
                refresher: self.refresher,
                clock: self.clock,
                margin,
                events: tx,
                events_rx: Mutex::new(Some(rx)),
                schedule: Mutex::new(Schedule {
                    generation: 0,
                    phase: Phase::Idle,
                    task: None,
                    fires_at: None,
                }),
            }),
        }
    }
}

impl<R: TokenRefresher> SessionManager<R> {
    pub fn builder(storage: Arc<dyn TokenStorage>, refresher: Arc<R>) -> SessionManagerBuilder<R> {
        SessionManagerBuilder {
            storage,
            refresher,
            clock: Arc::new(SystemClock),
            margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
        }
    }

    pub fn new(storage: Arc<dyn TokenStorage>, refresher: Arc<R>) -> Self {
        Self::builder(storage, refresher).build()
    }

    /// Arm a refresh for the stored access token, replacing any pending one.
    /// Does nothing when no access token is stored.
    pub fn start(&self) {
        let Some(access_token) = self.shared.storage.get(ACCESS_TOKEN_KEY) else {
            debug!("No access token found, skipping refresh setup");
            return;
        };
        info!("Starting token refresh");
        self.shared.schedule_refresh(&access_token);
    }

    /// Cancel any pending refresh
    pub fn stop(&self) {
        let mut schedule = lock(&self.shared.schedule);
        if schedule.phase != Phase::Idle {
            info!("Stopping token refresh");
        }
        schedule.cancel();
    }

    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Refresh right away, outside the schedule, and re-arm from the new
    /// token. Used when the backend rejects the current access token.
    ///
    /// Returns the new access token.
    pub async fn refresh_now(&self) -> Result<String, SessionError> {
        let generation = {
            let mut schedule = lock(&self.shared.schedule);
            if schedule.phase == Phase::Refreshing {
                return Err(SessionError::RefreshInFlight);
            }
            schedule.cancel();
            schedule.phase = Phase::Refreshing;
            schedule.generation
        };

        match self.shared.perform_refresh(generation, Continuation::Spawn).await {
            Outcome::Rearmed { access, .. } | Outcome::Unscheduled { access } => Ok(access),
            Outcome::Stale => Err(SessionError::Cancelled),
            Outcome::Terminated(reason) => Err(SessionError::Terminated(reason)),
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.schedule).phase
    }

    /// When the pending timer fires. `None` when idle, while refreshing, or
    /// when the refresh is due immediately.
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.shared.schedule).fires_at
    }

    /// Receiver for session events. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        lock(&self.shared.events_rx).take()
    }
}
