//! Rail source selection and health tracking.
//!
//! The resolver owns the health of each rail source. It never performs
//! requests or retries itself: the poll scheduler asks it which source to
//! use and reports every outcome back.
//!
//! - Direct is used when a key is configured, it is not degraded, and it is
//!   not under a rate-limit pause.
//! - An auth failure degrades a source for an exponential cooldown
//!   (5 minutes doubling up to 60 by default). A success clears it at once.
//! - A retry-after hint blocks the source until the hint elapses.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::source::{ErrorClass, SourceError, SourceKind};

/// Health of a rail source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
}

/// Emitted whenever a source changes health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEvent {
    pub source: SourceKind,
    pub previous: Health,
    pub current: Health,
    pub reason: String,
}

/// Sender for health change notifications.
pub type HealthSender = broadcast::Sender<HealthEvent>;

/// Cooldown applied to a source after auth failures.
#[derive(Debug, Clone, Copy)]
pub struct CooldownPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5 * 60),
            cap: Duration::from_secs(60 * 60),
        }
    }
}

impl CooldownPolicy {
    /// Cooldown after the given number of consecutive auth failures.
    pub fn cooldown(&self, strikes: u32) -> Duration {
        let doublings = strikes.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << doublings).min(self.cap)
    }
}

/// What the scheduler should do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Use(SourceKind),
    /// No source may be contacted before `until`.
    Blocked { until: Instant },
}

#[derive(Debug, Default)]
struct SourceState {
    degraded_until: Option<Instant>,
    /// Consecutive auth failures.
    strikes: u32,
    not_before: Option<Instant>,
    last_error: Option<SourceError>,
}

impl SourceState {
    fn is_degraded(&self, now: Instant) -> bool {
        self.degraded_until.is_some_and(|t| t > now)
    }

    fn is_paused(&self, now: Instant) -> bool {
        self.not_before.is_some_and(|t| t > now)
    }

    /// When this source can next be used, if it cannot be used now.
    fn available_at(&self, now: Instant) -> Option<Instant> {
        [self.degraded_until, self.not_before]
            .into_iter()
            .flatten()
            .filter(|t| *t > now)
            .max()
    }
}

/// Point-in-time view of one source, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub kind: SourceKind,
    pub configured: bool,
    pub health: Health,
    pub degraded_for: Option<Duration>,
    pub paused_for: Option<Duration>,
    pub last_error: Option<SourceError>,
}

#[derive(Debug, Default)]
struct States {
    direct: SourceState,
    fallback: SourceState,
}

impl States {
    fn get(&self, kind: SourceKind) -> Option<&SourceState> {
        match kind {
            SourceKind::Direct => Some(&self.direct),
            SourceKind::Fallback => Some(&self.fallback),
            SourceKind::Tfl => None,
        }
    }

    fn get_mut(&mut self, kind: SourceKind) -> Option<&mut SourceState> {
        match kind {
            SourceKind::Direct => Some(&mut self.direct),
            SourceKind::Fallback => Some(&mut self.fallback),
            SourceKind::Tfl => None,
        }
    }
}

/// Chooses between the Direct and Fallback rail sources.
///
/// Shared by every station poller; health is per source, not per station.
#[derive(Debug)]
pub struct SourceResolver {
    direct_configured: bool,
    policy: CooldownPolicy,
    states: Mutex<States>,
    events: HealthSender,
}

impl SourceResolver {
    pub fn new(direct_configured: bool, policy: CooldownPolicy) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            direct_configured,
            policy,
            states: Mutex::new(States::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn is_configured(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Direct => self.direct_configured,
            SourceKind::Fallback => true,
            SourceKind::Tfl => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, States> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick the source for this cycle.
    ///
    /// `avoid` names a source that just failed transiently; the other
    /// source is preferred when usable.
    pub fn select(&self, now: Instant, avoid: Option<SourceKind>) -> Selection {
        let mut states = self.lock();
        self.expire_cooldowns(&mut states, now);

        let mut order = [SourceKind::Direct, SourceKind::Fallback];
        if avoid == Some(SourceKind::Direct) {
            order.swap(0, 1);
        }

        let usable = |kind: SourceKind| {
            self.is_configured(kind)
                && states
                    .get(kind)
                    .is_some_and(|s| !s.is_degraded(now) && !s.is_paused(now))
        };
        if let Some(kind) = order.into_iter().find(|k| usable(*k)) {
            return Selection::Use(kind);
        }

        let until = order
            .into_iter()
            .filter(|k| self.is_configured(*k))
            .filter_map(|k| states.get(k).and_then(|s| s.available_at(now)))
            .min()
            .unwrap_or(now + self.policy.base);
        Selection::Blocked { until }
    }

    /// Report a failed request.
    pub fn record_failure(&self, kind: SourceKind, err: &SourceError, now: Instant) {
        let mut states = self.lock();
        let Some(state) = states.get_mut(kind) else {
            return;
        };

        if let Some(hint) = err.retry_after() {
            state.not_before = Some(now + hint);
        }

        let mut event = None;
        // Other stations report the same outage; only the first one counts
        // as a strike.
        if err.class() == ErrorClass::Auth && !state.is_degraded(now) {
            state.strikes += 1;
            let cooldown = self.policy.cooldown(state.strikes);
            state.degraded_until = Some(now + cooldown);
            warn!(
                source = %kind,
                strikes = state.strikes,
                cooldown_secs = cooldown.as_secs(),
                error = %err,
                "source degraded"
            );
            event = Some(HealthEvent {
                source: kind,
                previous: Health::Healthy,
                current: Health::Degraded,
                reason: err.to_string(),
            });
        }

        state.last_error = Some(err.clone());
        drop(states);

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    /// Report a successful request. Clears any degradation immediately.
    pub fn record_success(&self, kind: SourceKind, retry_after: Option<Duration>, now: Instant) {
        let mut states = self.lock();
        let Some(state) = states.get_mut(kind) else {
            return;
        };

        let was_degraded = state.is_degraded(now);
        state.degraded_until = None;
        state.strikes = 0;
        state.last_error = None;
        state.not_before = retry_after.map(|hint| now + hint);
        drop(states);

        if was_degraded {
            info!(source = %kind, "source recovered");
            let _ = self.events.send(HealthEvent {
                source: kind,
                previous: Health::Degraded,
                current: Health::Healthy,
                reason: "request succeeded".to_string(),
            });
        }
    }

    pub fn health(&self, kind: SourceKind, now: Instant) -> Health {
        let states = self.lock();
        match states.get(kind) {
            Some(s) if !s.is_degraded(now) => Health::Healthy,
            Some(_) => Health::Degraded,
            None => Health::Healthy,
        }
    }

    pub fn snapshot(&self, kind: SourceKind, now: Instant) -> SourceSnapshot {
        let states = self.lock();
        let state = states.get(kind);
        let remaining = |t: Option<Instant>| t.filter(|t| *t > now).map(|t| t - now);

        SourceSnapshot {
            kind,
            configured: self.is_configured(kind),
            health: if state.is_some_and(|s| s.is_degraded(now)) {
                Health::Degraded
            } else {
                Health::Healthy
            },
            degraded_for: remaining(state.and_then(|s| s.degraded_until)),
            paused_for: remaining(state.and_then(|s| s.not_before)),
            last_error: state.and_then(|s| s.last_error.clone()),
        }
    }

    /// Announce sources whose cooldown has run out. Strikes are kept so a
    /// repeat failure backs off further.
    fn expire_cooldowns(&self, states: &mut States, now: Instant) {
        for kind in [SourceKind::Direct, SourceKind::Fallback] {
            let Some(state) = states.get_mut(kind) else {
                continue;
            };
            if state.degraded_until.is_some_and(|t| t <= now) {
                state.degraded_until = None;
                info!(source = %kind, "source cooldown elapsed");
                let _ = self.events.send(HealthEvent {
                    source: kind,
                    previous: Health::Degraded,
                    current: Health::Healthy,
                    reason: "cooldown elapsed".to_string(),
                });
            }
        }
    }
}
