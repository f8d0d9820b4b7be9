//! Session expiry computation.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Idle timeout applied when no expiry policy is configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Max-lifetime and idle-timeout policies.
///
/// At least one policy must be set. When both are set the session expires at
/// whichever instant comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    max_lifetime: Option<TimeDelta>,
    idle_timeout: Option<TimeDelta>,
}

fn to_delta(name: &str, d: Option<Duration>) -> SessionResult<Option<TimeDelta>> {
    match d {
        None => Ok(None),
        Some(d) if d.is_zero() => Ok(None),
        Some(d) => TimeDelta::from_std(d)
            .ok()
            .filter(|delta| Utc::now().checked_add_signed(*delta).is_some())
            .map(Some)
            .ok_or_else(|| SessionError::Config(format!("{} is out of range", name))),
    }
}

impl ExpiryPolicy {
    /// Build a policy. Zero durations count as unset.
    pub fn new(max_lifetime: Option<Duration>, idle_timeout: Option<Duration>) -> SessionResult<Self> {
        let max_lifetime = to_delta("max lifetime", max_lifetime)?;
        let idle_timeout = to_delta("idle timeout", idle_timeout)?;

        if max_lifetime.is_none() && idle_timeout.is_none() {
            return Err(SessionError::Config(
                "at least one of max lifetime or idle timeout must be set".into(),
            ));
        }

        Ok(Self {
            max_lifetime,
            idle_timeout,
        })
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime.and_then(|d| d.to_std().ok())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.and_then(|d| d.to_std().ok())
    }

    pub fn has_idle_timeout(&self) -> bool {
        self.idle_timeout.is_some()
    }

    /// Absolute expiry for a session created at `created_at` and last
    /// persisted at `updated_at`.
    pub fn expires_at(
        &self,
        created_at: DateTime<Utc>,
        updated_at: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let by_lifetime = self.max_lifetime.map(|d| saturating_add(created_at, d));
        let by_idle = self
            .idle_timeout
            .map(|d| saturating_add(updated_at.unwrap_or(created_at), d));

        match (by_lifetime, by_idle) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            // construction guarantees one policy
            (None, None) => created_at,
        }
    }
}

fn saturating_add(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            max_lifetime: None,
            idle_timeout: TimeDelta::from_std(DEFAULT_IDLE_TIMEOUT).ok(),
        }
    }
}
