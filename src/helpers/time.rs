use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::settings::{WINDOW_SECONDS_DEFAULT};

/// Tells the current wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by `chrono::Utc::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = shift_secs(*now, secs);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The instant before which a credential of `expires_in` seconds is served,
/// measured from `completed_at`. The result may lie in the past.
pub fn expiry_from(completed_at: DateTime<Utc>, expires_in: i64, window_seconds: u64) -> DateTime<Utc> {
    let window = i64::try_from(window_seconds).unwrap_or(i64::MAX);
    shift_secs(completed_at, expires_in.saturating_sub(window))
}

fn shift_secs(at: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(secs)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(if secs < 0 { DateTime::<Utc>::MIN_UTC } else { DateTime::<Utc>::MAX_UTC })
}

/// Window resolution order: credential level, then settings level, then default.
pub fn get_window_seconds(
    window_seconds_settings: Option<u64>,
    window_seconds_credential: Option<u64>,
) -> u64 {
    window_seconds_credential
        .or(window_seconds_settings)
        .unwrap_or(WINDOW_SECONDS_DEFAULT)
}
