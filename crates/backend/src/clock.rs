//! Wall-clock abstraction.
//!
//! Status and lease expiry are computed against a [`Clock`] so that tests can
//! move time forward without sleeping.

use std::{fmt::Debug, sync::Mutex, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};

pub trait Clock: Send + Sync + Debug {
  fn now(&self) -> DateTime<Utc>;

  /// `now + ttl`, saturating at the maximum representable instant.
  fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    self.now().checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self { now: Mutex::new(start) }
  }

  pub fn starting_now() -> Self {
    Self::new(Utc::now())
  }

  pub fn advance(&self, by: Duration) {
    let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    clock.advance(Duration::from_secs(90));
    assert_eq!(clock.now(), start + TimeDelta::seconds(90));
    assert_eq!(clock.deadline(Duration::from_secs(10)), start + TimeDelta::seconds(100));
  }

  #[test]
  fn test_deadline_saturates() {
    let clock = ManualClock::starting_now();
    assert_eq!(clock.deadline(Duration::MAX), DateTime::<Utc>::MAX_UTC);
  }
}
