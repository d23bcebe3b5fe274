use chrono::{DateTime, Duration, Utc};
use fieldvisit_core::config::MAX_TICK_SECONDS;

/// Recurring compliance tick driven by host-supplied time.
///
/// Runs only while a visit is active; stopping discards the schedule so no
/// tick fires for time spent paused or closed.
#[derive(Debug, Clone)]
pub struct TickTimer {
    interval: Duration,
    next_due: Option<DateTime<Utc>>,
}

impl TickTimer {
    /// The interval is clamped to `[1, MAX_TICK_SECONDS]`.
    pub fn new(interval_seconds: u64) -> Self {
        let seconds = interval_seconds.clamp(1, MAX_TICK_SECONDS) as i64;
        Self {
            interval: Duration::try_seconds(seconds).unwrap_or_else(|| Duration::days(1)),
            next_due: None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.next_due = Some(self.after(now));
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// True when a tick is due; reschedules from `now` so missed ticks collapse into one.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(self.after(now));
                true
            }
            _ => false,
        }
    }

    /// One interval after `now`, saturating at the latest representable instant.
    fn after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
