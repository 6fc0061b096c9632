use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Source of "now" in the studio's local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }
}

/// Always returns the same instant. Used to pin time in tests.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: NaiveDateTime,
}

impl FixedClock {
    pub const fn new(time: NaiveDateTime) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn test_fixed_clock_is_stable() {
        let time = NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = FixedClock::new(time);
        assert_eq!(clock.now(), time);
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_system_clock_follows_zone() {
        let utc = SystemClock::new(chrono_tz::UTC).now();
        let tokyo = SystemClock::new(chrono_tz::Asia::Tokyo).now();
        let diff = (tokyo - utc).num_minutes();
        assert!((539..=541).contains(&diff), "unexpected offset {diff}");
    }
}
