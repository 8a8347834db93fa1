use chrono::{DateTime, Utc};

/// Source of real wall-clock samples.
#[cfg_attr(test, mockall::automock)]
pub trait TimeSource {
    /// Current real time.
    fn now(&self) -> DateTime<Utc>;
}

/// The host's system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
