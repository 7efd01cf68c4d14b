//! Source of batch timestamps.

use chrono::{NaiveDateTime, Utc};
use std::fmt::Debug;

/// Canonical timestamp format; string order matches time order
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub trait Clock: Send + Sync + Debug {
    /// Current UTC time
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Clock frozen at a given time
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct FixedClock {
    time: NaiveDateTime,
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.time
    }
}

pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}
