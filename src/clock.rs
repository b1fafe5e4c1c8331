use std::time::{SystemTime, UNIX_EPOCH};

/// Source of record timestamps.
///
/// Timestamps are advisory: recovery and merge order records by segment
/// position, not by clock value.
pub trait Clock: Send + Sync {
    /// Current unix timestamp in seconds.
    fn now_unix(&self) -> u32;
}

/// Clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as u32)
    }
}

#[cfg(test)]
pub(crate) struct FixedClock(pub u32);

#[cfg(test)]
impl Clock for FixedClock {
    fn now_unix(&self) -> u32 {
        self.0
    }
}
