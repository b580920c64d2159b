use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

/// Lightweight shared counters read by the control-plane API. Lock-free so
/// the hot ingestion path never waits on a status reader.
pub struct StatusState {
    last_event_millis: AtomicI64,
    active_bans: AtomicUsize,
}

impl StatusState {
    pub fn new() -> Self {
        Self {
            last_event_millis: AtomicI64::new(0),
            active_bans: AtomicUsize::new(0),
        }
    }

    pub fn update_last_event(&self, time: DateTime<Utc>) {
        self.last_event_millis
            .store(time.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        let millis = self.last_event_millis.load(Ordering::Relaxed);
        if millis == 0 {
            return None;
        }
        DateTime::from_timestamp_millis(millis)
    }

    pub fn set_active_bans(&self, count: usize) {
        self.active_bans.store(count, Ordering::Relaxed);
    }

    pub fn active_bans(&self) -> usize {
        self.active_bans.load(Ordering::Relaxed)
    }
}

impl Default for StatusState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_roundtrip() {
        let state = StatusState::new();
        assert!(state.last_event().is_none());

        let now = Utc::now();
        state.update_last_event(now);
        assert_eq!(
            state.last_event().map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }
}
