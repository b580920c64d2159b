use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::*;

use reaper_common::consts::PLACEHOLDER_IP;
use reaper_common::helpers::subnet::derive_subnet;
use reaper_common::ReaperConfig;
use reaper_db_entities::Attempt::Outcome;

use crate::processing::AttemptProcessor;

/// One event as produced by the external event source, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttemptEvent {
    pub ip: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    pub logon_type: i32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sub_status: Option<String>,
    #[serde(default)]
    pub event_id: Option<i64>,
}

/// A validated attempt ready for the processing pipeline.
#[derive(Debug, Clone)]
pub struct NormalizedAttempt {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub subnet: Option<String>,
    pub username: String,
    pub outcome: Outcome,
    pub logon_type: i32,
    pub status: String,
    pub event_id: i64,
}

/// Validates a raw event against the monitored logon types and the
/// IP-presence rules. Accepted events are stamped with processing time,
/// which keeps per-key counter timestamps non-decreasing regardless of
/// source-side clock skew.
pub fn normalize_event(
    raw: &RawAttemptEvent,
    monitored_logon_types: &[i32],
) -> Option<NormalizedAttempt> {
    if !monitored_logon_types.contains(&raw.logon_type) {
        return None;
    }

    let ip = raw.ip.trim();
    if ip.is_empty() || ip == PLACEHOLDER_IP {
        return None;
    }

    let outcome = match raw.outcome.as_deref() {
        Some(o) if o.eq_ignore_ascii_case("success") => Outcome::Success,
        _ => Outcome::Failure,
    };

    let status = match (&raw.status, &raw.sub_status) {
        (Some(status), Some(sub)) if !sub.is_empty() => format!("{status}:{sub}"),
        (Some(status), _) => status.clone(),
        (None, _) => String::new(),
    };

    Some(NormalizedAttempt {
        timestamp: Utc::now(),
        ip: ip.to_owned(),
        subnet: derive_subnet(ip),
        username: raw.username.clone().unwrap_or_default(),
        outcome,
        logon_type: raw.logon_type,
        status,
        event_id: raw.event_id.unwrap_or_default(),
    })
}

/// Hands accepted events to the processor, one spawned task per event, with
/// a semaphore keeping the number of in-flight runs bounded. `dispatch`
/// waits for a permit, so a burst backs up at the event source instead of
/// spawning unbounded work.
pub struct AttemptDispatcher {
    processor: Arc<AttemptProcessor>,
    config: Arc<Mutex<ReaperConfig>>,
    semaphore: Arc<Semaphore>,
}

impl AttemptDispatcher {
    pub fn new(
        processor: Arc<AttemptProcessor>,
        config: Arc<Mutex<ReaperConfig>>,
        max_inflight: usize,
    ) -> Self {
        Self {
            processor,
            config,
            semaphore: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    /// Returns true if the event passed normalization and was queued.
    pub async fn dispatch(&self, raw: RawAttemptEvent) -> bool {
        let monitored = {
            self.config
                .lock()
                .await
                .store
                .ingest
                .monitored_logon_types
                .clone()
        };
        let Some(attempt) = normalize_event(&raw, &monitored) else {
            debug!(ip = %raw.ip, logon_type = raw.logon_type, "Dropped event at ingestion");
            return false;
        };

        #[allow(clippy::expect_used)]
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("ingest semaphore closed");

        let processor = self.processor.clone();
        tokio::spawn(async move {
            let ip = attempt.ip.clone();
            if let Err(error) = processor.process(attempt).await {
                warn!(%ip, ?error, "Failed to process attempt");
            }
            drop(permit);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ip: &str, logon_type: i32) -> RawAttemptEvent {
        RawAttemptEvent {
            ip: ip.to_owned(),
            username: Some("admin".to_owned()),
            outcome: None,
            logon_type,
            status: Some("0xc000006d".to_owned()),
            sub_status: Some("0xc0000064".to_owned()),
            event_id: Some(4625),
        }
    }

    #[test]
    fn test_unmonitored_logon_type_is_dropped() {
        assert!(normalize_event(&raw("203.0.113.5", 2), &[3, 10]).is_none());
        assert!(normalize_event(&raw("203.0.113.5", 10), &[3, 10]).is_some());
    }

    #[test]
    fn test_placeholder_ip_is_dropped() {
        assert!(normalize_event(&raw("-", 3), &[3, 10]).is_none());
        assert!(normalize_event(&raw("", 3), &[3, 10]).is_none());
        assert!(normalize_event(&raw("  ", 3), &[3, 10]).is_none());
    }

    #[test]
    fn test_defaults_to_failure_outcome() {
        let attempt = normalize_event(&raw("203.0.113.5", 3), &[3, 10]).unwrap();
        assert_eq!(attempt.outcome, Outcome::Failure);

        let mut success = raw("203.0.113.5", 3);
        success.outcome = Some("Success".to_owned());
        let attempt = normalize_event(&success, &[3, 10]).unwrap();
        assert_eq!(attempt.outcome, Outcome::Success);
    }

    #[test]
    fn test_status_combines_sub_status() {
        let attempt = normalize_event(&raw("203.0.113.5", 3), &[3, 10]).unwrap();
        assert_eq!(attempt.status, "0xc000006d:0xc0000064");
    }

    #[test]
    fn test_subnet_derived_for_ipv4_only() {
        let attempt = normalize_event(&raw("203.0.113.5", 3), &[3, 10]).unwrap();
        assert_eq!(attempt.subnet.as_deref(), Some("203.0.113.0/24"));

        let attempt = normalize_event(&raw("2001:db8::1", 3), &[3, 10]).unwrap();
        assert_eq!(attempt.subnet, None);
    }
}
