use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::*;

use reaper_common::helpers::subnet::normalize_key;
use reaper_common::{ReaperConfig, ReaperError};
use reaper_db_entities::GeoCacheEntry;

#[derive(Deserialize)]
struct GeoProviderResponse {
    country_code: Option<String>,
    country: Option<String>,
    region: Option<String>,
    city: Option<String>,
    asn: Option<String>,
    isp: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Evicts request timestamps older than a minute and reports how long to
/// wait before the next request may go out. Pure bookkeeping so the policy
/// is testable without sleeping.
struct RequestRateLimiter {
    log: VecDeque<DateTime<Utc>>,
}

impl RequestRateLimiter {
    fn new() -> Self {
        Self {
            log: VecDeque::new(),
        }
    }

    fn wait_before_request(&mut self, now: DateTime<Utc>, limit: u32) -> Option<Duration> {
        let limit = limit.max(1) as usize;
        while self
            .log
            .front()
            .is_some_and(|t| now - *t > chrono::Duration::seconds(60))
        {
            self.log.pop_front();
        }

        if self.log.len() >= limit {
            let oldest = *self.log.front()?;
            let wait = chrono::Duration::seconds(60) - (now - oldest);
            if wait > chrono::Duration::zero() {
                return wait.to_std().ok();
            }
        }
        None
    }

    fn record_request(&mut self, now: DateTime<Utc>) {
        self.log.push_back(now);
    }
}

/// Single consumer of the enrichment queue. Applies one global rate limit
/// across all lookups and owns every write to the geo cache.
pub struct GeoEnrichmentWorker {
    db: Arc<Mutex<DatabaseConnection>>,
    config: Arc<Mutex<ReaperConfig>>,
    client: reqwest::Client,
    limiter: RequestRateLimiter,
}

impl GeoEnrichmentWorker {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, config: Arc<Mutex<ReaperConfig>>) -> Self {
        Self {
            db,
            config,
            client: reqwest::Client::new(),
            limiter: RequestRateLimiter::new(),
        }
    }

    pub async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let ip = tokio::select! {
                maybe_ip = receiver.recv() => match maybe_ip {
                    Some(ip) => ip,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };

            let enabled = { self.config.lock().await.store.geo.enable };
            if !enabled {
                continue;
            }

            if let Err(error) = self.enrich_ip(&ip, &mut shutdown).await {
                warn!(ip, ?error, "Geo enrichment failed");
            }
        }
        debug!("Geo enrichment worker stopped");
    }

    async fn enrich_ip(
        &mut self,
        ip: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ReaperError> {
        let (limit, url) = {
            let config = self.config.lock().await;
            let geo = &config.store.geo;
            let mut url = format!("{}/{}", geo.provider_url.trim_end_matches('/'), ip);
            if let Some(key) = &geo.api_key {
                url.push_str("?key=");
                url.push_str(key.expose_secret());
            }
            (geo.max_requests_per_minute, url)
        };

        if let Some(wait) = self.limiter.wait_before_request(Utc::now(), limit) {
            tokio::select! {
                _ = tokio::time::sleep(wait) => (),
                _ = shutdown.changed() => return Ok(()),
            }
        }
        self.limiter.record_request(Utc::now());

        let response = tokio::select! {
            response = self.client.get(&url).send() => response,
            _ = shutdown.changed() => return Ok(()),
        };

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(ip, status = %response.status(), "Geo provider rejected lookup");
                return self.mark_failure(ip).await;
            }
            Err(error) => {
                debug!(ip, ?error, "Geo provider unreachable");
                return self.mark_failure(ip).await;
            }
        };

        let raw = response
            .text()
            .await
            .map_err(|e| ReaperError::Other(Box::new(e)))?;
        let Ok(payload) = serde_json::from_str::<GeoProviderResponse>(&raw) else {
            return self.mark_failure(ip).await;
        };

        self.upsert_success(ip, &payload, raw).await
    }

    async fn upsert_success(
        &self,
        ip: &str,
        payload: &GeoProviderResponse,
        raw: String,
    ) -> Result<(), ReaperError> {
        let ip = normalize_key(ip);
        let db = self.db.lock().await;
        let existing = GeoCacheEntry::Entity::find()
            .filter(GeoCacheEntry::Column::Ip.eq(&ip))
            .one(&*db)
            .await?;

        let is_new = existing.is_none();
        let mut model: GeoCacheEntry::ActiveModel = match existing {
            Some(model) => model.into(),
            None => GeoCacheEntry::ActiveModel {
                ip: Set(ip.clone()),
                ..Default::default()
            },
        };

        model.country_code = Set(payload.country_code.clone().unwrap_or_default());
        model.country = Set(payload.country.clone().unwrap_or_default());
        model.region = Set(payload.region.clone().unwrap_or_default());
        model.city = Set(payload.city.clone().unwrap_or_default());
        model.asn = Set(payload.asn.clone().unwrap_or_default());
        model.isp = Set(payload.isp.clone().unwrap_or_default());
        model.lat = Set(payload.latitude);
        model.lon = Set(payload.longitude);
        model.raw_payload = Set(raw);
        model.last_updated = Set(Utc::now());
        model.next_retry_at = Set(None);
        model.failure_count = Set(0);
        model.partial = Set(false);

        if is_new {
            model.insert(&*db).await?;
        } else {
            model.update(&*db).await?;
        }
        debug!(%ip, "Geo cache updated");
        Ok(())
    }

    async fn mark_failure(&self, ip: &str) -> Result<(), ReaperError> {
        let backoff = { self.config.lock().await.store.geo.retry_backoff };
        let ip = normalize_key(ip);
        let db = self.db.lock().await;
        let existing = GeoCacheEntry::Entity::find()
            .filter(GeoCacheEntry::Column::Ip.eq(&ip))
            .one(&*db)
            .await?;

        let next_retry =
            Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());

        match existing {
            Some(entry) => {
                let failure_count = entry.failure_count + 1;
                let mut model: GeoCacheEntry::ActiveModel = entry.into();
                model.failure_count = Set(failure_count);
                model.next_retry_at = Set(Some(next_retry));
                model.update(&*db).await?;
            }
            None => {
                GeoCacheEntry::ActiveModel {
                    ip: Set(ip.clone()),
                    country_code: Set(String::new()),
                    country: Set(String::new()),
                    region: Set(String::new()),
                    city: Set(String::new()),
                    asn: Set(String::new()),
                    isp: Set(String::new()),
                    lat: Set(None),
                    lon: Set(None),
                    raw_payload: Set(String::new()),
                    last_updated: Set(Utc::now()),
                    next_retry_at: Set(Some(next_retry)),
                    failure_count: Set(1),
                    partial: Set(true),
                }
                .insert(&*db)
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_limiter_allows_under_limit() {
        let mut limiter = RequestRateLimiter::new();
        for i in 0..4 {
            assert!(limiter.wait_before_request(at(i), 5).is_none());
            limiter.record_request(at(i));
        }
    }

    #[test]
    fn test_limiter_waits_at_limit() {
        let mut limiter = RequestRateLimiter::new();
        for i in 0..5 {
            limiter.record_request(at(i));
        }
        // Oldest entry is at t=0 and ages out of the 60s log at t=60
        let wait = limiter.wait_before_request(at(10), 5).unwrap();
        assert_eq!(wait, Duration::from_secs(50));
    }

    #[test]
    fn test_limiter_evicts_old_entries() {
        let mut limiter = RequestRateLimiter::new();
        for i in 0..5 {
            limiter.record_request(at(i));
        }
        assert!(limiter.wait_before_request(at(120), 5).is_none());
    }

    #[test]
    fn test_limiter_treats_zero_limit_as_one() {
        let mut limiter = RequestRateLimiter::new();
        assert!(limiter.wait_before_request(at(0), 0).is_none());
        limiter.record_request(at(0));
        assert!(limiter.wait_before_request(at(1), 0).is_some());
    }

    #[test]
    fn test_provider_payload_parsing() {
        let raw = r#"{
            "country_code": "NL",
            "country": "Netherlands",
            "region": "North Holland",
            "city": "Amsterdam",
            "asn": "AS1103",
            "isp": "SURF",
            "latitude": 52.37,
            "longitude": 4.89,
            "extra_field": true
        }"#;
        let payload: GeoProviderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.country_code.as_deref(), Some("NL"));
        assert_eq!(payload.latitude, Some(52.37));
    }
}
