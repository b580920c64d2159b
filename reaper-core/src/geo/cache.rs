use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::sync::Mutex;

use reaper_common::helpers::subnet::normalize_key;
use reaper_common::{ReaperConfig, ReaperError};
use reaper_db_entities::GeoCacheEntry;

/// Read side of the geo cache, used by the attempt processor for country
/// policy and staleness checks. Writes happen only in the enrichment worker.
pub struct GeoCacheService {
    db: Arc<Mutex<DatabaseConnection>>,
    config: Arc<Mutex<ReaperConfig>>,
}

impl GeoCacheService {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, config: Arc<Mutex<ReaperConfig>>) -> Self {
        Self { db, config }
    }

    pub async fn get(&self, ip: &str) -> Result<Option<GeoCacheEntry::Model>, ReaperError> {
        let db = self.db.lock().await;
        Ok(GeoCacheEntry::Entity::find()
            .filter(GeoCacheEntry::Column::Ip.eq(normalize_key(ip)))
            .one(&*db)
            .await?)
    }

    pub async fn is_fresh(&self, entry: &GeoCacheEntry::Model) -> bool {
        let ttl_days = { self.config.lock().await.store.geo.cache_ttl_days };
        entry.last_updated > Utc::now() - chrono::Duration::days(ttl_days as i64)
    }

    /// A lookup is wanted when there is no entry at all, or the entry is
    /// stale and its failure backoff (if any) has elapsed.
    pub async fn needs_enrichment(&self, entry: Option<&GeoCacheEntry::Model>) -> bool {
        let Some(entry) = entry else {
            return true;
        };
        if self.is_fresh(entry).await {
            return false;
        }
        match entry.next_retry_at {
            Some(retry_at) => retry_at <= Utc::now(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sea_orm::Database;

    use super::*;
    use reaper_common::ReaperConfigStore;

    async fn test_service() -> GeoCacheService {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        reaper_db_migrations::migrate_database(&db).await.unwrap();
        let config = Arc::new(Mutex::new(ReaperConfig {
            store: ReaperConfigStore::default(),
            paths_relative_to: PathBuf::from("."),
        }));
        GeoCacheService::new(Arc::new(Mutex::new(db)), config)
    }

    fn entry(age_days: i64, next_retry_offset_mins: Option<i64>) -> GeoCacheEntry::Model {
        let now = Utc::now();
        GeoCacheEntry::Model {
            ip: "203.0.113.5".into(),
            country_code: "NL".into(),
            country: "Netherlands".into(),
            region: String::new(),
            city: String::new(),
            asn: String::new(),
            isp: String::new(),
            lat: None,
            lon: None,
            raw_payload: String::new(),
            last_updated: now - chrono::Duration::days(age_days),
            next_retry_at: next_retry_offset_mins.map(|m| now + chrono::Duration::minutes(m)),
            failure_count: 0,
            partial: false,
        }
    }

    #[tokio::test]
    async fn test_missing_entry_needs_enrichment() {
        let service = test_service().await;
        assert!(service.needs_enrichment(None).await);
    }

    #[tokio::test]
    async fn test_fresh_entry_does_not_need_enrichment() {
        let service = test_service().await;
        assert!(!service.needs_enrichment(Some(&entry(1, None))).await);
    }

    #[tokio::test]
    async fn test_stale_entry_needs_enrichment() {
        // default TTL is 30 days
        let service = test_service().await;
        assert!(service.needs_enrichment(Some(&entry(31, None))).await);
    }

    #[tokio::test]
    async fn test_stale_entry_under_backoff_is_skipped() {
        let service = test_service().await;
        assert!(!service.needs_enrichment(Some(&entry(31, Some(10)))).await);
    }

    #[tokio::test]
    async fn test_stale_entry_with_elapsed_backoff_needs_enrichment() {
        let service = test_service().await;
        assert!(service.needs_enrichment(Some(&entry(31, Some(-10)))).await);
    }
}
