use std::sync::Arc;

use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::sync::Mutex;
use tracing::*;

use reaper_common::{PolicyConfig, ReaperConfig, ReaperError};
use reaper_db_entities::Attempt;
use reaper_db_entities::Attempt::Outcome;
use reaper_db_entities::Ban::{BanKind, SourcePolicy};

use crate::bans::BanRegistry;
use crate::counters::CounterStore;
use crate::geo::{EnrichmentQueue, GeoCacheService};
use crate::ingest::NormalizedAttempt;
use crate::state::StatusState;

/// Drives one attempt through the fixed pipeline: status update, persist,
/// allow list, block list, country policy, enrichment, IP threshold, subnet
/// threshold. Each step may stop further processing; the order is part of
/// the contract (allow-listing overrides everything after it).
pub struct AttemptProcessor {
    db: Arc<Mutex<DatabaseConnection>>,
    config: Arc<Mutex<ReaperConfig>>,
    counters: Arc<CounterStore>,
    bans: Arc<BanRegistry>,
    geo_cache: Arc<GeoCacheService>,
    geo_queue: EnrichmentQueue,
    status: Arc<StatusState>,
}

impl AttemptProcessor {
    pub fn new(
        db: Arc<Mutex<DatabaseConnection>>,
        config: Arc<Mutex<ReaperConfig>>,
        counters: Arc<CounterStore>,
        bans: Arc<BanRegistry>,
        geo_cache: Arc<GeoCacheService>,
        geo_queue: EnrichmentQueue,
        status: Arc<StatusState>,
    ) -> Self {
        Self {
            db,
            config,
            counters,
            bans,
            geo_cache,
            geo_queue,
            status,
        }
    }

    pub async fn process(&self, attempt: NormalizedAttempt) -> Result<(), ReaperError> {
        self.status.update_last_event(attempt.timestamp);
        self.persist_attempt(&attempt).await?;

        if attempt.outcome != Outcome::Failure {
            return Ok(());
        }

        let policy = { self.config.lock().await.store.policy.clone() };
        let subnet = attempt.subnet.as_deref();

        if policy.is_allow_listed(&attempt.ip, subnet) {
            debug!(ip = %attempt.ip, "Source is allow-listed");
            return Ok(());
        }

        if policy.is_block_listed(&attempt.ip, subnet) {
            self.bans
                .try_ban(
                    BanKind::Ip,
                    &attempt.ip,
                    "Source is block-listed",
                    policy.ip_ban_duration,
                    SourcePolicy::BlockList,
                )
                .await;
            return Ok(());
        }

        let geo_entry = self.geo_cache.get(&attempt.ip).await?;

        if !policy.allow_countries.is_empty() || !policy.block_countries.is_empty() {
            // No country known yet: skip silently, the policy re-applies on
            // the next failure once enrichment has landed
            if let Some(country) = geo_entry
                .as_ref()
                .map(|e| e.country_code.to_ascii_lowercase())
                .filter(|cc| !cc.is_empty())
            {
                let in_list =
                    |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(&country));
                if !policy.allow_countries.is_empty() && !in_list(&policy.allow_countries) {
                    self.bans
                        .try_ban(
                            BanKind::Ip,
                            &attempt.ip,
                            &format!("Country {} not in allow list", country.to_uppercase()),
                            policy.ip_ban_duration,
                            SourcePolicy::CountryPolicy,
                        )
                        .await;
                    return Ok(());
                }
                if in_list(&policy.block_countries) {
                    self.bans
                        .try_ban(
                            BanKind::Ip,
                            &attempt.ip,
                            &format!("Country {} is blocked", country.to_uppercase()),
                            policy.ip_ban_duration,
                            SourcePolicy::CountryPolicy,
                        )
                        .await;
                    return Ok(());
                }
            }
        }

        {
            let geo_enabled = { self.config.lock().await.store.geo.enable };
            if geo_enabled
                && self
                    .geo_cache
                    .needs_enrichment(geo_entry.as_ref())
                    .await
            {
                self.geo_queue.enqueue(&attempt.ip);
            }
        }

        self.apply_ip_threshold(&attempt, &policy).await;
        self.apply_subnet_threshold(&attempt, &policy).await;
        Ok(())
    }

    async fn persist_attempt(&self, attempt: &NormalizedAttempt) -> Result<(), ReaperError> {
        let db = self.db.lock().await;
        Attempt::ActiveModel {
            timestamp: Set(attempt.timestamp),
            ip: Set(attempt.ip.clone()),
            subnet: Set(attempt.subnet.clone()),
            username: Set(attempt.username.clone()),
            outcome: Set(attempt.outcome),
            logon_type: Set(attempt.logon_type),
            status: Set(attempt.status.clone()),
            event_id: Set(attempt.event_id),
            ..Default::default()
        }
        .insert(&*db)
        .await?;
        Ok(())
    }

    async fn apply_ip_threshold(&self, attempt: &NormalizedAttempt, policy: &PolicyConfig) {
        let count = self
            .counters
            .add_failure(&attempt.ip, attempt.timestamp, policy.ip_window)
            .await;

        if count >= policy.ip_failure_threshold as usize {
            let banned = self
                .bans
                .try_ban(
                    BanKind::Ip,
                    &attempt.ip,
                    &format!(
                        "IP threshold exceeded ({count} failures in {}s)",
                        policy.ip_window.as_secs()
                    ),
                    policy.ip_ban_duration,
                    SourcePolicy::IpThreshold,
                )
                .await;
            if banned {
                warn!(ip = %attempt.ip, count, "IP banned after repeated failures");
            }
        }
    }

    async fn apply_subnet_threshold(&self, attempt: &NormalizedAttempt, policy: &PolicyConfig) {
        let Some(subnet) = attempt.subnet.as_deref() else {
            return;
        };

        let (total, unique) = self
            .counters
            .add_subnet_failure(subnet, &attempt.ip, attempt.timestamp, policy.subnet_window)
            .await;

        // Both conditions required: volume alone from a single source must
        // not ban a whole block
        if total >= policy.subnet_failure_threshold as usize
            && unique >= policy.subnet_min_unique_ips as usize
        {
            let banned = self
                .bans
                .try_ban(
                    BanKind::Subnet,
                    subnet,
                    &format!(
                        "Subnet threshold exceeded ({total} failures from {unique} sources in {}s)",
                        policy.subnet_window.as_secs()
                    ),
                    policy.subnet_ban_duration,
                    SourcePolicy::SubnetThreshold,
                )
                .await;
            if banned {
                warn!(subnet, total, unique, "Subnet banned after distributed failures");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use sea_orm::{Database, EntityTrait, PaginatorTrait};

    use super::*;
    use crate::firewall::{FirewallSync, PacketFilter};
    use reaper_common::ReaperConfigStore;
    use reaper_db_entities::Ban;

    struct NullFilter;

    #[async_trait]
    impl PacketFilter for NullFilter {
        async fn remove_rules(&self, _prefix: &str) -> Result<(), ReaperError> {
            Ok(())
        }
        async fn install_rule(
            &self,
            _name: &str,
            _port: u16,
            _addresses: &[String],
        ) -> Result<(), ReaperError> {
            Ok(())
        }
    }

    struct Fixture {
        processor: AttemptProcessor,
        bans: Arc<BanRegistry>,
        db: Arc<Mutex<DatabaseConnection>>,
    }

    async fn fixture(policy: PolicyConfig) -> Fixture {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        reaper_db_migrations::migrate_database(&db).await.unwrap();
        let db = Arc::new(Mutex::new(db));

        let mut store = ReaperConfigStore::default();
        store.policy = policy;
        store.geo.enable = false;
        let config = Arc::new(Mutex::new(ReaperConfig {
            store,
            paths_relative_to: PathBuf::from("."),
        }));

        let status = Arc::new(StatusState::new());
        let firewall = Arc::new(FirewallSync::new(Box::new(NullFilter), config.clone()));
        let bans = Arc::new(BanRegistry::new(db.clone(), firewall, status.clone()));
        let geo_cache = Arc::new(GeoCacheService::new(db.clone(), config.clone()));
        let (geo_queue, _geo_rx) = EnrichmentQueue::new();

        Fixture {
            processor: AttemptProcessor::new(
                db.clone(),
                config,
                Arc::new(CounterStore::new()),
                bans.clone(),
                geo_cache,
                geo_queue,
                status,
            ),
            bans,
            db,
        }
    }

    fn failure(ip: &str) -> NormalizedAttempt {
        NormalizedAttempt {
            timestamp: Utc::now(),
            ip: ip.to_owned(),
            subnet: reaper_common::helpers::subnet::derive_subnet(ip),
            username: "admin".to_owned(),
            outcome: Outcome::Failure,
            logon_type: 10,
            status: "0xc000006d".to_owned(),
            event_id: 4625,
        }
    }

    #[tokio::test]
    async fn test_ban_fires_at_ip_threshold() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 3,
            ip_window: Duration::from_secs(60),
            ..Default::default()
        })
        .await;

        for _ in 0..2 {
            f.processor.process(failure("203.0.113.5")).await.unwrap();
        }
        assert!(!f.bans.is_banned("203.0.113.5").await);

        f.processor.process(failure("203.0.113.5")).await.unwrap();
        assert!(f.bans.is_banned("203.0.113.5").await);
    }

    #[tokio::test]
    async fn test_success_attempts_are_persisted_but_not_counted() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 1,
            ..Default::default()
        })
        .await;

        let mut attempt = failure("203.0.113.5");
        attempt.outcome = Outcome::Success;
        f.processor.process(attempt).await.unwrap();

        assert!(!f.bans.is_banned("203.0.113.5").await);
        let count = {
            let db = f.db.lock().await;
            Attempt::Entity::find().count(&*db).await.unwrap()
        };
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_allow_list_overrides_thresholds() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 1,
            allow_ips: vec!["203.0.113.5".to_owned()],
            ..Default::default()
        })
        .await;

        for _ in 0..10 {
            f.processor.process(failure("203.0.113.5")).await.unwrap();
        }
        assert!(!f.bans.is_banned("203.0.113.5").await);
    }

    #[tokio::test]
    async fn test_allow_listed_subnet_covers_member_ips() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 1,
            allow_subnets: vec!["203.0.113.0/24".to_owned()],
            ..Default::default()
        })
        .await;

        f.processor.process(failure("203.0.113.99")).await.unwrap();
        assert!(!f.bans.is_banned("203.0.113.99").await);
    }

    #[tokio::test]
    async fn test_block_list_bans_without_threshold() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 100,
            block_ips: vec!["203.0.113.5".to_owned()],
            ..Default::default()
        })
        .await;

        f.processor.process(failure("203.0.113.5")).await.unwrap();
        assert!(f.bans.is_banned("203.0.113.5").await);

        let rows = {
            let db = f.db.lock().await;
            Ban::Entity::find().all(&*db).await.unwrap()
        };
        assert_eq!(rows[0].source_policy, Ban::SourcePolicy::BlockList);
    }

    #[tokio::test]
    async fn test_subnet_ban_requires_unique_sources() {
        let policy = PolicyConfig {
            ip_failure_threshold: 1000,
            subnet_failure_threshold: 20,
            subnet_min_unique_ips: 3,
            subnet_window: Duration::from_secs(300),
            ..Default::default()
        };

        // 25 failures from 2 unique IPs: volume is there, diversity is not
        let f = fixture(policy.clone()).await;
        for i in 0..25 {
            f.processor
                .process(failure(&format!("203.0.113.{}", i % 2 + 1)))
                .await
                .unwrap();
        }
        assert!(!f.bans.is_banned("203.0.113.0/24").await);

        // 25 failures from 4 unique IPs bans the block
        let f = fixture(policy).await;
        for i in 0..25 {
            f.processor
                .process(failure(&format!("203.0.113.{}", i % 4 + 1)))
                .await
                .unwrap();
        }
        assert!(f.bans.is_banned("203.0.113.0/24").await);
    }

    async fn seed_geo_entry(f: &Fixture, ip: &str, country_code: &str) {
        use sea_orm::{ActiveModelTrait, Set};
        use reaper_db_entities::GeoCacheEntry;

        let db = f.db.lock().await;
        GeoCacheEntry::ActiveModel {
            ip: Set(ip.to_owned()),
            country_code: Set(country_code.to_owned()),
            country: Set(String::new()),
            region: Set(String::new()),
            city: Set(String::new()),
            asn: Set(String::new()),
            isp: Set(String::new()),
            lat: Set(None),
            lon: Set(None),
            raw_payload: Set(String::new()),
            last_updated: Set(Utc::now()),
            next_retry_at: Set(None),
            failure_count: Set(0),
            partial: Set(false),
        }
        .insert(&*db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_country_outside_allow_list_is_banned() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 1000,
            allow_countries: vec!["nl".to_owned()],
            ..Default::default()
        })
        .await;
        seed_geo_entry(&f, "203.0.113.5", "RU").await;

        f.processor.process(failure("203.0.113.5")).await.unwrap();
        assert!(f.bans.is_banned("203.0.113.5").await);
    }

    #[tokio::test]
    async fn test_blocked_country_is_banned() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 1000,
            block_countries: vec!["RU".to_owned()],
            ..Default::default()
        })
        .await;
        seed_geo_entry(&f, "203.0.113.5", "ru").await;

        f.processor.process(failure("203.0.113.5")).await.unwrap();
        assert!(f.bans.is_banned("203.0.113.5").await);
    }

    #[tokio::test]
    async fn test_country_policy_skipped_without_cached_entry() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 1000,
            block_countries: vec!["ru".to_owned()],
            ..Default::default()
        })
        .await;

        f.processor.process(failure("203.0.113.5")).await.unwrap();
        assert!(!f.bans.is_banned("203.0.113.5").await);
    }

    #[tokio::test]
    async fn test_repeat_failures_after_ban_do_not_duplicate() {
        let f = fixture(PolicyConfig {
            ip_failure_threshold: 2,
            ..Default::default()
        })
        .await;

        for _ in 0..5 {
            f.processor.process(failure("203.0.113.5")).await.unwrap();
        }

        let count = {
            let db = f.db.lock().await;
            Ban::Entity::find().count(&*db).await.unwrap()
        };
        assert_eq!(count, 1);
    }
}
