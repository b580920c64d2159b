use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::sync::{Mutex, RwLock};
use tracing::*;

use reaper_common::helpers::subnet::normalize_key;
use reaper_common::ReaperError;
use reaper_db_entities::Ban;
use reaper_db_entities::Ban::{BanKind, SourcePolicy};

use crate::firewall::FirewallSync;
use crate::state::StatusState;

#[derive(Clone, Debug)]
pub struct ActiveBan {
    pub kind: BanKind,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permanent: bool,
    pub reason: String,
    pub source_policy: SourcePolicy,
}

/// Authoritative set of currently active bans. The in-memory map is the
/// source of truth; persisted rows are the history and the recovery source
/// for the next startup.
///
/// Key state machine: unbanned -> active -> (expired | unbanned), with a
/// fresh `active` possible afterwards. The map insert under the write lock
/// is the atomic gate closing the check-then-act race between concurrent
/// ban triggers for the same key.
pub struct BanRegistry {
    db: Arc<Mutex<DatabaseConnection>>,
    firewall: Arc<FirewallSync>,
    status: Arc<StatusState>,
    active: RwLock<HashMap<String, ActiveBan>>,
}

impl BanRegistry {
    pub fn new(
        db: Arc<Mutex<DatabaseConnection>>,
        firewall: Arc<FirewallSync>,
        status: Arc<StatusState>,
    ) -> Self {
        Self {
            db,
            firewall,
            status,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Loads persisted bans that are still in force and seeds the filter
    /// synchronizer with them. Run once at startup.
    pub async fn initialize(&self) -> Result<(), ReaperError> {
        let now = Utc::now();
        let rows = {
            let db = self.db.lock().await;
            Ban::Entity::find()
                .order_by_desc(Ban::Column::CreatedAt)
                .all(&*db)
                .await?
        };

        let mut active = self.active.write().await;
        for row in rows {
            let in_force = row.expires_at.is_none() || row.expires_at.is_some_and(|e| e > now);
            if !in_force {
                continue;
            }
            let key = normalize_key(&row.key);
            // Rows are newest-first; keep the most recent ban per key
            if active.contains_key(&key) {
                continue;
            }
            active.insert(
                key.clone(),
                ActiveBan {
                    kind: row.kind,
                    key: key.clone(),
                    created_at: row.created_at,
                    expires_at: row.expires_at,
                    permanent: row.permanent,
                    reason: row.reason,
                    source_policy: row.source_policy,
                },
            );
            self.firewall.add_blocked(&key).await;
        }

        self.status.set_active_bans(active.len());
        info!(count = active.len(), "Loaded active bans");
        Ok(())
    }

    pub async fn is_banned(&self, key: &str) -> bool {
        self.active.read().await.contains_key(&normalize_key(key))
    }

    /// Bans `key` unless it is already banned. A zero `duration` means a
    /// permanent ban. Returns false (and does nothing) for an already
    /// active key.
    ///
    /// Persistence is best-effort: a failed insert keeps the in-memory ban
    /// and the filter entry, and is reconciled away on the next restart.
    pub async fn try_ban(
        &self,
        kind: BanKind,
        key: &str,
        reason: &str,
        duration: Duration,
        source_policy: SourcePolicy,
    ) -> bool {
        let key = normalize_key(key);
        let now = Utc::now();
        let permanent = duration.is_zero();
        let expires_at = if permanent {
            None
        } else {
            Some(now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()))
        };

        let ban = ActiveBan {
            kind,
            key: key.clone(),
            created_at: now,
            expires_at,
            permanent,
            reason: reason.to_owned(),
            source_policy,
        };

        {
            let mut active = self.active.write().await;
            if active.contains_key(&key) {
                return false;
            }
            active.insert(key.clone(), ban.clone());
            self.status.set_active_bans(active.len());
        }

        if let Err(error) = self.persist_ban(&ban).await {
            warn!(%key, ?error, "Failed to persist ban; keeping it in memory");
        }

        self.firewall.add_blocked(&key).await;
        info!(%key, ?kind, reason, "Banned");
        true
    }

    async fn persist_ban(&self, ban: &ActiveBan) -> Result<(), ReaperError> {
        let db = self.db.lock().await;
        Ban::ActiveModel {
            kind: Set(ban.kind),
            key: Set(ban.key.clone()),
            created_at: Set(ban.created_at),
            expires_at: Set(ban.expires_at),
            permanent: Set(ban.permanent),
            reason: Set(ban.reason.clone()),
            source_policy: Set(ban.source_policy),
            last_seen_at: Set(Some(ban.created_at)),
            ..Default::default()
        }
        .insert(&*db)
        .await?;
        Ok(())
    }

    /// Lifts an active ban. The most recent still-active persisted row gets
    /// its expiry set to now so history shows when the ban ended.
    pub async fn unban(&self, key: &str) -> Result<bool, ReaperError> {
        let key = normalize_key(key);
        let removed = self.active.write().await.remove(&key);
        if removed.is_none() {
            return Ok(false);
        }

        let now = Utc::now();
        {
            let db = self.db.lock().await;
            let row = Ban::Entity::find()
                .filter(Ban::Column::Key.eq(&key))
                .filter(
                    Ban::Column::ExpiresAt
                        .is_null()
                        .or(Ban::Column::ExpiresAt.gt(now)),
                )
                .order_by_desc(Ban::Column::CreatedAt)
                .one(&*db)
                .await?;

            if let Some(row) = row {
                let mut model: Ban::ActiveModel = row.into();
                model.expires_at = Set(Some(now));
                model.permanent = Set(false);
                model.update(&*db).await?;
            }
        }

        self.firewall.remove_blocked(&key).await;
        self.status
            .set_active_bans(self.active.read().await.len());
        info!(%key, "Unbanned");
        Ok(true)
    }

    /// Drops every active ban whose expiry is at or before `now` and
    /// unwinds its filter entry. Returns the number of bans dropped.
    pub async fn expire(&self, now: DateTime<Utc>) -> Result<usize, ReaperError> {
        let due: Vec<String> = {
            let active = self.active.read().await;
            active
                .values()
                .filter(|ban| ban.expires_at.is_some_and(|e| e <= now))
                .map(|ban| ban.key.clone())
                .collect()
        };

        if due.is_empty() {
            return Ok(0);
        }

        {
            let mut active = self.active.write().await;
            for key in &due {
                active.remove(key);
            }
            self.status.set_active_bans(active.len());
        }

        for key in &due {
            self.firewall.remove_blocked(key).await;
        }

        // One batched update covers rows whose expiry never got persisted
        {
            let db = self.db.lock().await;
            Ban::Entity::update_many()
                .col_expr(Ban::Column::ExpiresAt, Expr::value(now))
                .filter(Ban::Column::Key.is_in(due.clone()))
                .filter(Ban::Column::Permanent.eq(false))
                .filter(Ban::Column::ExpiresAt.is_null())
                .exec(&*db)
                .await?;
        }

        info!(count = due.len(), "Expired bans");
        Ok(due.len())
    }

    pub async fn active_bans(&self) -> Vec<ActiveBan> {
        let mut bans: Vec<ActiveBan> = self.active.read().await.values().cloned().collect();
        bans.sort_by(|a, b| a.key.cmp(&b.key));
        bans
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use sea_orm::Database;

    use super::*;
    use crate::firewall::PacketFilter;
    use reaper_common::{ReaperConfig, ReaperConfigStore};

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

    async fn test_registry() -> BanRegistry {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        reaper_db_migrations::migrate_database(&db).await.unwrap();
        let db = Arc::new(Mutex::new(db));
        let config = Arc::new(Mutex::new(ReaperConfig {
            store: ReaperConfigStore::default(),
            paths_relative_to: PathBuf::from("."),
        }));
        let firewall = Arc::new(FirewallSync::new(Box::new(NullFilter), config));
        BanRegistry::new(db, firewall, Arc::new(StatusState::new()))
    }

    async fn ban_rows(registry: &BanRegistry) -> Vec<Ban::Model> {
        let db = registry.db.lock().await;
        Ban::Entity::find().all(&*db).await.unwrap()
    }

    #[tokio::test]
    async fn test_ban_is_idempotent() {
        let registry = test_registry().await;

        let first = registry
            .try_ban(
                BanKind::Ip,
                "203.0.113.5",
                "test",
                Duration::from_secs(3600),
                SourcePolicy::IpThreshold,
            )
            .await;
        let second = registry
            .try_ban(
                BanKind::Ip,
                "203.0.113.5",
                "test again",
                Duration::from_secs(3600),
                SourcePolicy::Manual,
            )
            .await;

        assert!(first);
        assert!(!second);
        assert_eq!(ban_rows(&registry).await.len(), 1);
        assert!(registry.is_banned("203.0.113.5").await);
        assert!(registry.firewall.is_blocked("203.0.113.5").await);
    }

    #[tokio::test]
    async fn test_zero_duration_means_permanent() {
        let registry = test_registry().await;
        registry
            .try_ban(
                BanKind::Ip,
                "203.0.113.5",
                "manual",
                Duration::ZERO,
                SourcePolicy::Manual,
            )
            .await;

        let rows = ban_rows(&registry).await;
        assert!(rows[0].permanent);
        assert!(rows[0].expires_at.is_none());
    }

    #[tokio::test]
    async fn test_unban_updates_row_and_filter() {
        let registry = test_registry().await;
        registry
            .try_ban(
                BanKind::Ip,
                "203.0.113.5",
                "test",
                Duration::from_secs(3600),
                SourcePolicy::Manual,
            )
            .await;

        assert!(registry.unban("203.0.113.5").await.unwrap());
        assert!(!registry.is_banned("203.0.113.5").await);
        assert!(!registry.firewall.is_blocked("203.0.113.5").await);

        let rows = ban_rows(&registry).await;
        assert!(rows[0].expires_at.unwrap() <= Utc::now());

        // second unban is a no-op
        assert!(!registry.unban("203.0.113.5").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_removes_due_and_keeps_permanent() {
        let registry = test_registry().await;
        registry
            .try_ban(
                BanKind::Ip,
                "203.0.113.5",
                "short",
                Duration::from_secs(1),
                SourcePolicy::IpThreshold,
            )
            .await;
        registry
            .try_ban(
                BanKind::Ip,
                "203.0.113.6",
                "permanent",
                Duration::ZERO,
                SourcePolicy::Manual,
            )
            .await;

        let expired = registry
            .expire(Utc::now() + chrono::Duration::seconds(2))
            .await
            .unwrap();

        assert_eq!(expired, 1);
        assert!(!registry.is_banned("203.0.113.5").await);
        assert!(!registry.firewall.is_blocked("203.0.113.5").await);
        assert!(registry.is_banned("203.0.113.6").await);
        assert!(registry.firewall.is_blocked("203.0.113.6").await);
    }

    #[tokio::test]
    async fn test_initialize_restores_unexpired_bans() {
        let registry = test_registry().await;
        let now = Utc::now();
        {
            let db = registry.db.lock().await;
            for (key, expires_at) in [
                ("203.0.113.5", Some(now + chrono::Duration::hours(1))),
                ("203.0.113.6", Some(now - chrono::Duration::hours(1))),
                ("203.0.113.0/24", None),
            ] {
                Ban::ActiveModel {
                    kind: Set(if key.contains('/') {
                        BanKind::Subnet
                    } else {
                        BanKind::Ip
                    }),
                    key: Set(key.to_owned()),
                    created_at: Set(now - chrono::Duration::hours(2)),
                    expires_at: Set(expires_at),
                    permanent: Set(expires_at.is_none()),
                    reason: Set("seed".to_owned()),
                    source_policy: Set(SourcePolicy::Manual),
                    last_seen_at: Set(None),
                    ..Default::default()
                }
                .insert(&*db)
                .await
                .unwrap();
            }
        }

        registry.initialize().await.unwrap();

        assert!(registry.is_banned("203.0.113.5").await);
        assert!(!registry.is_banned("203.0.113.6").await);
        assert!(registry.is_banned("203.0.113.0/24").await);
        assert_eq!(registry.status.active_bans(), 2);
        assert!(registry.firewall.is_blocked("203.0.113.0/24").await);
    }
}
