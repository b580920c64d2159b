use std::sync::Arc;

use anyhow::{Context, Result};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::sync::{watch, Mutex};
use tracing::*;

use reaper_common::consts::TOKEN_FILE_NAME;
use reaper_common::helpers::fs::{secure_directory, secure_file};
use reaper_common::{PolicyConfig, ReaperConfig, ReaperError, Secret};
use reaper_db_entities::Parameters;

use crate::bans::BanRegistry;
use crate::counters::CounterStore;
use crate::db::connect_to_db;
use crate::expiry::run_expiry_sweeper;
use crate::firewall::{FirewallSync, PacketFilter};
use crate::geo::{EnrichmentQueue, GeoCacheService, GeoEnrichmentWorker};
use crate::ingest::AttemptDispatcher;
use crate::processing::AttemptProcessor;
use crate::state::StatusState;

/// The shared service context. Every component receives the registries it
/// needs from here; there are no process-wide statics.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Mutex<DatabaseConnection>>,
    pub config: Arc<Mutex<ReaperConfig>>,
    pub status: Arc<StatusState>,
    pub counters: Arc<CounterStore>,
    pub firewall: Arc<FirewallSync>,
    pub bans: Arc<BanRegistry>,
    pub geo_cache: Arc<GeoCacheService>,
    pub geo_queue: EnrichmentQueue,
    pub dispatcher: Arc<AttemptDispatcher>,
    pub admin_token: Secret<String>,
}

impl Services {
    /// Connects storage, restores persisted state and spawns the background
    /// loops (filter sync, enrichment worker, expiry sweeper). All loops
    /// stop when `shutdown` flips.
    pub async fn new(
        mut config: ReaperConfig,
        filter: Box<dyn PacketFilter>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        config.store.policy = config.store.policy.clone().clamped();

        let db = connect_to_db(&config).await?;

        // A policy saved through the API wins over the config file
        let parameters = Parameters::Entity::get(&db).await?;
        if let Some(stored) = parameters.policy {
            match serde_json::from_value::<PolicyConfig>(stored) {
                Ok(policy) => config.store.policy = policy.clamped(),
                Err(error) => warn!(?error, "Ignoring unreadable stored policy"),
            }
        }

        let admin_token = load_or_create_admin_token(&config)?;

        let db = Arc::new(Mutex::new(db));
        let config = Arc::new(Mutex::new(config));
        let status = Arc::new(StatusState::new());
        let counters = Arc::new(CounterStore::new());

        let firewall = Arc::new(FirewallSync::new(filter, config.clone()));
        let bans = Arc::new(BanRegistry::new(db.clone(), firewall.clone(), status.clone()));
        bans.initialize().await?;

        let geo_cache = Arc::new(GeoCacheService::new(db.clone(), config.clone()));
        let (geo_queue, geo_receiver) = EnrichmentQueue::new();

        let processor = Arc::new(AttemptProcessor::new(
            db.clone(),
            config.clone(),
            counters.clone(),
            bans.clone(),
            geo_cache.clone(),
            geo_queue.clone(),
            status.clone(),
        ));

        let max_inflight = { config.lock().await.store.ingest.max_inflight };
        let dispatcher = Arc::new(AttemptDispatcher::new(
            processor,
            config.clone(),
            max_inflight,
        ));

        tokio::spawn(firewall.clone().run(shutdown.clone()));
        tokio::spawn(
            GeoEnrichmentWorker::new(db.clone(), config.clone())
                .run(geo_receiver, shutdown.clone()),
        );
        tokio::spawn(run_expiry_sweeper(bans.clone(), shutdown));

        Ok(Self {
            db,
            config,
            status,
            counters,
            firewall,
            bans,
            geo_cache,
            geo_queue,
            dispatcher,
            admin_token,
        })
    }

    /// Clamps, persists and atomically swaps in a replacement policy
    /// snapshot. Readers either see the old policy or the new one, never a
    /// mix.
    pub async fn replace_policy(&self, policy: PolicyConfig) -> Result<PolicyConfig, ReaperError> {
        let policy = policy.clamped();

        {
            let db = self.db.lock().await;
            let parameters = Parameters::Entity::get(&db).await?;
            let mut model: Parameters::ActiveModel = parameters.into();
            model.policy = Set(Some(serde_json::to_value(&policy)?));
            model.update(&*db).await?;
        }

        self.config.lock().await.store.policy = policy.clone();
        info!("Policy replaced");
        Ok(policy)
    }
}

pub fn load_or_create_admin_token(config: &ReaperConfig) -> Result<Secret<String>> {
    let dir = config.paths_relative_to.join("data");
    std::fs::create_dir_all(&dir).context("Could not create data directory")?;
    secure_directory(&dir)?;

    let path = dir.join(TOKEN_FILE_NAME);
    if path.exists() {
        let token = std::fs::read_to_string(&path).context("Could not read API token")?;
        return Ok(Secret::new(token.trim().to_owned()));
    }

    let token = Secret::random();
    std::fs::write(&path, token.expose_secret()).context("Could not write API token")?;
    secure_file(&path)?;
    info!(?path, "Generated a new API token");
    Ok(token)
}
