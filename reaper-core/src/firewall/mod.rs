mod nftables;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::*;

use reaper_common::consts::{FIREWALL_RULE_PREFIX, MAX_ADDRESSES_PER_RULE};
use reaper_common::helpers::subnet::normalize_key;
use reaper_common::{ReaperConfig, ReaperError};

pub use nftables::NftablesFilter;

/// The external packet filter, reduced to the two operations the
/// synchronizer needs: drop every rule carrying our name prefix, and
/// install one named rule blocking a batch of source addresses.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    async fn remove_rules(&self, prefix: &str) -> Result<(), ReaperError>;
    async fn install_rule(
        &self,
        name: &str,
        port: u16,
        addresses: &[String],
    ) -> Result<(), ReaperError>;
}

/// Decouples detection from enforcement: ban changes only flip a dirty flag
/// and mutate the blocked set; the loop pushes the full set to the filter on
/// its own schedule. Full rewrite per sync, no incremental diffing.
pub struct FirewallSync {
    filter: Box<dyn PacketFilter>,
    config: Arc<Mutex<ReaperConfig>>,
    blocked: RwLock<HashSet<String>>,
    dirty: AtomicBool,
}

impl FirewallSync {
    pub fn new(filter: Box<dyn PacketFilter>, config: Arc<Mutex<ReaperConfig>>) -> Self {
        Self {
            filter,
            config,
            blocked: RwLock::new(HashSet::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub async fn add_blocked(&self, key: &str) {
        if self.blocked.write().await.insert(normalize_key(key)) {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub async fn remove_blocked(&self, key: &str) {
        if self.blocked.write().await.remove(&normalize_key(key)) {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub async fn blocked_count(&self) -> usize {
        self.blocked.read().await.len()
    }

    pub async fn is_blocked(&self, key: &str) -> bool {
        self.blocked.read().await.contains(&normalize_key(key))
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let interval = { self.config.lock().await.store.firewall.sync_interval };
            tokio::select! {
                _ = tokio::time::sleep(interval) => (),
                _ = shutdown.changed() => break,
            }

            if !self.dirty.swap(false, Ordering::SeqCst) {
                continue;
            }

            let enabled = { self.config.lock().await.store.firewall.enable };
            if !enabled {
                // Stay dirty so a later re-enable picks the change up
                self.dirty.store(true, Ordering::SeqCst);
                debug!("Firewall sync skipped (disabled)");
                continue;
            }

            if let Err(error) = self.sync_rules().await {
                warn!(?error, "Firewall sync failed");
            }
        }
        debug!("Firewall sync loop stopped");
    }

    async fn sync_rules(&self) -> Result<(), ReaperError> {
        let port = { self.config.lock().await.store.firewall.protected_port };

        let mut addresses: Vec<String> = self.blocked.read().await.iter().cloned().collect();
        addresses.sort();

        self.filter.remove_rules(FIREWALL_RULE_PREFIX).await?;

        for (index, chunk) in addresses.chunks(MAX_ADDRESSES_PER_RULE).enumerate() {
            let name = format!("{}-{:03}", FIREWALL_RULE_PREFIX, index + 1);
            self.filter.install_rule(&name, port, chunk).await?;
        }

        info!(count = addresses.len(), "Firewall rules updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use reaper_common::ReaperConfigStore;

    #[derive(Debug, PartialEq)]
    enum Call {
        Remove(String),
        Install(String, u16, usize),
    }

    struct RecordingFilter {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    #[async_trait]
    impl PacketFilter for RecordingFilter {
        async fn remove_rules(&self, prefix: &str) -> Result<(), ReaperError> {
            self.calls.lock().await.push(Call::Remove(prefix.into()));
            Ok(())
        }

        async fn install_rule(
            &self,
            name: &str,
            port: u16,
            addresses: &[String],
        ) -> Result<(), ReaperError> {
            self.calls
                .lock()
                .await
                .push(Call::Install(name.into(), port, addresses.len()));
            Ok(())
        }
    }

    fn test_config() -> Arc<Mutex<ReaperConfig>> {
        Arc::new(Mutex::new(ReaperConfig {
            store: ReaperConfigStore::default(),
            paths_relative_to: PathBuf::from("."),
        }))
    }

    fn sync_with_recorder() -> (FirewallSync, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(vec![]));
        let filter = RecordingFilter {
            calls: calls.clone(),
        };
        let sync = FirewallSync::new(Box::new(filter), test_config());
        (sync, calls)
    }

    #[tokio::test]
    async fn test_chunking_2500_keys_into_3_rules() {
        let (sync, calls) = sync_with_recorder();
        for i in 0..2500 {
            sync.add_blocked(&format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256))
                .await;
        }

        sync.sync_rules().await.unwrap();

        let calls = calls.lock().await;
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], Call::Remove(FIREWALL_RULE_PREFIX.into()));
        assert_eq!(
            calls[1],
            Call::Install(format!("{FIREWALL_RULE_PREFIX}-001"), 3389, 1000)
        );
        assert_eq!(
            calls[2],
            Call::Install(format!("{FIREWALL_RULE_PREFIX}-002"), 3389, 1000)
        );
        assert_eq!(
            calls[3],
            Call::Install(format!("{FIREWALL_RULE_PREFIX}-003"), 3389, 500)
        );
    }

    #[tokio::test]
    async fn test_empty_set_only_removes() {
        let (sync, calls) = sync_with_recorder();
        sync.add_blocked("10.0.0.1").await;
        sync.remove_blocked("10.0.0.1").await;

        sync.sync_rules().await.unwrap();

        let calls = calls.lock().await;
        assert_eq!(*calls, vec![Call::Remove(FIREWALL_RULE_PREFIX.into())]);
    }

    #[tokio::test]
    async fn test_duplicate_add_does_not_grow_set() {
        let (sync, _calls) = sync_with_recorder();
        sync.add_blocked("10.0.0.1").await;
        sync.add_blocked("10.0.0.1").await;
        assert_eq!(sync.blocked_count().await, 1);
    }
}
