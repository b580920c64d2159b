mod defaults;

use std::path::PathBuf;
use std::time::Duration;

use defaults::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::helpers::subnet::normalize_key;
use crate::{ListenEndpoint, Secret};

#[derive(Debug, Deserialize, Serialize, Clone, JsonSchema)]
pub struct ApiConfig {
    #[serde(default = "_default_api_listen")]
    pub listen: ListenEndpoint,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            listen: _default_api_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, JsonSchema)]
pub struct IngestConfig {
    #[serde(default = "_default_ingest_socket_path")]
    pub socket_path: String,

    #[serde(default = "_default_monitored_logon_types")]
    pub monitored_logon_types: Vec<i32>,

    /// Upper bound on concurrently processed attempts; a burst of events
    /// queues on the semaphore instead of spawning unbounded work.
    #[serde(default = "_default_max_inflight")]
    pub max_inflight: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            socket_path: _default_ingest_socket_path(),
            monitored_logon_types: _default_monitored_logon_types(),
            max_inflight: _default_max_inflight(),
        }
    }
}

/// The runtime-mutable detection policy. The attempt processor reads a
/// snapshot of this per attempt; `PUT /policy` replaces the whole snapshot
/// atomically after clamping.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, JsonSchema)]
pub struct PolicyConfig {
    #[serde(default = "_default_ip_failure_threshold")]
    pub ip_failure_threshold: u32,

    #[serde(default = "_default_ip_window", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub ip_window: Duration,

    #[serde(default = "_default_ip_ban_duration", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub ip_ban_duration: Duration,

    #[serde(default = "_default_subnet_failure_threshold")]
    pub subnet_failure_threshold: u32,

    #[serde(default = "_default_subnet_window", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub subnet_window: Duration,

    #[serde(default = "_default_subnet_ban_duration", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub subnet_ban_duration: Duration,

    #[serde(default = "_default_subnet_min_unique_ips")]
    pub subnet_min_unique_ips: u32,

    #[serde(default = "_default_empty_vec::<String>")]
    pub allow_ips: Vec<String>,

    #[serde(default = "_default_empty_vec::<String>")]
    pub block_ips: Vec<String>,

    #[serde(default = "_default_empty_vec::<String>")]
    pub allow_subnets: Vec<String>,

    #[serde(default = "_default_empty_vec::<String>")]
    pub block_subnets: Vec<String>,

    #[serde(default = "_default_empty_vec::<String>")]
    pub allow_countries: Vec<String>,

    #[serde(default = "_default_empty_vec::<String>")]
    pub block_countries: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            ip_failure_threshold: _default_ip_failure_threshold(),
            ip_window: _default_ip_window(),
            ip_ban_duration: _default_ip_ban_duration(),
            subnet_failure_threshold: _default_subnet_failure_threshold(),
            subnet_window: _default_subnet_window(),
            subnet_ban_duration: _default_subnet_ban_duration(),
            subnet_min_unique_ips: _default_subnet_min_unique_ips(),
            allow_ips: vec![],
            block_ips: vec![],
            allow_subnets: vec![],
            block_subnets: vec![],
            allow_countries: vec![],
            block_countries: vec![],
        }
    }
}

impl PolicyConfig {
    /// Forces every numeric field into its sane range. Applied at the API
    /// boundary before a replacement snapshot is accepted.
    pub fn clamped(mut self) -> Self {
        self.ip_failure_threshold = self.ip_failure_threshold.clamp(1, 1000);
        self.subnet_failure_threshold = self.subnet_failure_threshold.clamp(1, 1000);
        self.subnet_min_unique_ips = self.subnet_min_unique_ips.clamp(1, 100);
        self.ip_window = clamp_duration(self.ip_window, 10, 3600);
        self.subnet_window = clamp_duration(self.subnet_window, 10, 3600);
        self.ip_ban_duration = clamp_duration(self.ip_ban_duration, 60, 604800);
        self.subnet_ban_duration = clamp_duration(self.subnet_ban_duration, 60, 604800);
        self.allow_ips = normalize_list(self.allow_ips);
        self.block_ips = normalize_list(self.block_ips);
        self.allow_subnets = normalize_list(self.allow_subnets);
        self.block_subnets = normalize_list(self.block_subnets);
        self.allow_countries = normalize_list(self.allow_countries);
        self.block_countries = normalize_list(self.block_countries);
        self
    }

    pub fn is_allow_listed(&self, ip: &str, subnet: Option<&str>) -> bool {
        contains_key(&self.allow_ips, ip)
            || subnet.is_some_and(|s| contains_key(&self.allow_subnets, s))
    }

    pub fn is_block_listed(&self, ip: &str, subnet: Option<&str>) -> bool {
        contains_key(&self.block_ips, ip)
            || subnet.is_some_and(|s| contains_key(&self.block_subnets, s))
    }
}

fn clamp_duration(value: Duration, min_secs: u64, max_secs: u64) -> Duration {
    Duration::from_secs(value.as_secs().clamp(min_secs, max_secs))
}

fn normalize_list(list: Vec<String>) -> Vec<String> {
    list.iter()
        .map(|x| normalize_key(x))
        .filter(|x| !x.is_empty())
        .collect()
}

fn contains_key(list: &[String], key: &str) -> bool {
    let key = normalize_key(key);
    list.iter().any(|x| *x == key)
}

#[derive(Debug, Deserialize, Serialize, Clone, JsonSchema)]
pub struct FirewallConfig {
    #[serde(default = "_default_true")]
    pub enable: bool,

    #[serde(default = "_default_protected_port")]
    pub protected_port: u16,

    #[serde(default = "_default_sync_interval", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub sync_interval: Duration,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        FirewallConfig {
            enable: true,
            protected_port: _default_protected_port(),
            sync_interval: _default_sync_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, JsonSchema)]
pub struct GeoConfig {
    #[serde(default = "_default_true")]
    pub enable: bool,

    #[serde(default = "_default_geo_provider_url")]
    pub provider_url: String,

    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub api_key: Option<Secret<String>>,

    #[serde(default = "_default_geo_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    #[serde(default = "_default_geo_cache_ttl_days")]
    pub cache_ttl_days: u32,

    #[serde(default = "_default_geo_retry_backoff", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub retry_backoff: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            enable: true,
            provider_url: _default_geo_provider_url(),
            api_key: None,
            max_requests_per_minute: _default_geo_max_requests_per_minute(),
            cache_ttl_days: _default_geo_cache_ttl_days(),
            retry_backoff: _default_geo_retry_backoff(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default = "_default_retention", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub retention: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention: _default_retention(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, JsonSchema)]
pub struct ReaperConfigStore {
    #[serde(default = "_default_database_url")]
    #[schemars(with = "String")]
    pub database_url: Secret<String>,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub firewall: FirewallConfig,

    #[serde(default)]
    pub geo: GeoConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Default for ReaperConfigStore {
    fn default() -> Self {
        Self {
            database_url: _default_database_url(),
            api: <_>::default(),
            ingest: <_>::default(),
            policy: <_>::default(),
            firewall: <_>::default(),
            geo: <_>::default(),
            log: <_>::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub store: ReaperConfigStore,
    pub paths_relative_to: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping_ranges() {
        let policy = PolicyConfig {
            ip_failure_threshold: 0,
            ip_window: Duration::from_secs(1),
            ip_ban_duration: Duration::from_secs(10_000_000),
            subnet_failure_threshold: 5000,
            subnet_min_unique_ips: 0,
            ..Default::default()
        }
        .clamped();

        assert_eq!(policy.ip_failure_threshold, 1);
        assert_eq!(policy.ip_window, Duration::from_secs(10));
        assert_eq!(policy.ip_ban_duration, Duration::from_secs(604800));
        assert_eq!(policy.subnet_failure_threshold, 1000);
        assert_eq!(policy.subnet_min_unique_ips, 1);
    }

    #[test]
    fn test_list_matching_is_case_insensitive() {
        let policy = PolicyConfig {
            allow_ips: vec!["2001:DB8::1".into()],
            block_subnets: vec!["203.0.113.0/24".into()],
            ..Default::default()
        }
        .clamped();

        assert!(policy.is_allow_listed("2001:db8::1", None));
        assert!(policy.is_block_listed("203.0.113.9", Some("203.0.113.0/24")));
        assert!(!policy.is_block_listed("203.0.114.9", Some("203.0.114.0/24")));
    }
}
