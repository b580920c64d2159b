use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::{ListenEndpoint, Secret};

pub(crate) const fn _default_true() -> bool {
    true
}

pub(crate) const fn _default_false() -> bool {
    false
}

#[inline]
pub(crate) fn _default_database_url() -> Secret<String> {
    Secret::new("sqlite:data".to_owned())
}

#[inline]
pub(crate) fn _default_api_listen() -> ListenEndpoint {
    #[allow(clippy::unwrap_used)]
    ListenEndpoint("127.0.0.1:5055".to_socket_addrs().unwrap().next().unwrap())
}

#[inline]
pub(crate) fn _default_ingest_socket_path() -> String {
    "./data/ingest.sock".to_owned()
}

#[inline]
pub(crate) fn _default_monitored_logon_types() -> Vec<i32> {
    vec![3, 10]
}

pub(crate) const fn _default_max_inflight() -> usize {
    64
}

pub(crate) const fn _default_ip_failure_threshold() -> u32 {
    8
}

#[inline]
pub(crate) fn _default_ip_window() -> Duration {
    Duration::from_secs(120)
}

#[inline]
pub(crate) fn _default_ip_ban_duration() -> Duration {
    Duration::from_secs(3600)
}

pub(crate) const fn _default_subnet_failure_threshold() -> u32 {
    20
}

#[inline]
pub(crate) fn _default_subnet_window() -> Duration {
    Duration::from_secs(300)
}

#[inline]
pub(crate) fn _default_subnet_ban_duration() -> Duration {
    Duration::from_secs(7200)
}

pub(crate) const fn _default_subnet_min_unique_ips() -> u32 {
    3
}

#[inline]
pub(crate) fn _default_empty_vec<T>() -> Vec<T> {
    vec![]
}

pub(crate) const fn _default_protected_port() -> u16 {
    3389
}

#[inline]
pub(crate) fn _default_sync_interval() -> Duration {
    Duration::from_secs(5)
}

#[inline]
pub(crate) fn _default_geo_provider_url() -> String {
    "https://ipwhois.io".to_owned()
}

pub(crate) const fn _default_geo_max_requests_per_minute() -> u32 {
    45
}

pub(crate) const fn _default_geo_cache_ttl_days() -> u32 {
    30
}

#[inline]
pub(crate) fn _default_geo_retry_backoff() -> Duration {
    Duration::from_secs(30 * 60)
}

#[inline]
pub(crate) fn _default_retention() -> Duration {
    Duration::from_secs(60 * 60 * 24 * 7)
}
