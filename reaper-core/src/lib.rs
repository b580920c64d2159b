mod bans;
mod counters;
pub mod db;
mod expiry;
pub mod firewall;
pub mod geo;
mod ingest;
pub mod logging;
mod processing;
mod services;
mod state;

pub use bans::{ActiveBan, BanRegistry};
pub use counters::CounterStore;
pub use expiry::run_expiry_sweeper;
pub use ingest::{normalize_event, AttemptDispatcher, NormalizedAttempt, RawAttemptEvent};
pub use processing::AttemptProcessor;
pub use services::{load_or_create_admin_token, Services};
pub use state::StatusState;
