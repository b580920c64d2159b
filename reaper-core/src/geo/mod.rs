mod cache;
mod queue;
mod worker;

pub use cache::GeoCacheService;
pub use queue::EnrichmentQueue;
pub use worker::GeoEnrichmentWorker;
