use tokio::sync::mpsc;
use tracing::*;

/// Producer side of the enrichment pipeline. Unbounded on purpose: the
/// attempt processor must never block on enrichment; backpressure is the
/// consumer's problem (the worker drains sequentially under a rate limit).
#[derive(Clone)]
pub struct EnrichmentQueue {
    sender: mpsc::UnboundedSender<String>,
}

impl EnrichmentQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, ip: &str) {
        if self.sender.send(ip.to_owned()).is_err() {
            debug!(ip, "Enrichment queue closed; dropping request");
        }
    }
}
