use anyhow::Result;
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config, false)?;
    if config.store.geo.enable && config.store.geo.provider_url.is_empty() {
        anyhow::bail!("geo.provider_url must be set when geo enrichment is enabled");
    }
    info!("No problems found");
    Ok(())
}
