use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use tracing::*;

use reaper_common::helpers::fs::secure_file;
use reaper_common::{ReaperConfig, ReaperConfigStore};

pub fn load_config(path: &Path, secure: bool) -> Result<ReaperConfig> {
    if secure {
        secure_file(path).context("Could not secure config")?;
    }

    let store: ReaperConfigStore = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("REAPER"))
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    let config = ReaperConfig {
        store,
        paths_relative_to: path
            .parent()
            .context("Config path has no parent directory")?
            .to_path_buf(),
    };

    info!(
        "Using config: {path:?} (firewall: {}, geo: {})",
        config.store.firewall.enable, config.store.geo.enable,
    );
    Ok(config)
}
