use anyhow::Result;

use reaper_core::load_or_create_admin_token;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config, false)?;
    let token = load_or_create_admin_token(&config)?;
    println!("{}", token.expose_secret());
    Ok(())
}
