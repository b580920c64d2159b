use anyhow::Result;
use tokio::sync::watch;
use tracing::*;

use reaper_admin::AdminServer;
use reaper_core::db::cleanup_db;
use reaper_core::firewall::NftablesFilter;
use reaper_core::logging::install_database_logger;
use reaper_core::Services;

use crate::config::load_config;
use crate::listener::IngestListener;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "Reaper");

    let config = load_config(&cli.config, true)?;
    let api_listen = *config.store.api.listen;
    let socket_path = config
        .paths_relative_to
        .join(&config.store.ingest.socket_path);

    let (shutdown_sender, shutdown) = watch::channel(false);

    let services = Services::new(config, Box::new(NftablesFilter::new()), shutdown.clone()).await?;

    install_database_logger(services.db.clone());

    tokio::spawn({
        let services = services.clone();
        async move {
            loop {
                let retention = { services.config.lock().await.store.log.retention };
                let interval = retention / 10;
                match cleanup_db(&mut *services.db.lock().await, &retention).await {
                    Err(error) => error!(?error, "Failed to clean up the database"),
                    Ok(_) => debug!("Database cleaned up, next in {:?}", interval),
                }
                tokio::time::sleep(interval).await;
            }
        }
    });

    let mut ingest_future = tokio::spawn(
        IngestListener::new(services.dispatcher.clone()).run(socket_path, shutdown.clone()),
    );

    let mut admin_future = tokio::spawn(AdminServer::new(&services).run(api_listen));

    if console::user_attended() {
        info!("--------------------------------------------");
        info!("Reaper is now running.");
        info!("Control-plane API on http://{api_listen}");
        info!("--------------------------------------------");
    }

    let mut ingest_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
        _ = wait_for_sigterm() => {
            info!("Terminated, shutting down");
        }
        result = &mut admin_future => {
            error!(?result, "Control-plane API stopped unexpectedly");
        }
        result = &mut ingest_future => {
            ingest_done = true;
            error!(?result, "Ingest listener stopped unexpectedly");
        }
    }

    let _ = shutdown_sender.send(true);

    // Give the listener one tick to observe the signal and remove its socket
    if !ingest_done {
        let _ =
            tokio::time::timeout(std::time::Duration::from_secs(5), &mut ingest_future).await;
    }

    info!("Exiting");
    Ok(())
}

async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(error) => {
            error!(?error, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
