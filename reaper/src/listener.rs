use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::*;

use reaper_common::helpers::fs::secure_file;
use reaper_core::{AttemptDispatcher, RawAttemptEvent};

/// Accepts newline-delimited JSON attempt events over a Unix socket. This
/// is the boundary to the OS-specific event producer: whatever watches the
/// auth log pushes normalized records here.
pub struct IngestListener {
    dispatcher: Arc<AttemptDispatcher>,
}

impl IngestListener {
    pub fn new(dispatcher: Arc<AttemptDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn run(
        self,
        socket_path: PathBuf,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Could not bind ingest socket at {socket_path:?}"))?;
        secure_file(&socket_path)?;
        info!(?socket_path, "Listening for attempt events");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let dispatcher = self.dispatcher.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(handle_connection(stream, dispatcher, shutdown));
                        }
                        Err(error) => {
                            warn!(?error, "Failed to accept ingest connection");
                        }
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&socket_path);
        debug!("Ingest listener stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    dispatcher: Arc<AttemptDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawAttemptEvent>(line) {
                    Ok(event) => {
                        dispatcher.dispatch(event).await;
                    }
                    Err(error) => {
                        debug!(?error, "Dropping malformed event line");
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                debug!(?error, "Ingest connection read failed");
                break;
            }
        }
    }
}
