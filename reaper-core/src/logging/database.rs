use std::sync::Arc;

use once_cell::sync::OnceCell;
use sea_orm::query::JsonValue;
use sea_orm::{ActiveModelTrait, DatabaseConnection};
use tokio::sync::Mutex;
use tracing::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;
use uuid::Uuid;

use reaper_db_entities::LogEntry;

use super::layer::{RecordValues, ValuesLogLayer};

static LOG_SENDER: OnceCell<tokio::sync::broadcast::Sender<LogEntry::ActiveModel>> =
    OnceCell::new();

pub fn make_database_logger_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let _ = LOG_SENDER.set(tokio::sync::broadcast::channel(1024).0);
    ValuesLogLayer::new(|values| {
        if let Some(sender) = LOG_SENDER.get() {
            let _ = sender.send(values_to_log_entry(values));
        }
    })
}

/// Spawns the writer task draining the layer's channel into the log table.
/// Must run after the layer is installed and the database is up.
pub fn install_database_logger(database: Arc<Mutex<DatabaseConnection>>) {
    tokio::spawn(async move {
        let Some(sender) = LOG_SENDER.get() else {
            return;
        };
        let mut receiver = sender.subscribe();
        loop {
            match receiver.recv().await {
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(dropped)) => {
                    warn!(dropped, "Database logger fell behind; dropped entries");
                }
                Ok(log_entry) => {
                    let database = database.lock().await;
                    if let Err(error) = log_entry.insert(&*database).await {
                        error!(?error, "Failed to store log entry");
                    }
                }
            }
        }
    });
}

fn values_to_log_entry(mut values: RecordValues) -> LogEntry::ActiveModel {
    use sea_orm::ActiveValue::Set;

    let message = values.remove("message").unwrap_or_default();

    LogEntry::ActiveModel {
        id: Set(Uuid::new_v4()),
        text: Set(message),
        values: Set(values
            .into_iter()
            .map(|(k, v)| (k.to_string(), JsonValue::from(v)))
            .collect()),
        timestamp: Set(chrono::Utc::now()),
    }
}
