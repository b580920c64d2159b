use poem_openapi::OpenApi;

pub mod attempts;
pub mod bans;
pub mod geo;
pub mod logs;
mod pagination;
pub mod policy;
pub mod stats;
pub mod status;

pub use reaper_common::api::TokenSecurityScheme;

pub fn get() -> impl OpenApi {
    (
        status::Api,
        bans::Api,
        attempts::Api,
        policy::Api,
        stats::Api,
        geo::Api,
        logs::Api,
    )
}

pub(crate) async fn record_audit(
    db: &sea_orm::DatabaseConnection,
    action: &str,
    target: &str,
    details: String,
) {
    use sea_orm::{ActiveModelTrait, Set};

    let entry = reaper_db_entities::AuditLog::ActiveModel {
        timestamp: Set(chrono::Utc::now()),
        actor: Set("api".to_owned()),
        action: Set(action.to_owned()),
        target: Set(target.to_owned()),
        details: Set(details),
        ..Default::default()
    };
    if let Err(error) = entry.insert(db).await {
        tracing::warn!(?error, action, "Failed to write audit log entry");
    }
}
