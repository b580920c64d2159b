use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use poem::web::Data;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;

use reaper_core::{ActiveBan, Services};
use reaper_db_entities::Ban::{BanKind, SourcePolicy};

use super::{record_audit, TokenSecurityScheme};

pub struct Api;

#[derive(Object)]
struct BanInfo {
    kind: BanKind,
    key: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    permanent: bool,
    reason: String,
    source_policy: SourcePolicy,
}

impl From<ActiveBan> for BanInfo {
    fn from(ban: ActiveBan) -> Self {
        Self {
            kind: ban.kind,
            key: ban.key,
            created_at: ban.created_at,
            expires_at: ban.expires_at,
            permanent: ban.permanent,
            reason: ban.reason,
            source_policy: ban.source_policy,
        }
    }
}

#[derive(Object)]
struct CreateBanRequest {
    key: String,
    #[oai(default = "default_duration_seconds")]
    duration_seconds: u64,
    #[oai(default)]
    permanent: bool,
    reason: Option<String>,
}

fn default_duration_seconds() -> u64 {
    3600
}

#[derive(Object)]
struct UnbanRequest {
    key: String,
}

#[derive(ApiResponse)]
enum GetBansResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<BanInfo>>),
}

#[derive(ApiResponse)]
enum CreateBanResponse {
    #[oai(status = 201)]
    Created,
    #[oai(status = 400)]
    BadRequest,
    #[oai(status = 409)]
    AlreadyBanned,
}

#[derive(ApiResponse)]
enum UnbanResponse {
    #[oai(status = 200)]
    Ok,
    #[oai(status = 400)]
    BadRequest,
    #[oai(status = 404)]
    NotFound,
}

#[OpenApi]
impl Api {
    #[oai(path = "/bans", method = "get", operation_id = "get_bans")]
    async fn api_get_bans(
        &self,
        services: Data<&Services>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<GetBansResponse> {
        let bans = services.bans.active_bans().await;
        Ok(GetBansResponse::Ok(Json(
            bans.into_iter().map(Into::into).collect(),
        )))
    }

    #[oai(path = "/bans", method = "post", operation_id = "create_ban")]
    async fn api_create_ban(
        &self,
        services: Data<&Services>,
        db: Data<&Arc<Mutex<DatabaseConnection>>>,
        body: Json<CreateBanRequest>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<CreateBanResponse> {
        let key = body.key.trim();
        if key.is_empty() {
            return Ok(CreateBanResponse::BadRequest);
        }

        let kind = if key.contains('/') {
            BanKind::Subnet
        } else {
            BanKind::Ip
        };
        let duration = if body.permanent {
            Duration::ZERO
        } else {
            Duration::from_secs(body.duration_seconds.max(1))
        };
        let reason = body
            .reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Manual ban".to_owned());

        let applied = services
            .bans
            .try_ban(kind, key, &reason, duration, SourcePolicy::Manual)
            .await;

        if !applied {
            return Ok(CreateBanResponse::AlreadyBanned);
        }

        {
            let db = db.lock().await;
            record_audit(
                &db,
                "ban",
                key,
                format!("permanent={} reason={reason}", body.permanent),
            )
            .await;
        }
        Ok(CreateBanResponse::Created)
    }

    #[oai(path = "/bans/unban", method = "post", operation_id = "unban")]
    async fn api_unban(
        &self,
        services: Data<&Services>,
        db: Data<&Arc<Mutex<DatabaseConnection>>>,
        body: Json<UnbanRequest>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<UnbanResponse> {
        let key = body.key.trim();
        if key.is_empty() {
            return Ok(UnbanResponse::BadRequest);
        }

        let removed = services
            .bans
            .unban(key)
            .await
            .map_err(poem::error::InternalServerError)?;
        if !removed {
            return Ok(UnbanResponse::NotFound);
        }

        {
            let db = db.lock().await;
            record_audit(&db, "unban", key, String::new()).await;
        }
        Ok(UnbanResponse::Ok)
    }
}
