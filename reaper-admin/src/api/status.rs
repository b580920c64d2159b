use chrono::{DateTime, Utc};
use poem::web::Data;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use reaper_core::Services;

use super::TokenSecurityScheme;

pub struct Api;

#[derive(Object)]
struct StatusResponse {
    service: String,
    version: String,
    last_event: Option<DateTime<Utc>>,
    active_bans: u64,
}

#[derive(ApiResponse)]
enum GetStatusResponse {
    #[oai(status = 200)]
    Ok(Json<StatusResponse>),
}

#[OpenApi]
impl Api {
    #[oai(path = "/status", method = "get", operation_id = "get_status")]
    async fn api_get_status(
        &self,
        services: Data<&Services>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<GetStatusResponse> {
        Ok(GetStatusResponse::Ok(Json(StatusResponse {
            service: "reaper".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            last_event: services.status.last_event(),
            active_bans: services.status.active_bans() as u64,
        })))
    }
}
