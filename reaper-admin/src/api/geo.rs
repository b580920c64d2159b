use std::sync::Arc;

use chrono::Utc;
use poem::web::Data;
use poem_openapi::param::Query;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApi};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tokio::sync::Mutex;

use reaper_db_entities::{Attempt, GeoCacheEntry};

use super::TokenSecurityScheme;

pub struct Api;

#[derive(ApiResponse)]
enum GetRecentGeoResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<GeoCacheEntry::Model>>),
}

#[OpenApi]
impl Api {
    /// Geo entries with coordinates for IPs seen in the last 24 hours,
    /// for the client's map view.
    #[oai(path = "/geo/recent", method = "get", operation_id = "get_recent_geo")]
    async fn api_get_recent_geo(
        &self,
        db: Data<&Arc<Mutex<DatabaseConnection>>>,
        limit: Query<Option<u64>>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<GetRecentGeoResponse> {
        let db = db.lock().await;
        let day_ago = Utc::now() - chrono::Duration::hours(24);

        let recent_ips: Vec<String> = Attempt::Entity::find()
            .select_only()
            .column(Attempt::Column::Ip)
            .distinct()
            .filter(Attempt::Column::Timestamp.gte(day_ago))
            .limit(limit.unwrap_or(500))
            .into_tuple()
            .all(&*db)
            .await
            .map_err(poem::error::InternalServerError)?;

        let entries = GeoCacheEntry::Entity::find()
            .filter(GeoCacheEntry::Column::Ip.is_in(recent_ips))
            .filter(GeoCacheEntry::Column::Lat.is_not_null())
            .filter(GeoCacheEntry::Column::Lon.is_not_null())
            .all(&*db)
            .await
            .map_err(poem::error::InternalServerError)?;

        Ok(GetRecentGeoResponse::Ok(Json(entries)))
    }
}
