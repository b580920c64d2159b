use std::sync::Arc;

use chrono::Utc;
use poem::web::Data;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect,
};
use tokio::sync::Mutex;

use reaper_db_entities::Attempt;
use reaper_db_entities::Attempt::Outcome;

use super::TokenSecurityScheme;

pub struct Api;

#[derive(Object)]
struct StatsResponse {
    attempts_last_hour: u64,
    attempts_last_day: u64,
    failures_last_day: u64,
    unique_ips_last_day: u64,
}

#[derive(ApiResponse)]
enum GetStatsResponse {
    #[oai(status = 200)]
    Ok(Json<StatsResponse>),
}

#[OpenApi]
impl Api {
    #[oai(path = "/stats", method = "get", operation_id = "get_stats")]
    async fn api_get_stats(
        &self,
        db: Data<&Arc<Mutex<DatabaseConnection>>>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<GetStatsResponse> {
        let db = db.lock().await;
        let now = Utc::now();
        let hour_ago = now - chrono::Duration::hours(1);
        let day_ago = now - chrono::Duration::hours(24);

        let attempts_last_hour = Attempt::Entity::find()
            .filter(Attempt::Column::Timestamp.gte(hour_ago))
            .count(&*db)
            .await
            .map_err(poem::error::InternalServerError)?;

        let attempts_last_day = Attempt::Entity::find()
            .filter(Attempt::Column::Timestamp.gte(day_ago))
            .count(&*db)
            .await
            .map_err(poem::error::InternalServerError)?;

        let failures_last_day = Attempt::Entity::find()
            .filter(Attempt::Column::Timestamp.gte(day_ago))
            .filter(Attempt::Column::Outcome.eq(Outcome::Failure))
            .count(&*db)
            .await
            .map_err(poem::error::InternalServerError)?;

        let unique_ips_last_day = Attempt::Entity::find()
            .select_only()
            .column(Attempt::Column::Ip)
            .distinct()
            .filter(Attempt::Column::Timestamp.gte(day_ago))
            .count(&*db)
            .await
            .map_err(poem::error::InternalServerError)?;

        Ok(GetStatsResponse::Ok(Json(StatsResponse {
            attempts_last_hour,
            attempts_last_day,
            failures_last_day,
            unique_ips_last_day,
        })))
    }
}
