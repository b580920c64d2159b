use std::sync::Arc;

use chrono::{DateTime, Utc};
use poem::web::Data;
use poem_openapi::param::Query;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApi};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tokio::sync::Mutex;

use reaper_db_entities::Attempt;
use reaper_db_entities::Attempt::Outcome;

use super::pagination::{PaginatedResponse, PaginationParams};
use super::TokenSecurityScheme;

pub struct Api;

#[derive(ApiResponse)]
enum GetAttemptsResponse {
    #[oai(status = 200)]
    Ok(Json<PaginatedResponse<Attempt::Model>>),
}

#[OpenApi]
impl Api {
    #[allow(clippy::too_many_arguments)]
    #[oai(path = "/attempts", method = "get", operation_id = "get_attempts")]
    async fn api_get_attempts(
        &self,
        db: Data<&Arc<Mutex<DatabaseConnection>>>,
        offset: Query<Option<u64>>,
        limit: Query<Option<u64>>,
        ip: Query<Option<String>>,
        username: Query<Option<String>>,
        outcome: Query<Option<String>>,
        status: Query<Option<String>>,
        from: Query<Option<DateTime<Utc>>>,
        to: Query<Option<DateTime<Utc>>>,
        _auth: TokenSecurityScheme,
    ) -> poem::Result<GetAttemptsResponse> {
        let db = db.lock().await;
        let mut q = Attempt::Entity::find().order_by_desc(Attempt::Column::Id);

        if let Some(ref ip) = *ip {
            q = q.filter(Attempt::Column::Ip.contains(ip));
        }
        if let Some(ref username) = *username {
            q = q.filter(Attempt::Column::Username.contains(username));
        }
        if let Some(ref outcome) = *outcome {
            let outcome = if outcome.eq_ignore_ascii_case("success") {
                Outcome::Success
            } else {
                Outcome::Failure
            };
            q = q.filter(Attempt::Column::Outcome.eq(outcome));
        }
        if let Some(ref status) = *status {
            q = q.filter(Attempt::Column::Status.contains(status));
        }
        if let Some(from) = *from {
            q = q.filter(Attempt::Column::Timestamp.gte(from));
        }
        if let Some(to) = *to {
            q = q.filter(Attempt::Column::Timestamp.lte(to));
        }

        Ok(GetAttemptsResponse::Ok(Json(
            PaginatedResponse::new(
                q,
                PaginationParams {
                    offset: *offset,
                    limit: *limit,
                },
                &*db,
                std::convert::identity,
            )
            .await?,
        )))
    }
}
