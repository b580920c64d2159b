use chrono::{DateTime, Utc};
use poem_openapi::Object;
use sea_orm::entity::prelude::*;
use serde::Serialize;

/// Cached geolocation metadata for one IP. Written only by the enrichment
/// worker; `next_retry_at` gates re-lookups after provider failures.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "geo_cache")]
#[oai(rename = "GeoCacheEntry")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub ip: String,
    pub country_code: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub asn: String,
    pub isp: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[sea_orm(column_type = "Text")]
    pub raw_payload: String,
    pub last_updated: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub failure_count: i32,
    pub partial: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
