use chrono::{DateTime, Utc};
use poem_openapi::{Enum, Object};
use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Debug, PartialEq, Eq, Serialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum BanKind {
    #[sea_orm(string_value = "ip")]
    Ip,
    #[sea_orm(string_value = "subnet")]
    Subnet,
}

#[derive(Debug, PartialEq, Eq, Serialize, Clone, Copy, Enum, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum SourcePolicy {
    #[sea_orm(string_value = "manual")]
    Manual,
    #[sea_orm(string_value = "ip_threshold")]
    IpThreshold,
    #[sea_orm(string_value = "subnet_threshold")]
    SubnetThreshold,
    #[sea_orm(string_value = "block_list")]
    BlockList,
    #[sea_orm(string_value = "country_policy")]
    CountryPolicy,
}

/// A block on an IP or subnet key. Rows are historical: expiry and unban set
/// `expires_at` instead of deleting, so past bans stay queryable.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Object)]
#[sea_orm(table_name = "bans")]
#[oai(rename = "Ban")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: BanKind,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permanent: bool,
    pub reason: String,
    pub source_policy: SourcePolicy,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
