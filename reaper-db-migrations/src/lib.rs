use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;
use sea_orm_migration::MigrationTrait;

mod m00001_create_attempt;
mod m00002_create_ban;
mod m00003_create_geo_cache;
mod m00004_create_log_entry;
mod m00005_create_audit_log;
mod m00006_parameters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m00001_create_attempt::Migration),
            Box::new(m00002_create_ban::Migration),
            Box::new(m00003_create_geo_cache::Migration),
            Box::new(m00004_create_log_entry::Migration),
            Box::new(m00005_create_audit_log::Migration),
            Box::new(m00006_parameters::Migration),
        ]
    }
}

pub async fn migrate_database(connection: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(connection, None).await
}
