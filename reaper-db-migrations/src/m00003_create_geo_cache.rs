use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod geo_cache_entry {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "geo_cache")]
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
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00003_create_geo_cache"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(geo_cache_entry::Entity))
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(geo_cache_entry::Entity)
                    .name("idx_geo_cache_last_updated")
                    .col(Alias::new("last_updated"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .table(geo_cache_entry::Entity)
                    .name("idx_geo_cache_last_updated")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(geo_cache_entry::Entity).to_owned())
            .await
    }
}
