use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod ban {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "bans")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub kind: String,
        pub key: String,
        pub created_at: DateTime<Utc>,
        pub expires_at: Option<DateTime<Utc>>,
        pub permanent: bool,
        pub reason: String,
        pub source_policy: String,
        pub last_seen_at: Option<DateTime<Utc>>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00002_create_ban"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(ban::Entity))
            .await?;

        // Active-ban reload on startup and unban both look up by key
        manager
            .create_index(
                Index::create()
                    .table(ban::Entity)
                    .name("idx_bans_key_created_at")
                    .col(Alias::new("key"))
                    .col(Alias::new("created_at"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(ban::Entity)
                    .name("idx_bans_expires_at")
                    .col(Alias::new("expires_at"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .table(ban::Entity)
                    .name("idx_bans_expires_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .table(ban::Entity)
                    .name("idx_bans_key_created_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ban::Entity).to_owned())
            .await
    }
}
