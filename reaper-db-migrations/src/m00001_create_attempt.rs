use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod attempt {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "attempts")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub timestamp: DateTime<Utc>,
        pub ip: String,
        pub subnet: Option<String>,
        pub username: String,
        pub outcome: String,
        pub logon_type: i32,
        pub status: String,
        pub event_id: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00001_create_attempt"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(attempt::Entity))
            .await?;

        // "failures from this IP inside the window" is the hot query
        manager
            .create_index(
                Index::create()
                    .table(attempt::Entity)
                    .name("idx_attempts_ip_timestamp")
                    .col(Alias::new("ip"))
                    .col(Alias::new("timestamp"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(attempt::Entity)
                    .name("idx_attempts_timestamp")
                    .col(Alias::new("timestamp"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .table(attempt::Entity)
                    .name("idx_attempts_timestamp")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .table(attempt::Entity)
                    .name("idx_attempts_ip_timestamp")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(attempt::Entity).to_owned())
            .await
    }
}
