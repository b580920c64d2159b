use sea_orm::entity::prelude::*;
use sea_orm::query::JsonValue;
use sea_orm::Set;
use uuid::Uuid;

/// Single-row store for the persisted policy override. When present, its
/// JSON replaces the file-config policy section at startup.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "parameters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub policy: Option<JsonValue>,
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Entity {
    pub async fn get(db: &DatabaseConnection) -> Result<Model, DbErr> {
        match Self::find().one(db).await? {
            Some(model) => Ok(model),
            None => {
                ActiveModel {
                    id: Set(Uuid::new_v4()),
                    policy: Set(None),
                }
                .insert(db)
                .await
            }
        }
    }
}
