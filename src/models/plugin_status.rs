use sea_orm::Set;
use sea_orm::entity::prelude::*;

/// 插件全局开关状态
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "plugin_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub module: String,
    pub status: bool,
    /// "all" / "private" / "group"，开启时为空
    pub block_type: String,
    pub error: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn all(db: &DatabaseConnection) -> Result<Vec<Model>, DbErr> {
    Entity::find().all(db).await
}

pub async fn get(db: &DatabaseConnection, module: &str) -> Result<Option<Model>, DbErr> {
    Entity::find_by_id(module.to_string()).one(db).await
}

/// 写入整行状态
pub async fn save(db: &DatabaseConnection, row: &Model) -> Result<(), DbErr> {
    let active = ActiveModel {
        module: Set(row.module.clone()),
        status: Set(row.status),
        block_type: Set(row.block_type.clone()),
        error: Set(row.error),
    };
    if get(db, &row.module).await?.is_some() {
        active.update(db).await?;
    } else {
        active.insert(db).await?;
    }
    Ok(())
}
