use sea_orm::entity::prelude::*;
use sea_orm::{QueryOrder, QuerySelect, Set};

/// 金币使用日志
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_shop_gold_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: String,
    pub group_id: String,
    /// 0: 购买, 1: 使用, 2: 插件
    #[sea_orm(column_name = "type")]
    pub log_type: i32,
    pub name: String,
    pub spend_gold: i32,
    pub num: i32,
    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoldLogType {
    Buy = 0,
    Use = 1,
    Plugin = 2,
}

impl GoldLogType {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Buy),
            1 => Some(Self::Use),
            2 => Some(Self::Plugin),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Buy => "购买",
            Self::Use => "使用",
            Self::Plugin => "插件",
        }
    }
}

pub async fn add(
    db: &DatabaseConnection,
    user_id: &str,
    group_id: &str,
    log_type: GoldLogType,
    name: &str,
    spend_gold: i32,
    num: i32,
) -> Result<Model, DbErr> {
    ActiveModel {
        user_id: Set(user_id.to_string()),
        group_id: Set(group_id.to_string()),
        log_type: Set(log_type as i32),
        name: Set(name.to_string()),
        spend_gold: Set(spend_gold),
        num: Set(num),
        create_time: Set(super::now_ts()),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// 用户在群内最近的金币记录
pub async fn latest(
    db: &DatabaseConnection,
    user_id: &str,
    group_id: &str,
    limit: u64,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::GroupId.eq(group_id))
        .order_by_desc(Column::CreateTime)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await
}
