use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, Set};

/// 群内用户权限等级
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "level_users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i64,
    pub group_id: i64,
    pub user_level: i32,
    /// 为 true 时等级由人工设置，不随群身份自动变化
    pub group_flag: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn get<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    group_id: i64,
) -> Result<Option<Model>, DbErr> {
    Entity::find()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::GroupId.eq(group_id))
        .one(db)
        .await
}

pub async fn get_level<C: ConnectionTrait>(db: &C, user_id: i64, group_id: i64) -> Result<i32, DbErr> {
    Ok(get(db, user_id, group_id)
        .await?
        .map(|u| u.user_level)
        .unwrap_or(0))
}

/// 设置等级，已有记录则更新
pub async fn set_level<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    group_id: i64,
    level: i32,
    group_flag: bool,
) -> Result<(), DbErr> {
    match get(db, user_id, group_id).await? {
        Some(row) => {
            let mut active: ActiveModel = row.into();
            active.user_level = Set(level);
            active.group_flag = Set(group_flag);
            active.update(db).await?;
        }
        None => {
            ActiveModel {
                user_id: Set(user_id),
                group_id: Set(group_id),
                user_level: Set(level),
                group_flag: Set(group_flag),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}

pub async fn check_level<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    group_id: i64,
    level: i32,
) -> Result<bool, DbErr> {
    Ok(get_level(db, user_id, group_id).await? >= level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    #[tokio::test]
    async fn set_then_update_level() {
        let db = test_db().await;
        assert_eq!(get_level(&db, 1, 100).await.unwrap(), 0);

        set_level(&db, 1, 100, 5, false).await.unwrap();
        assert!(check_level(&db, 1, 100, 5).await.unwrap());

        set_level(&db, 1, 100, 9, true).await.unwrap();
        let row = get(&db, 1, 100).await.unwrap().unwrap();
        assert_eq!(row.user_level, 9);
        assert!(row.group_flag);
        assert!(!check_level(&db, 1, 200, 1).await.unwrap());
    }
}
