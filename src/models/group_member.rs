use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, Set};

/// 群成员信息
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "group_info_users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i64,
    pub group_id: i64,
    pub user_name: String,
    pub join_time: i64,
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

pub async fn list_by_group<C: ConnectionTrait>(db: &C, group_id: i64) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::GroupId.eq(group_id))
        .all(db)
        .await
}

pub async fn insert<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    group_id: i64,
    user_name: &str,
    join_time: i64,
) -> Result<Model, DbErr> {
    ActiveModel {
        user_id: Set(user_id),
        group_id: Set(group_id),
        user_name: Set(user_name.to_string()),
        join_time: Set(join_time),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn set_name<C: ConnectionTrait>(db: &C, row: Model, user_name: &str) -> Result<Model, DbErr> {
    let mut active: ActiveModel = row.into();
    active.user_name = Set(user_name.to_string());
    active.update(db).await
}

pub async fn delete_member<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    group_id: i64,
) -> Result<u64, DbErr> {
    let res = Entity::delete_many()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::GroupId.eq(group_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    #[tokio::test]
    async fn crud_roundtrip() {
        let db = test_db().await;
        insert(&db, 1, 100, "甲", 10).await.unwrap();
        insert(&db, 2, 100, "乙", 20).await.unwrap();

        let row = get(&db, 1, 100).await.unwrap().unwrap();
        set_name(&db, row, "甲2").await.unwrap();
        assert_eq!(get(&db, 1, 100).await.unwrap().unwrap().user_name, "甲2");

        // (user_id, group_id) 唯一
        assert!(insert(&db, 1, 100, "重复", 30).await.is_err());

        assert_eq!(delete_member(&db, 2, 100).await.unwrap(), 1);
        assert_eq!(list_by_group(&db, 100).await.unwrap().len(), 1);
    }
}
