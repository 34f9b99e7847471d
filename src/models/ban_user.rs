use sea_orm::Set;
use sea_orm::entity::prelude::*;

/// 被 Bot 拉黑的用户
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ban_users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    pub ban_level: i32,
    pub ban_time: i64,
    /// 秒，-1 表示永久
    pub duration: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 剩余秒数，永久封禁返回 -1
    pub fn remaining(&self, now: i64) -> i64 {
        if self.duration < 0 {
            return -1;
        }
        (self.ban_time + self.duration - now).max(0)
    }
}

pub async fn ban(
    db: &DatabaseConnection,
    user_id: i64,
    ban_level: i32,
    duration: i64,
) -> Result<(), DbErr> {
    let now = super::now_ts();
    let active = ActiveModel {
        user_id: Set(user_id),
        ban_level: Set(ban_level),
        ban_time: Set(now),
        duration: Set(duration),
    };
    if Entity::find_by_id(user_id).one(db).await?.is_some() {
        active.update(db).await?;
    } else {
        active.insert(db).await?;
    }
    Ok(())
}

pub async fn unban(db: &DatabaseConnection, user_id: i64) -> Result<bool, DbErr> {
    let res = Entity::delete_by_id(user_id).exec(db).await?;
    Ok(res.rows_affected > 0)
}

/// 是否处于封禁中，过期记录顺带清除
pub async fn is_banned(db: &DatabaseConnection, user_id: i64) -> Result<bool, DbErr> {
    let Some(row) = Entity::find_by_id(user_id).one(db).await? else {
        return Ok(false);
    };
    if row.remaining(super::now_ts()) == 0 {
        unban(db, user_id).await?;
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    #[tokio::test]
    async fn ban_and_expire() {
        let db = test_db().await;
        ban(&db, 1, 9, 60).await.unwrap();
        assert!(is_banned(&db, 1).await.unwrap());

        // 时长为 0 的封禁立即过期
        ban(&db, 2, 9, 0).await.unwrap();
        assert!(!is_banned(&db, 2).await.unwrap());
        assert!(Entity::find_by_id(2).one(&db).await.unwrap().is_none());

        ban(&db, 3, 9, -1).await.unwrap();
        assert!(is_banned(&db, 3).await.unwrap());
        assert!(unban(&db, 3).await.unwrap());
    }

    #[test]
    fn remaining_seconds() {
        let row = Model {
            user_id: 1,
            ban_level: 5,
            ban_time: 100,
            duration: 60,
        };
        assert_eq!(row.remaining(130), 30);
        assert_eq!(row.remaining(200), 0);
    }
}
