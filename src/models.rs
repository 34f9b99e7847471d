use crate::db::{ensure_index, ensure_table, unique_index};
use sea_orm::{DatabaseConnection, DbErr};

pub mod ban_user;
pub mod gallery_image;
pub mod group_member;
pub mod level_user;
pub mod open_cases_log;
pub mod plugin_status;
pub mod user_shop_gold_log;
pub mod word_bank;

/// 创建所有数据表及唯一索引
pub async fn init(db: &DatabaseConnection) -> Result<(), DbErr> {
    ensure_table(db, user_shop_gold_log::Entity).await?;
    ensure_table(db, open_cases_log::Entity).await?;
    ensure_table(db, group_member::Entity).await?;
    ensure_table(db, level_user::Entity).await?;
    ensure_table(db, ban_user::Entity).await?;
    ensure_table(db, plugin_status::Entity).await?;
    ensure_table(db, gallery_image::Entity).await?;
    ensure_table(db, word_bank::Entity).await?;

    ensure_index(
        db,
        unique_index(
            "idx_group_info_users_user_group",
            group_member::Entity,
            &[group_member::Column::UserId, group_member::Column::GroupId],
        ),
    )
    .await?;
    ensure_index(
        db,
        unique_index(
            "idx_gallery_images_pid_url",
            gallery_image::Entity,
            &[gallery_image::Column::Pid, gallery_image::Column::ImgUrl],
        ),
    )
    .await?;
    Ok(())
}

pub fn now_ts() -> i64 {
    chrono::Local::now().timestamp()
}

#[cfg(test)]
pub(crate) async fn test_db() -> DatabaseConnection {
    let db = crate::db::memory_db().await;
    init(&db).await.unwrap();
    db
}
