use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema};
use std::path::Path;
use tokio::fs;

use crate::info;

/// 初始化数据库连接
pub async fn init() -> Result<DatabaseConnection, DbErr> {
    if !Path::new("data").exists() {
        let _ = fs::create_dir("data").await;
    }

    // mode=rwc 允许 读/写/创建
    let db_url = "sqlite:data/bot.db?mode=rwc";

    let db = Database::connect(db_url).await?;

    info!(target: "Database", "连接成功: {}", db_url);

    Ok(db)
}

/// 按实体定义建表 (已存在则跳过)
pub async fn ensure_table<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let mut stmt = schema.create_table_from_entity(entity);
    db.execute(builder.build(stmt.if_not_exists())).await?;
    Ok(())
}

pub async fn ensure_index(db: &DatabaseConnection, index: IndexCreateStatement) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    db.execute(builder.build(&index)).await?;
    Ok(())
}

/// 唯一索引
pub fn unique_index<E, C>(name: &str, entity: E, columns: &[C]) -> IndexCreateStatement
where
    E: EntityTrait,
    C: sea_orm::ColumnTrait + Copy + 'static,
{
    let mut idx = Index::create();
    idx.name(name).table(entity).unique().if_not_exists();
    for col in columns {
        idx.col(*col);
    }
    idx.to_owned()
}

#[cfg(test)]
pub(crate) async fn memory_db() -> DatabaseConnection {
    // 内存库每个连接相互独立，只保留一个连接
    let mut opt = sea_orm::ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    Database::connect(opt).await.unwrap()
}
