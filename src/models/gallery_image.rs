use sea_orm::entity::prelude::*;
use sea_orm::{QueryOrder, Set};

/// 图库图片
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "gallery_images")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// 同一分类 (普通/R18) 内的本地序号，对应文件名
    pub local_id: i32,
    pub title: String,
    pub author: String,
    pub pid: String,
    pub img_hash: String,
    pub img_url: String,
    pub is_r18: bool,
    pub tags: String,
    /// 文件扩展名
    pub format: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.local_id, self.format)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub local_id: i32,
    pub title: String,
    pub author: String,
    pub pid: String,
    pub img_hash: String,
    pub img_url: String,
    pub is_r18: bool,
    pub tags: String,
}

pub async fn create(db: &DatabaseConnection, img: NewImage) -> Result<Model, DbErr> {
    ActiveModel {
        local_id: Set(img.local_id),
        title: Set(img.title),
        author: Set(img.author),
        pid: Set(img.pid),
        img_hash: Set(img.img_hash),
        img_url: Set(img.img_url),
        is_r18: Set(img.is_r18),
        tags: Set(img.tags),
        format: Set("jpg".to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn exists(db: &DatabaseConnection, pid: &str, img_url: &str) -> Result<bool, DbErr> {
    Ok(Entity::find()
        .filter(Column::Pid.eq(pid))
        .filter(Column::ImgUrl.eq(img_url))
        .one(db)
        .await?
        .is_some())
}

/// 按本地序号倒序
pub async fn all_desc(db: &DatabaseConnection) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .order_by_desc(Column::LocalId)
        .all(db)
        .await
}

pub async fn update_hash(
    db: &DatabaseConnection,
    row: Model,
    img_hash: &str,
    format: &str,
) -> Result<Model, DbErr> {
    let mut active: ActiveModel = row.into();
    active.img_hash = Set(img_hash.to_string());
    active.format = Set(format.to_string());
    active.update(db).await
}

/// 删除图片记录，并把同分类中序号最大的记录挪到空出来的序号上。
/// 返回被挪动记录原来的序号。
pub async fn delete_image(
    db: &DatabaseConnection,
    pid: &str,
    img_url: &str,
) -> Result<Option<i32>, DbErr> {
    let Some(row) = Entity::find()
        .filter(Column::Pid.eq(pid))
        .filter(Column::ImgUrl.eq(img_url))
        .one(db)
        .await?
    else {
        return Ok(None);
    };
    let freed = row.local_id;
    let is_r18 = row.is_r18;
    Entity::delete_by_id(row.id).exec(db).await?;

    let last = Entity::find()
        .filter(Column::IsR18.eq(is_r18))
        .order_by_desc(Column::LocalId)
        .one(db)
        .await?;
    match last {
        Some(last) if last.local_id > freed => {
            let max_id = last.local_id;
            let mut active: ActiveModel = last.into();
            active.local_id = Set(freed);
            active.update(db).await?;
            Ok(Some(max_id))
        }
        _ => Ok(None),
    }
}

/// 随机取一张已下载的图片
pub async fn random(db: &DatabaseConnection, is_r18: bool) -> Result<Option<Model>, DbErr> {
    use rand::seq::IndexedRandom;
    let rows = Entity::find()
        .filter(Column::IsR18.eq(is_r18))
        .filter(Column::ImgHash.ne(""))
        .all(db)
        .await?;
    Ok(rows.choose(&mut rand::rng()).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    fn image(local_id: i32, pid: &str, is_r18: bool) -> NewImage {
        NewImage {
            local_id,
            pid: pid.into(),
            img_url: format!("https://i.pximg.net/{}.jpg", pid),
            is_r18,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delete_moves_last_into_gap() {
        let db = test_db().await;
        for i in 0..3 {
            create(&db, image(i, &format!("p{}", i), false)).await.unwrap();
        }
        create(&db, image(0, "r0", true)).await.unwrap();

        let moved = delete_image(&db, "p0", "https://i.pximg.net/p0.jpg")
            .await
            .unwrap();
        assert_eq!(moved, Some(2));

        let rows = all_desc(&db).await.unwrap();
        let normal: Vec<_> = rows.iter().filter(|r| !r.is_r18).collect();
        assert_eq!(normal.len(), 2);
        assert!(normal.iter().any(|r| r.pid == "p2" && r.local_id == 0));
        assert_eq!(rows.iter().filter(|r| r.is_r18).count(), 1);
    }

    #[tokio::test]
    async fn duplicate_pid_url_rejected() {
        let db = test_db().await;
        create(&db, image(0, "p0", false)).await.unwrap();
        assert!(exists(&db, "p0", "https://i.pximg.net/p0.jpg").await.unwrap());
        assert!(create(&db, image(1, "p0", false)).await.is_err());
    }
}
