use sea_orm::entity::prelude::*;
use sea_orm::{FromQueryResult, QuerySelect, Set};

/// 开箱日志
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "open_cases_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_qq: i64,
    pub group_id: i64,
    pub case_name: String,
    pub name: String,
    pub skin_name: String,
    pub is_stattrak: bool,
    pub abrasion: String,
    pub abrasion_value: f64,
    pub color: String,
    pub price: f64,
    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// 新增开箱记录时使用的数据
#[derive(Debug, Clone, Default)]
pub struct NewCase {
    pub case_name: String,
    pub name: String,
    pub skin_name: String,
    pub is_stattrak: bool,
    pub abrasion: String,
    pub abrasion_value: f64,
    pub color: String,
    pub price: f64,
}

pub async fn add(
    db: &DatabaseConnection,
    user_qq: i64,
    group_id: i64,
    case: NewCase,
) -> Result<Model, DbErr> {
    ActiveModel {
        user_qq: Set(user_qq),
        group_id: Set(group_id),
        case_name: Set(case.case_name),
        name: Set(case.name),
        skin_name: Set(case.skin_name),
        is_stattrak: Set(case.is_stattrak),
        abrasion: Set(case.abrasion),
        abrasion_value: Set(case.abrasion_value),
        color: Set(case.color),
        price: Set(case.price),
        create_time: Set(super::now_ts()),
        ..Default::default()
    }
    .insert(db)
    .await
}

#[derive(Debug, Default, FromQueryResult)]
pub struct CaseStats {
    pub count: i64,
    pub total_price: Option<f64>,
}

/// 用户在群内的开箱次数与总价值
pub async fn stats(db: &DatabaseConnection, user_qq: i64, group_id: i64) -> Result<CaseStats, DbErr> {
    let stats = Entity::find()
        .select_only()
        .column_as(Column::Id.count(), "count")
        .column_as(Column::Price.sum(), "total_price")
        .filter(Column::UserQq.eq(user_qq))
        .filter(Column::GroupId.eq(group_id))
        .into_model::<CaseStats>()
        .one(db)
        .await?;
    Ok(stats.unwrap_or_default())
}

/// 按品质统计数量
pub async fn count_by_color(
    db: &DatabaseConnection,
    user_qq: i64,
    group_id: i64,
) -> Result<Vec<(String, i64)>, DbErr> {
    Entity::find()
        .select_only()
        .column(Column::Color)
        .column_as(Column::Id.count(), "count")
        .filter(Column::UserQq.eq(user_qq))
        .filter(Column::GroupId.eq(group_id))
        .group_by(Column::Color)
        .into_tuple::<(String, i64)>()
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    fn case(color: &str, price: f64) -> NewCase {
        NewCase {
            case_name: "狂牙大行动".into(),
            name: "AK-47".into(),
            skin_name: "燃料喷射器".into(),
            abrasion: "久经沙场".into(),
            abrasion_value: 0.3,
            color: color.into(),
            price,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stats_sum_prices() {
        let db = test_db().await;
        add(&db, 1, 100, case("BLUE", 1.5)).await.unwrap();
        add(&db, 1, 100, case("RED", 100.0)).await.unwrap();
        add(&db, 1, 100, case("BLUE", 2.5)).await.unwrap();
        add(&db, 2, 100, case("BLUE", 9.0)).await.unwrap();

        let s = stats(&db, 1, 100).await.unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.total_price, Some(104.0));

        let mut colors = count_by_color(&db, 1, 100).await.unwrap();
        colors.sort();
        assert_eq!(colors, vec![("BLUE".to_string(), 2), ("RED".to_string(), 1)]);

        let empty = stats(&db, 3, 100).await.unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.total_price, None);
    }
}
