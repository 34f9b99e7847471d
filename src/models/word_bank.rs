use regex::Regex;
use sea_orm::entity::prelude::*;
use sea_orm::{Condition, QueryOrder, Set};

/// 词条
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "word_bank")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i64,
    /// 0 表示全局词条
    pub group_id: i64,
    /// 0: 全局, 1: 群聊
    pub word_scope: i32,
    pub word_type: i32,
    pub problem: String,
    pub answer: String,
    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordType {
    Exact = 0,
    Fuzzy = 1,
    Regex = 2,
    Image = 3,
}

impl WordType {
    pub fn label(&self) -> &'static str {
        match self {
            WordType::Exact => "精准",
            WordType::Fuzzy => "模糊",
            WordType::Regex => "正则",
            WordType::Image => "图片",
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => WordType::Fuzzy,
            2 => WordType::Regex,
            3 => WordType::Image,
            _ => WordType::Exact,
        }
    }
}

pub async fn add(
    db: &DatabaseConnection,
    user_id: i64,
    group_id: i64,
    word_type: WordType,
    problem: &str,
    answer: &str,
) -> Result<Model, DbErr> {
    ActiveModel {
        user_id: Set(user_id),
        group_id: Set(group_id),
        word_scope: Set(if group_id == 0 { 0 } else { 1 }),
        word_type: Set(word_type as i32),
        problem: Set(problem.to_string()),
        answer: Set(answer.to_string()),
        create_time: Set(super::now_ts()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn delete_problem(
    db: &DatabaseConnection,
    group_id: i64,
    problem: &str,
) -> Result<u64, DbErr> {
    let res = Entity::delete_many()
        .filter(Column::GroupId.eq(group_id))
        .filter(Column::Problem.eq(problem))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

/// 群内可见的词条 (群词条在前，其次全局)
pub async fn list(db: &DatabaseConnection, group_id: i64) -> Result<Vec<Model>, DbErr> {
    let rows = Entity::find()
        .filter(
            Condition::any()
                .add(Column::GroupId.eq(group_id))
                .add(Column::GroupId.eq(0)),
        )
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    let (mut group_rows, global_rows): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|r| r.group_id == group_id && group_id != 0);
    group_rows.extend(global_rows);
    Ok(group_rows)
}

fn matches(row: &Model, word_type: WordType, problem: &str) -> bool {
    match word_type {
        WordType::Exact | WordType::Image => row.problem == problem,
        WordType::Regex => Regex::new(&row.problem)
            .map(|re| re.is_match(problem))
            .unwrap_or(false),
        WordType::Fuzzy => !row.problem.is_empty() && problem.contains(&row.problem),
    }
}

/// 按 精准 > 图片 > 正则 > 模糊 的顺序查找命中的词条，群词条优先
pub async fn check_problem(
    db: &DatabaseConnection,
    group_id: i64,
    problem: &str,
) -> Result<Option<Model>, DbErr> {
    if problem.is_empty() {
        return Ok(None);
    }
    let rows = list(db, group_id).await?;
    Ok(find_match(&rows, problem).cloned())
}

pub fn find_match<'a>(rows: &'a [Model], problem: &str) -> Option<&'a Model> {
    const ORDER: [WordType; 4] = [
        WordType::Exact,
        WordType::Image,
        WordType::Regex,
        WordType::Fuzzy,
    ];
    ORDER.iter().find_map(|wt| {
        rows.iter()
            .filter(|r| WordType::from_i32(r.word_type) == *wt)
            .find(|r| matches(r, *wt, problem))
    })
}

/// 同一问题可能有多个回答，随机取一个
pub async fn get_answer(
    db: &DatabaseConnection,
    group_id: i64,
    problem: &str,
) -> Result<Option<String>, DbErr> {
    use rand::seq::IndexedRandom;
    let Some(hit) = check_problem(db, group_id, problem).await? else {
        return Ok(None);
    };
    let candidates: Vec<Model> = list(db, group_id)
        .await?
        .into_iter()
        .filter(|r| r.problem == hit.problem && r.word_type == hit.word_type)
        .filter(|r| r.group_id == hit.group_id)
        .collect();
    Ok(candidates
        .choose(&mut rand::rng())
        .map(|r| r.answer.clone())
        .or(Some(hit.answer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    #[tokio::test]
    async fn match_priority_and_scope() {
        let db = test_db().await;
        add(&db, 1, 0, WordType::Fuzzy, "你好", "全局模糊").await.unwrap();
        add(&db, 1, 100, WordType::Regex, "^你好.*$", "群正则").await.unwrap();
        add(&db, 1, 100, WordType::Exact, "你好呀", "群精准").await.unwrap();

        let hit = check_problem(&db, 100, "你好呀").await.unwrap().unwrap();
        assert_eq!(hit.answer, "群精准");

        let hit = check_problem(&db, 100, "你好啊").await.unwrap().unwrap();
        assert_eq!(hit.answer, "群正则");

        // 其他群只能命中全局词条
        let hit = check_problem(&db, 200, "说你好").await.unwrap().unwrap();
        assert_eq!(hit.answer, "全局模糊");

        assert!(check_problem(&db, 200, "再见").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_rows_before_global() {
        let db = test_db().await;
        add(&db, 1, 0, WordType::Exact, "早", "全局").await.unwrap();
        add(&db, 1, 100, WordType::Exact, "早", "本群").await.unwrap();
        assert_eq!(
            get_answer(&db, 100, "早").await.unwrap().as_deref(),
            Some("本群")
        );
        assert_eq!(delete_problem(&db, 100, "早").await.unwrap(), 1);
        assert_eq!(
            get_answer(&db, 100, "早").await.unwrap().as_deref(),
            Some("全局")
        );
    }

    #[test]
    fn invalid_regex_never_matches() {
        let row = Model {
            id: 1,
            user_id: 1,
            group_id: 0,
            word_scope: 0,
            word_type: WordType::Regex as i32,
            problem: "(".into(),
            answer: "x".into(),
            create_time: 0,
        };
        assert!(find_match(std::slice::from_ref(&row), "(").is_none());
    }
}
