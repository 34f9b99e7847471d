use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;

use crate::info;

/// 全局定时任务管理器
pub struct Scheduler {
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    /// 具名任务，同名任务重新添加时替换旧任务
    named: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            named: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 添加调度任务
    ///
    /// `next_run` 接收当前时间并返回下一次执行时间，返回 None 时任务结束。
    pub fn add_schedule<C, F, Fut>(&self, mut next_run: C, mut task_gen: F) -> u64
    where
        C: FnMut(DateTime<Local>) -> Option<DateTime<Local>> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut next_time = next_run(Local::now());

        let handle = tokio::spawn(async move {
            while let Some(target_time) = next_time {
                let now = Local::now();
                if target_time > now {
                    let duration = (target_time - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(duration).await;
                }

                task_gen().await;

                next_time = next_run(Local::now());
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, handle.abort_handle());
        }
        id
    }

    /// 每天固定时间执行 (HH:MM:SS)
    pub fn add_daily_at<F, Fut>(&self, hour: u32, minute: u32, second: u32, task_gen: F) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_schedule(
            move |now| next_daily(now, hour, minute, second),
            task_gen,
        )
    }

    /// 每天固定时间执行，替换同名的旧任务
    pub fn replace_daily_at<F, Fut>(
        &self,
        name: impl Into<String>,
        hour: u32,
        minute: u32,
        second: u32,
        task_gen: F,
    ) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.add_daily_at(hour, minute, second, task_gen);
        let old = self
            .named
            .lock()
            .ok()
            .and_then(|mut named| named.insert(name.into(), id));
        if let Some(old) = old {
            self.remove(old);
        }
        id
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut tasks) = self.tasks.lock()
            && let Some(handle) = tasks.remove(&id)
        {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn shutdown(&self) {
        info!(target: "Scheduler", "正在清理定时任务...");
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

fn at_time(day: NaiveDate, hour: u32, minute: u32, second: u32) -> Option<DateTime<Local>> {
    day.and_hms_opt(hour, minute, second)
        .and_then(|t| Local.from_local_datetime(&t).single())
}

/// 计算下一次每日任务时间：今天未到则今天，否则明天
pub fn next_daily(
    now: DateTime<Local>,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Local>> {
    let today = now.date_naive();
    if let Some(target) = at_time(today, hour, minute, second)
        && target > now
    {
        return Some(target);
    }
    at_time(today.succ_opt()?, hour, minute, second)
}

/// 解析 "HH:MM:SS" 或 "HH:MM"
pub fn parse_hms(text: &str) -> Option<(u32, u32, u32)> {
    let mut parts = text.trim().split(':').map(|p| p.trim().parse::<u32>());
    let hour = parts.next()?.ok()?;
    let minute = parts.next()?.ok()?;
    let second = match parts.next() {
        Some(s) => s.ok()?,
        None => 0,
    };
    if parts.next().is_some() || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    Some((hour, minute, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn daily_rolls_over_to_tomorrow() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap();

        let later = next_daily(now, 18, 30, 0).unwrap();
        assert_eq!(later.date_naive(), now.date_naive());
        assert_eq!(later.hour(), 18);

        let earlier = next_daily(now, 3, 1, 0).unwrap();
        assert_eq!(earlier.date_naive(), now.date_naive().succ_opt().unwrap());
        assert_eq!(earlier.minute(), 1);
    }

    #[test]
    fn time_of_day_parsing() {
        assert_eq!(parse_hms("04:30:05"), Some((4, 30, 5)));
        assert_eq!(parse_hms("1:01"), Some((1, 1, 0)));
        assert_eq!(parse_hms("24:00"), None);
        assert_eq!(parse_hms("a:b"), None);
    }

    #[tokio::test]
    async fn remove_and_shutdown_abort_tasks() {
        let scheduler = Scheduler::new();
        let a = scheduler.add_daily_at(3, 0, 0, || async {});
        let _b = scheduler.add_daily_at(4, 0, 0, || async {});
        assert_eq!(scheduler.len(), 2);

        scheduler.remove(a);
        assert_eq!(scheduler.len(), 1);

        scheduler.shutdown();
        assert_eq!(scheduler.len(), 0);
    }

    #[tokio::test]
    async fn named_tasks_replace_only_their_own_name() {
        let scheduler = Scheduler::new();
        let bot_a = scheduler.replace_daily_at("member_sync:1", 1, 1, 0, || async {});
        let bot_b = scheduler.replace_daily_at("member_sync:2", 1, 1, 0, || async {});
        assert_ne!(bot_a, bot_b);
        assert_eq!(scheduler.len(), 2);

        // 同一个 Bot 重连只替换自己的任务
        scheduler.replace_daily_at("member_sync:1", 1, 1, 0, || async {});
        assert_eq!(scheduler.len(), 2);
        scheduler.remove(bot_a);
        assert_eq!(scheduler.len(), 2);
    }
}
