use std::collections::HashMap;
use std::sync::Mutex;

/// 次数限制器：同一用户累计达到上限时触发一次并清零
pub struct CountLimiter {
    max_count: u32,
    counts: Mutex<HashMap<i64, u32>>,
}

impl CountLimiter {
    pub fn new(max_count: u32) -> Self {
        Self {
            max_count,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, key: i64) {
        if let Ok(mut guard) = self.counts.lock() {
            *guard.entry(key).or_insert(0) += 1;
        }
    }

    /// 达到上限返回 true 并重置计数
    pub fn check(&self, key: i64) -> bool {
        let Ok(mut guard) = self.counts.lock() else {
            return false;
        };
        match guard.get_mut(&key) {
            Some(count) if *count >= self.max_count => {
                *count = 0;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_on_third_and_resets() {
        let limiter = CountLimiter::new(3);
        limiter.add(1);
        limiter.add(1);
        assert!(!limiter.check(1));
        limiter.add(1);
        assert!(limiter.check(1));
        assert!(!limiter.check(1));
        assert!(!limiter.check(2));
    }
}
