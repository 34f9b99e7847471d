use crate::event::Event;
use simd_json::derived::ValueObjectAccessAsScalar;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};

/// API 响应匹配器：按 echo 将响应帧交还给发起调用的任务
pub struct Matcher {
    waiters: AsyncMutex<Vec<Waiter>>,
}

struct Waiter {
    echo: String,
    sender: oneshot::Sender<Event>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            waiters: AsyncMutex::new(Vec::new()),
        }
    }

    /// 注册一个响应等待者。必须在发送请求之前调用，避免响应先于注册到达。
    pub async fn register(&self, echo: String) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.push(Waiter { echo, sender: tx });
        rx
    }

    /// 等待已注册的响应，超时返回 None
    pub async fn wait_resp(
        &self,
        echo: &str,
        rx: oneshot::Receiver<Event>,
        timeout_duration: Duration,
    ) -> Option<Event> {
        match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(event)) => Some(event),
            _ => {
                // 超时后清理残留的等待者
                self.waiters.lock().await.retain(|w| w.echo != echo);
                None
            }
        }
    }

    /// 尝试分发事件给等待者。事件被消费时返回 None，否则原样返回。
    pub async fn dispatch(&self, event: Event) -> Option<Event> {
        let echo = match event.get_str("echo") {
            Some(e) => e.to_string(),
            None => return Some(event),
        };

        let mut guard = self.waiters.lock().await;
        match guard.iter().position(|w| w.echo == echo) {
            Some(idx) => {
                let waiter = guard.remove(idx);
                // 等待者可能已超时，忽略发送失败
                let _ = waiter.sender.send(event);
                None
            }
            None => Some(event),
        }
    }
}
