//! 事件总线：按类型订阅 / 全局订阅、有界历史、处理器故障隔离
//!
//! publish 会依次 await 每个处理器（先类型处理器、后全局处理器，各自按注册顺序），全部完成后才返回。
//! 处理器列表在调用前快照并释放锁，因此并发的 publish 之间互不阻塞，处理器也可以在回调中再次 publish。

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::types::{Event, EventType, NewEvent};

/// 历史缓冲容量，超出后淘汰最旧事件
pub const HISTORY_CAPACITY: usize = 1000;

type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 历史查询条件（各条件之间为 AND）
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub event_type: Option<EventType>,
    pub source: Option<String>,
    /// 包含该时间点
    pub since: Option<DateTime<Utc>>,
    /// 只保留最后 N 条
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.event_type.map_or(true, |t| event.event_type() == t)
            && self.source.as_deref().map_or(true, |s| event.source == s)
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}

#[derive(Default)]
struct Registry {
    by_type: HashMap<EventType, Vec<(u64, Handler)>>,
    global: Vec<(u64, Handler)>,
}

struct Inner {
    registry: Mutex<Registry>,
    history: Mutex<VecDeque<Arc<Event>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: u64, event_type: Option<EventType>) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        match event_type {
            Some(t) => {
                if let Some(handlers) = registry.by_type.get_mut(&t) {
                    handlers.retain(|(hid, _)| *hid != id);
                    if handlers.is_empty() {
                        registry.by_type.remove(&t);
                    }
                }
            }
            None => registry.global.retain(|(hid, _)| *hid != id),
        }
    }
}

/// 订阅句柄：调用 `unsubscribe` 注销对应处理器，重复调用无副作用。
/// 丢弃句柄不会自动注销。
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
    event_type: Option<EventType>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(self.id, self.event_type);
        }
    }
}

/// 进程内发布/订阅中枢
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 进程级共享实例，仅供组合根使用；核心组件通过构造参数注入总线
    pub fn global() -> Arc<EventBus> {
        static GLOBAL: OnceLock<Arc<EventBus>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EventBus::new())).clone()
    }

    /// 订阅某一类型的事件
    pub fn subscribe<F, Fut>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler = box_handler(handler);
        {
            let mut registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.by_type.entry(event_type).or_default().push((id, handler));
        }
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            event_type: Some(event_type),
        }
    }

    /// 订阅全部事件（在类型处理器之后调用）
    pub fn subscribe_all<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler = box_handler(handler);
        {
            let mut registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.global.push((id, handler));
        }
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            event_type: None,
        }
    }

    /// 发布事件：赋时间戳、写历史、依次调用处理器；处理器失败（Err 或 panic）只记录日志
    pub async fn publish(&self, event: NewEvent) -> Arc<Event> {
        let event = Arc::new(event.stamp(Utc::now()));
        let event_type = event.event_type();

        {
            let mut history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push_back(event.clone());
            while history.len() > HISTORY_CAPACITY {
                history.pop_front();
            }
        }

        let (typed, global): (Vec<Handler>, Vec<Handler>) = {
            let registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            let typed = registry
                .by_type
                .get(&event_type)
                .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default();
            let global = registry.global.iter().map(|(_, h)| h.clone()).collect();
            (typed, global)
        };

        for handler in typed.iter().chain(global.iter()) {
            let outcome = AssertUnwindSafe(handler(event.clone())).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(event = %event_type, source = %event.source, "Event handler failed: {:#}", e);
                }
                Err(_) => {
                    tracing::error!(event = %event_type, source = %event.source, "Event handler panicked");
                }
            }
        }

        tracing::debug!(event = %event_type, source = %event.source, "Event published");
        event
    }

    /// 按条件查询历史，返回按时间顺序排列的副本
    pub fn query_history(&self, filter: &HistoryFilter) -> Vec<Arc<Event>> {
        let history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<Arc<Event>> = history
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        matched
    }

    /// 清空历史，不影响订阅
    pub fn clear_history(&self) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn history_len(&self) -> usize {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// 当前存活的处理器数量（类型处理器 + 全局处理器）
    pub fn handler_count(&self) -> usize {
        let registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.by_type.values().map(Vec::len).sum::<usize>() + registry.global.len()
    }
}

fn box_handler<F, Fut>(handler: F) -> Handler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| handler(event).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventPayload;
    use std::sync::atomic::AtomicUsize;

    fn cycle_start(id: &str) -> NewEvent {
        NewEvent::new(
            "test",
            EventPayload::CycleStart {
                cycle_id: id.to_string(),
            },
        )
    }

    fn cycle_id(event: &Event) -> &str {
        match &event.payload {
            EventPayload::CycleStart { cycle_id } => cycle_id,
            _ => "",
        }
    }

    #[tokio::test]
    async fn test_history_keeps_last_capacity_events_in_order() {
        let bus = EventBus::new();
        for i in 0..(HISTORY_CAPACITY + 5) {
            bus.publish(cycle_start(&i.to_string())).await;
        }

        let history = bus.query_history(&HistoryFilter::new());
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(cycle_id(&history[0]), "5");
        assert_eq!(cycle_id(&history[HISTORY_CAPACITY - 1]), (HISTORY_CAPACITY + 4).to_string());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::CycleStart, |_| async { Err(anyhow::anyhow!("boom")) });
        bus.subscribe(EventType::CycleStart, |_| async {
            if true {
                panic!("handler panic");
            }
            Ok(())
        });
        let c = calls.clone();
        bus.subscribe(EventType::CycleStart, move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let c = calls.clone();
        bus.subscribe_all(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(10, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(cycle_start("x")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_typed_handlers_run_before_global() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.subscribe_all(move |_| {
            let o = o.clone();
            async move {
                o.lock().unwrap().push("global");
                Ok(())
            }
        });
        let o = order.clone();
        bus.subscribe(EventType::CycleStart, move |_| {
            let o = o.clone();
            async move {
                tokio::task::yield_now().await;
                o.lock().unwrap().push("typed");
                Ok(())
            }
        });

        bus.publish(cycle_start("x")).await;
        assert_eq!(*order.lock().unwrap(), vec!["typed", "global"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = bus.subscribe(EventType::CycleStart, move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let other = bus.subscribe_all(|_| async { Ok(()) });
        assert_eq!(bus.handler_count(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(bus.handler_count(), 1);

        bus.publish(cycle_start("x")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        other.unsubscribe();
        assert_eq!(bus.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_query_history_filters_and_limit() {
        let bus = EventBus::new();
        bus.publish(cycle_start("a")).await;
        bus.publish(NewEvent::new(
            "validator",
            EventPayload::TestingStart {
                implementation_id: "impl".to_string(),
            },
        ))
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let since = bus.publish(cycle_start("b")).await.timestamp;
        bus.publish(cycle_start("c")).await;

        let starts = bus.query_history(&HistoryFilter::new().event_type(EventType::CycleStart));
        assert_eq!(starts.len(), 3);

        let last = bus.query_history(&HistoryFilter::new().event_type(EventType::CycleStart).limit(2));
        assert_eq!(last.iter().map(|e| cycle_id(e)).collect::<Vec<_>>(), vec!["b", "c"]);

        let from_validator = bus.query_history(&HistoryFilter::new().source("validator"));
        assert_eq!(from_validator.len(), 1);

        let recent = bus.query_history(&HistoryFilter::new().since(since));
        assert_eq!(recent.len(), 2);

        bus.clear_history();
        assert_eq!(bus.history_len(), 0);
    }

    #[tokio::test]
    async fn test_handler_can_publish_reentrantly() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        bus.subscribe(EventType::CycleStart, move |event| {
            let bus = inner_bus.clone();
            async move {
                if let EventPayload::CycleStart { cycle_id } = &event.payload {
                    bus.publish(NewEvent::new(
                        "relay",
                        EventPayload::CycleComplete {
                            cycle_id: cycle_id.clone(),
                            status: crate::evolution::types::CycleStatus::Complete,
                        },
                    ))
                    .await;
                }
                Ok(())
            }
        });

        bus.publish(cycle_start("x")).await;
        assert_eq!(bus.history_len(), 2);
    }
}
