//! 事件层：类型化事件目录与发布/订阅总线

pub mod bus;
pub mod types;

pub use bus::{EventBus, HistoryFilter, Subscription, HISTORY_CAPACITY};
pub use types::{ChangeOperation, Event, EventMetadata, EventPayload, EventType, NewEvent};
