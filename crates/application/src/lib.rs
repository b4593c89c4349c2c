//! 应用层实现。
//!
//! 提供连接分发中心、聊天会话与房间在线处理器、历史查询服务，
//! 以及对外部适配器（消息存储、在线状态注册表）的抽象和内存实现。

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod presence;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use dispatcher::EventDispatcher;
pub use error::ApplicationError;
pub use hub::{ConnectionHub, ConnectionSnapshot, OutboundReceiver};
pub use presence::PresenceRegistry;
pub use repository::MessageStore;
pub use services::{
    ChatSessionHandler, HistoryQuery, MessageHistoryService, RoomPresenceHandler,
};
