//! 基础设施层实现。
//!
//! 提供 PostgreSQL 消息存储和 Redis 在线状态注册表，实现应用层定义的接口。

pub mod builder;
pub mod message_store;
pub mod migrations;
pub mod presence;

pub use builder::{Infrastructure, InfrastructureError};
pub use message_store::{create_pg_pool, PgMessageStore};
pub use migrations::MIGRATOR;
pub use presence::RedisPresenceRegistry;
