use std::sync::Arc;

use application::{MessageStore, PresenceRegistry};
use config::AppConfig;
use thiserror::Error;

use crate::{
    message_store::{create_pg_pool, PgMessageStore},
    migrations::MIGRATOR,
    presence::RedisPresenceRegistry,
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 外部依赖的适配器集合：PostgreSQL 消息存储与 Redis 在线状态注册表
#[derive(Clone)]
pub struct Infrastructure {
    pub message_store: Arc<PgMessageStore>,
    pub presence: Arc<RedisPresenceRegistry>,
}

impl Infrastructure {
    /// 连接数据库并执行迁移，同时打开 Redis 客户端
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;

        let redis_client = Arc::new(redis::Client::open(config.redis.url.as_str())?);
        // 启动时确认 Redis 可达
        let mut conn = redis_client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!("数据库与 Redis 连接已就绪");

        Ok(Self {
            message_store: Arc::new(PgMessageStore::new(pool)),
            presence: Arc::new(RedisPresenceRegistry::new(
                redis_client,
                config.presence.ttl_seconds,
            )),
        })
    }

    pub fn message_store_trait(&self) -> Arc<dyn MessageStore> {
        self.message_store.clone()
    }

    pub fn presence_trait(&self) -> Arc<dyn PresenceRegistry> {
        self.presence.clone()
    }
}
