//! Redis 在线状态注册表
//!
//! 键约定：
//! - `conn:{connection_id}:user` → 用户ID（带过期时间）
//! - `user:{user_id}:conn` → 连接ID（带过期时间）
//! - `room:{room_id}:active` → 活跃用户集合

use std::sync::Arc;

use application::{ApplicationError, PresenceRegistry};
use async_trait::async_trait;
use domain::{ConnectionId, RoomId, UserId};
use uuid::Uuid;

pub fn connection_user_key(connection_id: ConnectionId) -> String {
    format!("conn:{}:user", connection_id)
}

pub fn user_connection_key(user_id: UserId) -> String {
    format!("user:{}:conn", user_id)
}

pub fn room_active_key(room_id: RoomId) -> String {
    format!("room:{}:active", room_id)
}

// 仅当 user → conn 仍指向该连接时才删除用户绑定
const UNBIND_SCRIPT: &str = r#"
local user_id = redis.call('GET', KEYS[1])
if not user_id then
    return false
end
redis.call('DEL', KEYS[1])
local user_key = 'user:' .. user_id .. ':conn'
if redis.call('GET', user_key) == ARGV[1] then
    redis.call('DEL', user_key)
end
return user_id
"#;

const REFRESH_SCRIPT: &str = r#"
local user_id = redis.call('GET', KEYS[1])
if not user_id then
    return 0
end
redis.call('EXPIRE', KEYS[1], ARGV[2])
local user_key = 'user:' .. user_id .. ':conn'
if redis.call('GET', user_key) == ARGV[1] then
    redis.call('EXPIRE', user_key, ARGV[2])
end
return 1
"#;

fn redis_err(err: redis::RedisError) -> ApplicationError {
    let message = format!("Redis operation failed: {err}");
    ApplicationError::infrastructure_with_source(message, err)
}

fn parse_id<T: From<Uuid>>(raw: &str) -> Result<T, ApplicationError> {
    raw.parse::<Uuid>().map(T::from).map_err(|e| {
        let message = format!("Invalid UUID in Redis: {e}");
        ApplicationError::infrastructure_with_source(message, e)
    })
}

/// Redis实现的在线状态注册表
pub struct RedisPresenceRegistry {
    redis_client: Arc<redis::Client>,
    ttl_seconds: u64,
}

impl RedisPresenceRegistry {
    pub fn new(redis_client: Arc<redis::Client>, ttl_seconds: u64) -> Self {
        Self {
            redis_client,
            ttl_seconds,
        }
    }

    /// 获取连接
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, ApplicationError> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                let message = format!("Redis connection failed: {e}");
                ApplicationError::infrastructure_with_source(message, e)
            })
    }
}

#[async_trait]
impl PresenceRegistry for RedisPresenceRegistry {
    async fn bind(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.get_connection().await?;

        let _: () = redis::pipe()
            .atomic()
            .set_ex(
                connection_user_key(connection_id),
                user_id.to_string(),
                self.ttl_seconds,
            )
            .ignore()
            .set_ex(
                user_connection_key(user_id),
                connection_id.to_string(),
                self.ttl_seconds,
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "写入在线状态绑定");
        Ok(())
    }

    async fn lookup_user(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<UserId>, ApplicationError> {
        let mut conn = self.get_connection().await?;

        let raw: Option<String> = redis::cmd("GET")
            .arg(connection_user_key(connection_id))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        raw.as_deref().map(parse_id).transpose()
    }

    async fn lookup_connection(
        &self,
        user_id: UserId,
    ) -> Result<Option<ConnectionId>, ApplicationError> {
        let mut conn = self.get_connection().await?;

        let raw: Option<String> = redis::cmd("GET")
            .arg(user_connection_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        raw.as_deref().map(parse_id).transpose()
    }

    async fn unbind(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<UserId>, ApplicationError> {
        let mut conn = self.get_connection().await?;

        let raw: Option<String> = redis::Script::new(UNBIND_SCRIPT)
            .key(connection_user_key(connection_id))
            .arg(connection_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err)?;

        raw.as_deref().map(parse_id).transpose()
    }

    async fn refresh(&self, connection_id: ConnectionId) -> Result<(), ApplicationError> {
        let mut conn = self.get_connection().await?;

        let _: i64 = redis::Script::new(REFRESH_SCRIPT)
            .key(connection_user_key(connection_id))
            .arg(connection_id.to_string())
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn add_active(&self, room_id: RoomId, user_id: UserId) -> Result<(), ApplicationError> {
        let mut conn = self.get_connection().await?;

        let _: () = redis::cmd("SADD")
            .arg(room_active_key(room_id))
            .arg(user_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        tracing::info!(room_id = %room_id, user_id = %user_id, "用户在房间中活跃");
        Ok(())
    }

    async fn remove_active(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.get_connection().await?;

        let _: () = redis::cmd("SREM")
            .arg(room_active_key(room_id))
            .arg(user_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        tracing::info!(room_id = %room_id, user_id = %user_id, "用户离开房间活跃集合");
        Ok(())
    }

    async fn active_members(&self, room_id: RoomId) -> Result<Vec<UserId>, ApplicationError> {
        let mut conn = self.get_connection().await?;

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(room_active_key(room_id))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        members.iter().map(|raw| parse_id(raw)).collect()
    }

    async fn active_count(&self, room_id: RoomId) -> Result<u64, ApplicationError> {
        let mut conn = self.get_connection().await?;

        redis::cmd("SCARD")
            .arg(room_active_key(room_id))
            .query_async(&mut conn)
            .await
            .map_err(redis_err)
    }
}
