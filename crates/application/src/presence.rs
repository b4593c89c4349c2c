use async_trait::async_trait;

use crate::error::ApplicationError;
use domain::{ConnectionId, RoomId, UserId};

/// 在线状态注册表
///
/// 维护三类键：`conn:{id}:user`、`user:{id}:conn` 以及 `room:{id}:active`。
/// 连接绑定带过期时间，活动时刷新；房间活跃集合只通过增删维护。
/// 所有操作都是单键或单集合的原子操作，聊天处理器和房间在线处理器共用同一套键。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 绑定连接与用户，同一用户的新连接覆盖旧绑定
    async fn bind(&self, connection_id: ConnectionId, user_id: UserId)
        -> Result<(), ApplicationError>;

    /// 查询连接绑定的用户
    async fn lookup_user(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<UserId>, ApplicationError>;

    /// 查询用户当前的连接
    async fn lookup_connection(
        &self,
        user_id: UserId,
    ) -> Result<Option<ConnectionId>, ApplicationError>;

    /// 解除连接绑定，返回原先绑定的用户
    ///
    /// 只有当 `user → conn` 仍指向该连接时才删除，避免清掉同一用户的新连接。
    async fn unbind(&self, connection_id: ConnectionId)
        -> Result<Option<UserId>, ApplicationError>;

    /// 刷新连接绑定的过期时间
    async fn refresh(&self, connection_id: ConnectionId) -> Result<(), ApplicationError>;

    async fn add_active(&self, room_id: RoomId, user_id: UserId) -> Result<(), ApplicationError>;

    /// 从活跃集合移除，不在集合中时无操作
    async fn remove_active(&self, room_id: RoomId, user_id: UserId)
        -> Result<(), ApplicationError>;

    async fn active_members(&self, room_id: RoomId) -> Result<Vec<UserId>, ApplicationError>;

    async fn active_count(&self, room_id: RoomId) -> Result<u64, ApplicationError>;
}

/// 内存实现的在线状态注册表（用于测试和单进程部署）
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tokio::time::Instant;

    struct Expiring<T> {
        value: T,
        expires_at: Instant,
    }

    impl<T: Copy> Expiring<T> {
        fn live(&self, now: Instant) -> Option<T> {
            (self.expires_at > now).then_some(self.value)
        }
    }

    #[derive(Default)]
    struct Bindings {
        conn_user: HashMap<ConnectionId, Expiring<UserId>>,
        user_conn: HashMap<UserId, Expiring<ConnectionId>>,
    }

    pub struct MemoryPresenceRegistry {
        ttl: Duration,
        bindings: RwLock<Bindings>,
        active: RwLock<HashMap<RoomId, HashSet<UserId>>>,
    }

    impl MemoryPresenceRegistry {
        pub fn new(ttl: Duration) -> Self {
            Self {
                ttl,
                bindings: RwLock::new(Bindings::default()),
                active: RwLock::new(HashMap::new()),
            }
        }
    }

    impl Default for MemoryPresenceRegistry {
        fn default() -> Self {
            Self::new(Duration::from_secs(86400))
        }
    }

    #[async_trait]
    impl PresenceRegistry for MemoryPresenceRegistry {
        async fn bind(
            &self,
            connection_id: ConnectionId,
            user_id: UserId,
        ) -> Result<(), ApplicationError> {
            let expires_at = Instant::now() + self.ttl;
            let mut bindings = self.bindings.write().await;
            bindings.conn_user.insert(
                connection_id,
                Expiring {
                    value: user_id,
                    expires_at,
                },
            );
            bindings.user_conn.insert(
                user_id,
                Expiring {
                    value: connection_id,
                    expires_at,
                },
            );
            Ok(())
        }

        async fn lookup_user(
            &self,
            connection_id: ConnectionId,
        ) -> Result<Option<UserId>, ApplicationError> {
            let bindings = self.bindings.read().await;
            Ok(bindings
                .conn_user
                .get(&connection_id)
                .and_then(|entry| entry.live(Instant::now())))
        }

        async fn lookup_connection(
            &self,
            user_id: UserId,
        ) -> Result<Option<ConnectionId>, ApplicationError> {
            let bindings = self.bindings.read().await;
            Ok(bindings
                .user_conn
                .get(&user_id)
                .and_then(|entry| entry.live(Instant::now())))
        }

        async fn unbind(
            &self,
            connection_id: ConnectionId,
        ) -> Result<Option<UserId>, ApplicationError> {
            let now = Instant::now();
            let mut bindings = self.bindings.write().await;
            let Some(entry) = bindings.conn_user.remove(&connection_id) else {
                return Ok(None);
            };

            let user_id = entry.value;
            if bindings
                .user_conn
                .get(&user_id)
                .is_some_and(|current| current.value == connection_id)
            {
                bindings.user_conn.remove(&user_id);
            }
            Ok(entry.live(now))
        }

        async fn refresh(&self, connection_id: ConnectionId) -> Result<(), ApplicationError> {
            let now = Instant::now();
            let expires_at = now + self.ttl;
            let mut bindings = self.bindings.write().await;

            let Some(user_id) = bindings
                .conn_user
                .get_mut(&connection_id)
                .and_then(|entry| {
                    let user_id = entry.live(now)?;
                    entry.expires_at = expires_at;
                    Some(user_id)
                })
            else {
                return Ok(());
            };

            if let Some(entry) = bindings.user_conn.get_mut(&user_id) {
                if entry.value == connection_id {
                    entry.expires_at = expires_at;
                }
            }
            Ok(())
        }

        async fn add_active(
            &self,
            room_id: RoomId,
            user_id: UserId,
        ) -> Result<(), ApplicationError> {
            let mut active = self.active.write().await;
            active.entry(room_id).or_default().insert(user_id);
            Ok(())
        }

        async fn remove_active(
            &self,
            room_id: RoomId,
            user_id: UserId,
        ) -> Result<(), ApplicationError> {
            let mut active = self.active.write().await;
            if let Some(users) = active.get_mut(&room_id) {
                users.remove(&user_id);
                if users.is_empty() {
                    active.remove(&room_id);
                }
            }
            Ok(())
        }

        async fn active_members(&self, room_id: RoomId) -> Result<Vec<UserId>, ApplicationError> {
            let active = self.active.read().await;
            Ok(active
                .get(&room_id)
                .map(|users| users.iter().copied().collect())
                .unwrap_or_default())
        }

        async fn active_count(&self, room_id: RoomId) -> Result<u64, ApplicationError> {
            let active = self.active.read().await;
            Ok(active.get(&room_id).map_or(0, |users| users.len() as u64))
        }
    }

}
