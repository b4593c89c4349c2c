//! 连接分发中心
//!
//! 持有本进程内所有存活连接、房间频道订阅关系，并负责把服务端事件
//! 扇出到房间订阅者或指定用户的连接。每个连接都有独立的有界发送队列，
//! 慢连接只会影响自己。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use config::{HubConfig, OverflowPolicy};
use domain::{ConnectionId, RoomId, ServerEvent, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ApplicationError;
use crate::presence::PresenceRegistry;

/// 连接发送队列的接收端，由连接的写循环消费
pub type OutboundReceiver = mpsc::Receiver<Arc<ServerEvent>>;

struct ConnectionEntry {
    user_id: UserId,
    // 溢出断开时置为 None，写循环随之结束
    sender: Option<mpsc::Sender<Arc<ServerEvent>>>,
    rooms: HashSet<RoomId>,
    active_rooms: HashSet<RoomId>,
    last_refresh: Instant,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

/// 连接注销时的快照，供后续清理活跃集合使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub rooms: Vec<RoomId>,
    pub active_rooms: Vec<RoomId>,
}

enum Delivery {
    Sent,
    Dropped,
    Overflowed,
}

pub struct ConnectionHub {
    state: RwLock<HubState>,
    registry: Arc<dyn PresenceRegistry>,
    outbound_buffer: usize,
    overflow_policy: OverflowPolicy,
}

impl ConnectionHub {
    pub fn new(registry: Arc<dyn PresenceRegistry>, config: &HubConfig) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            registry,
            outbound_buffer: config.outbound_buffer.max(1),
            overflow_policy: config.overflow_policy,
        }
    }

    /// 注册新连接并写入在线状态绑定，返回该连接的发送队列
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<OutboundReceiver, ApplicationError> {
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);
        {
            let mut state = self.state.write().await;
            state.connections.insert(
                connection_id,
                ConnectionEntry {
                    user_id,
                    sender: Some(sender),
                    rooms: HashSet::new(),
                    active_rooms: HashSet::new(),
                    last_refresh: Instant::now(),
                },
            );
        }

        if let Err(err) = self.registry.bind(connection_id, user_id).await {
            self.state.write().await.connections.remove(&connection_id);
            return Err(err);
        }

        info!(connection_id = %connection_id, user_id = %user_id, "连接已注册");
        Ok(receiver)
    }

    /// 订阅房间频道，重复订阅无副作用。返回是否为新订阅
    pub async fn subscribe(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<bool, ApplicationError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(ApplicationError::ConnectionNotFound(connection_id))?;

        if !entry.rooms.insert(room_id) {
            return Ok(false);
        }
        state.rooms.entry(room_id).or_default().insert(connection_id);
        debug!(connection_id = %connection_id, room_id = %room_id, "订阅房间频道");
        Ok(true)
    }

    /// 退订房间频道，未订阅或连接不存在时无操作。返回是否确实退订
    pub async fn unsubscribe(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let mut state = self.state.write().await;
        let removed = state
            .connections
            .get_mut(&connection_id)
            .is_some_and(|entry| entry.rooms.remove(&room_id));

        if removed {
            Self::detach_from_room(&mut state, connection_id, room_id);
            debug!(connection_id = %connection_id, room_id = %room_id, "退订房间频道");
        }
        removed
    }

    fn detach_from_room(state: &mut HubState, connection_id: ConnectionId, room_id: RoomId) {
        if let Some(members) = state.rooms.get_mut(&room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                state.rooms.remove(&room_id);
            }
        }
    }

    /// 记录连接在房间中声明了活跃状态
    pub async fn mark_active(&self, connection_id: ConnectionId, room_id: RoomId) {
        if let Some(entry) = self.state.write().await.connections.get_mut(&connection_id) {
            entry.active_rooms.insert(room_id);
        }
    }

    pub async fn clear_active(&self, connection_id: ConnectionId, room_id: RoomId) {
        if let Some(entry) = self.state.write().await.connections.get_mut(&connection_id) {
            entry.active_rooms.remove(&room_id);
        }
    }

    /// 同一用户是否还有其他连接在该房间中保持活跃
    pub async fn user_active_elsewhere(
        &self,
        user_id: UserId,
        room_id: RoomId,
        except: ConnectionId,
    ) -> bool {
        self.state
            .read()
            .await
            .connections
            .iter()
            .any(|(connection_id, entry)| {
                *connection_id != except
                    && entry.user_id == user_id
                    && entry.active_rooms.contains(&room_id)
            })
    }

    /// 距上次刷新在线状态已超过 `min_interval` 时记录本次刷新并返回 true
    pub async fn refresh_due(&self, connection_id: ConnectionId, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut state = self.state.write().await;
        match state.connections.get_mut(&connection_id) {
            Some(entry) if now.duration_since(entry.last_refresh) >= min_interval => {
                entry.last_refresh = now;
                true
            }
            _ => false,
        }
    }

    /// 连接握手时绑定的用户
    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|entry| entry.user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 当前订阅某房间频道的连接数
    pub async fn subscriber_count(&self, room_id: RoomId) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(&room_id)
            .map_or(0, HashSet::len)
    }

    /// 注销连接：移除所有订阅并清除在线状态绑定
    ///
    /// 可重复调用，连接已不存在时返回 None。本地状态总是先于注册表清理，
    /// 注册表失败只记录日志。
    pub async fn unregister_all(&self, connection_id: ConnectionId) -> Option<ConnectionSnapshot> {
        let snapshot = {
            let mut state = self.state.write().await;
            let entry = state.connections.remove(&connection_id)?;
            for room_id in &entry.rooms {
                Self::detach_from_room(&mut state, connection_id, *room_id);
            }
            ConnectionSnapshot {
                connection_id,
                user_id: entry.user_id,
                rooms: entry.rooms.into_iter().collect(),
                active_rooms: entry.active_rooms.into_iter().collect(),
            }
        };

        if let Err(err) = self.registry.unbind(connection_id).await {
            warn!(connection_id = %connection_id, error = %err, "清除在线状态绑定失败");
        }

        info!(
            connection_id = %connection_id,
            user_id = %snapshot.user_id,
            rooms = snapshot.rooms.len(),
            "连接已注销"
        );
        Some(snapshot)
    }

    /// 向房间所有订阅者广播，可排除发起连接，返回成功入队的连接数
    pub async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut overflowed = Vec::new();

        {
            let state = self.state.read().await;
            let Some(members) = state.rooms.get(&room_id) else {
                return 0;
            };

            for connection_id in members.iter().filter(|id| Some(**id) != exclude) {
                let Some(entry) = state.connections.get(connection_id) else {
                    continue;
                };
                match self.deliver(*connection_id, entry, &event) {
                    Delivery::Sent => delivered += 1,
                    Delivery::Overflowed => overflowed.push(*connection_id),
                    Delivery::Dropped => {}
                }
            }
        }

        self.close_overflowed(overflowed).await;
        debug!(room_id = %room_id, event = event.name(), delivered, "房间广播完成");
        delivered
    }

    /// 发送给用户当前的连接，用户不在线时静默丢弃
    pub async fn send_to_user(
        &self,
        user_id: UserId,
        event: ServerEvent,
    ) -> Result<bool, ApplicationError> {
        match self.registry.lookup_connection(user_id).await? {
            Some(connection_id) => Ok(self.send_to_connection(connection_id, event).await),
            None => {
                debug!(user_id = %user_id, event = event.name(), "用户不在线，跳过推送");
                Ok(false)
            }
        }
    }

    /// 发送给指定连接，连接不在本进程时返回 false
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let event = Arc::new(event);
        let outcome = {
            let state = self.state.read().await;
            match state.connections.get(&connection_id) {
                Some(entry) => self.deliver(connection_id, entry, &event),
                None => Delivery::Dropped,
            }
        };

        match outcome {
            Delivery::Sent => true,
            Delivery::Dropped => false,
            Delivery::Overflowed => {
                self.close_overflowed(vec![connection_id]).await;
                false
            }
        }
    }

    fn deliver(
        &self,
        connection_id: ConnectionId,
        entry: &ConnectionEntry,
        event: &Arc<ServerEvent>,
    ) -> Delivery {
        let Some(sender) = &entry.sender else {
            return Delivery::Dropped;
        };

        match sender.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => match self.overflow_policy {
                OverflowPolicy::Drop => {
                    warn!(connection_id = %connection_id, event = event.name(), "发送队列已满，丢弃事件");
                    Delivery::Dropped
                }
                OverflowPolicy::Disconnect => Delivery::Overflowed,
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }

    async fn close_overflowed(&self, overflowed: Vec<ConnectionId>) {
        if overflowed.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        for connection_id in overflowed {
            if let Some(entry) = state.connections.get_mut(&connection_id) {
                if entry.sender.take().is_some() {
                    warn!(connection_id = %connection_id, "发送队列已满，断开慢连接");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::memory::MemoryPresenceRegistry;
    use domain::{RoomStats, TypingNotice};

    fn hub_with(buffer: usize, policy: OverflowPolicy) -> (ConnectionHub, Arc<MemoryPresenceRegistry>) {
        let registry = Arc::new(MemoryPresenceRegistry::default());
        let hub = ConnectionHub::new(
            registry.clone(),
            &HubConfig {
                outbound_buffer: buffer,
                overflow_policy: policy,
            },
        );
        (hub, registry)
    }

    fn stats(room_id: RoomId, active_members: u64) -> ServerEvent {
        ServerEvent::RoomStatsUpdated(RoomStats {
            room_id,
            active_members,
        })
    }

    #[tokio::test]
    async fn register_binds_presence_both_ways() {
        let (hub, registry) = hub_with(8, OverflowPolicy::Drop);
        let conn = ConnectionId::generate();
        let user = UserId::generate();

        let _rx = hub.register(conn, user).await.unwrap();

        assert_eq!(hub.user_of(conn).await, Some(user));
        assert_eq!(registry.lookup_connection(user).await.unwrap(), Some(conn));
        assert_eq!(registry.lookup_user(conn).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_and_requires_registration() {
        let (hub, _) = hub_with(8, OverflowPolicy::Drop);
        let conn = ConnectionId::generate();
        let room = RoomId::generate();
        let _rx = hub.register(conn, UserId::generate()).await.unwrap();

        assert!(hub.subscribe(conn, room).await.unwrap());
        assert!(!hub.subscribe(conn, room).await.unwrap());
        assert_eq!(hub.subscriber_count(room).await, 1);

        let unknown = ConnectionId::generate();
        assert!(matches!(
            hub.subscribe(unknown, room).await,
            Err(ApplicationError::ConnectionNotFound(id)) if id == unknown
        ));

        // 退订未订阅的房间不报错
        assert!(!hub.unsubscribe(conn, RoomId::generate()).await);
        assert!(!hub.unsubscribe(unknown, room).await);
        assert!(hub.unsubscribe(conn, room).await);
        assert!(!hub.unsubscribe(conn, room).await);
        assert_eq!(hub.subscriber_count(room).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_due_is_throttled_per_connection() {
        let (hub, _) = hub_with(8, OverflowPolicy::Drop);
        let conn = ConnectionId::generate();
        let _rx = hub.register(conn, UserId::generate()).await.unwrap();
        let interval = Duration::from_secs(5);

        // 注册时刚绑定过
        assert!(!hub.refresh_due(conn, interval).await);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(hub.refresh_due(conn, interval).await);
        assert!(!hub.refresh_due(conn, interval).await);

        assert!(!hub.refresh_due(ConnectionId::generate(), interval).await);
    }

    #[tokio::test]
    async fn active_elsewhere_ignores_the_excluded_connection() {
        let (hub, _) = hub_with(8, OverflowPolicy::Drop);
        let user = UserId::generate();
        let room = RoomId::generate();
        let first = ConnectionId::generate();
        let second = ConnectionId::generate();
        let _rx1 = hub.register(first, user).await.unwrap();
        let _rx2 = hub.register(second, user).await.unwrap();

        hub.mark_active(first, room).await;
        assert!(!hub.user_active_elsewhere(user, room, first).await);
        assert!(hub.user_active_elsewhere(user, room, second).await);

        hub.mark_active(second, room).await;
        hub.unregister_all(first).await;
        assert!(hub.user_active_elsewhere(user, room, first).await);
        assert!(!hub.user_active_elsewhere(UserId::generate(), room, first).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_except_excluded() {
        let (hub, _) = hub_with(8, OverflowPolicy::Drop);
        let room = RoomId::generate();
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        let outsider = ConnectionId::generate();
        let mut rx_a = hub.register(a, UserId::generate()).await.unwrap();
        let mut rx_b = hub.register(b, UserId::generate()).await.unwrap();
        let mut rx_outsider = hub.register(outsider, UserId::generate()).await.unwrap();
        hub.subscribe(a, room).await.unwrap();
        hub.subscribe(b, room).await.unwrap();

        let delivered = hub.broadcast_to_room(room, stats(room, 1), None).await;
        assert_eq!(delivered, 2);
        assert_eq!(*rx_a.recv().await.unwrap(), stats(room, 1));
        assert_eq!(*rx_b.recv().await.unwrap(), stats(room, 1));

        let typing = ServerEvent::UserTyping(TypingNotice {
            room_id: room,
            user_id: UserId::generate(),
            user_name: "amy".to_string(),
            is_typing: true,
        });
        let delivered = hub.broadcast_to_room(room, typing.clone(), Some(a)).await;
        assert_eq!(delivered, 1);
        assert_eq!(*rx_b.recv().await.unwrap(), typing);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_outsider.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_resolves_through_registry() {
        let (hub, _) = hub_with(8, OverflowPolicy::Drop);
        let conn = ConnectionId::generate();
        let user = UserId::generate();
        let mut rx = hub.register(conn, user).await.unwrap();
        let room = RoomId::generate();

        assert!(hub.send_to_user(user, stats(room, 3)).await.unwrap());
        assert_eq!(*rx.recv().await.unwrap(), stats(room, 3));

        // 不在线的用户静默丢弃
        assert!(!hub.send_to_user(UserId::generate(), stats(room, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn unregister_all_is_idempotent() {
        let (hub, registry) = hub_with(8, OverflowPolicy::Drop);
        let conn = ConnectionId::generate();
        let user = UserId::generate();
        let room = RoomId::generate();
        let _rx = hub.register(conn, user).await.unwrap();
        hub.subscribe(conn, room).await.unwrap();
        hub.mark_active(conn, room).await;

        let snapshot = hub.unregister_all(conn).await.unwrap();
        assert_eq!(snapshot.user_id, user);
        assert_eq!(snapshot.rooms, vec![room]);
        assert_eq!(snapshot.active_rooms, vec![room]);
        assert_eq!(hub.subscriber_count(room).await, 0);
        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(registry.lookup_connection(user).await.unwrap(), None);

        assert!(hub.unregister_all(conn).await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_event_without_blocking_others() {
        let (hub, _) = hub_with(1, OverflowPolicy::Drop);
        let room = RoomId::generate();
        let slow = ConnectionId::generate();
        let fast = ConnectionId::generate();
        let mut rx_slow = hub.register(slow, UserId::generate()).await.unwrap();
        let mut rx_fast = hub.register(fast, UserId::generate()).await.unwrap();
        hub.subscribe(slow, room).await.unwrap();
        hub.subscribe(fast, room).await.unwrap();

        assert_eq!(hub.broadcast_to_room(room, stats(room, 1), None).await, 2);
        // 快连接及时消费，慢连接队列仍满
        assert_eq!(*rx_fast.recv().await.unwrap(), stats(room, 1));
        assert_eq!(hub.broadcast_to_room(room, stats(room, 2), None).await, 1);
        assert_eq!(*rx_fast.recv().await.unwrap(), stats(room, 2));

        assert_eq!(*rx_slow.recv().await.unwrap(), stats(room, 1));
        assert!(rx_slow.try_recv().is_err());
        // 丢弃策略下连接仍然可用
        assert!(hub.send_to_connection(slow, stats(room, 3)).await);
    }

    #[tokio::test]
    async fn full_queue_closes_slow_connection_under_disconnect_policy() {
        let (hub, _) = hub_with(1, OverflowPolicy::Disconnect);
        let room = RoomId::generate();
        let slow = ConnectionId::generate();
        let mut rx_slow = hub.register(slow, UserId::generate()).await.unwrap();
        hub.subscribe(slow, room).await.unwrap();

        hub.broadcast_to_room(room, stats(room, 1), None).await;
        hub.broadcast_to_room(room, stats(room, 2), None).await;

        // 已入队的事件仍可读出，随后通道关闭
        assert_eq!(*rx_slow.recv().await.unwrap(), stats(room, 1));
        assert!(rx_slow.recv().await.is_none());
        assert!(!hub.send_to_connection(slow, stats(room, 3)).await);
    }
}
