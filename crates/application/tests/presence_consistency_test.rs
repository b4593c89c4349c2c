//! 在线人数一致性测试
//!
//! 验证多个连接并发修改同一房间活跃集合时，注册表与广播的人数最终一致。

use std::sync::Arc;

use application::presence::memory::MemoryPresenceRegistry;
use application::repository::memory::MemoryMessageStore;
use application::{
    ChatSessionHandler, ConnectionHub, EventDispatcher, OutboundReceiver, PresenceRegistry,
    RoomPresenceHandler, SystemClock,
};
use config::{HubConfig, OverflowPolicy};
use domain::{
    ClientEvent, ConnectionId, JoinRoomPayload, RoomId, RoomMemberJoinedPayload,
    RoomMemberLeftPayload, ServerEvent, UserId,
};
use futures::future::join_all;

/// 测试辅助结构：内存注册表上的完整事件链路
struct TestServices {
    hub: Arc<ConnectionHub>,
    registry: Arc<MemoryPresenceRegistry>,
    dispatcher: Arc<EventDispatcher>,
}

impl TestServices {
    fn new() -> Self {
        let registry = Arc::new(MemoryPresenceRegistry::default());
        let hub = Arc::new(ConnectionHub::new(
            registry.clone(),
            &HubConfig {
                outbound_buffer: 256,
                overflow_policy: OverflowPolicy::Drop,
            },
        ));
        let chat = Arc::new(ChatSessionHandler::new(
            hub.clone(),
            registry.clone(),
            Arc::new(MemoryMessageStore::new()),
            Arc::new(SystemClock),
        ));
        let rooms = Arc::new(RoomPresenceHandler::new(hub.clone(), registry.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(
            hub.clone(),
            registry.clone(),
            chat,
            rooms,
        ));

        Self {
            hub,
            registry,
            dispatcher,
        }
    }

    /// 建立连接并订阅房间频道
    async fn connect_to(&self, room_id: RoomId) -> (ConnectionId, UserId, OutboundReceiver) {
        let connection_id = ConnectionId::generate();
        let user_id = UserId::generate();
        let rx = self.hub.register(connection_id, user_id).await.unwrap();
        self.dispatcher
            .dispatch(
                connection_id,
                ClientEvent::JoinRoom(JoinRoomPayload {
                    room_id,
                    user_id,
                    user_name: format!("user-{user_id}"),
                }),
            )
            .await;
        (connection_id, user_id, rx)
    }

    async fn become_active(&self, connection_id: ConnectionId, user_id: UserId, room_id: RoomId) {
        self.dispatcher
            .dispatch(
                connection_id,
                ClientEvent::RoomMemberJoined(RoomMemberJoinedPayload {
                    room_id,
                    user_id,
                    user_name: None,
                }),
            )
            .await;
    }
}

/// 取出所有已收到的房间人数广播
fn stats_counts(rx: &mut OutboundReceiver) -> Vec<u64> {
    let mut counts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::RoomStatsUpdated(stats) = &*event {
            counts.push(stats.active_members);
        }
    }
    counts
}

/// 两个连接并发声明活跃，最终人数收敛到 2
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_member_joined_converges() {
    for _ in 0..20 {
        let services = Arc::new(TestServices::new());
        let room_id = RoomId::generate();
        let (conn_a, user_a, mut rx_a) = services.connect_to(room_id).await;
        let (conn_b, user_b, mut rx_b) = services.connect_to(room_id).await;

        let tasks = [(conn_a, user_a), (conn_b, user_b)].map(|(conn, user)| {
            let services = services.clone();
            tokio::spawn(async move { services.become_active(conn, user, room_id).await })
        });
        for result in join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(services.registry.active_count(room_id).await.unwrap(), 2);

        // 每个订阅者都收到两次广播，其中至少一次反映最终人数
        for counts in [stats_counts(&mut rx_a), stats_counts(&mut rx_b)] {
            assert_eq!(counts.len(), 2);
            assert_eq!(counts.iter().copied().max(), Some(2));
        }
    }
}

/// 声明活跃后再离开，人数回到之前的值
#[tokio::test]
async fn test_join_then_leave_restores_count() {
    let services = TestServices::new();
    let room_id = RoomId::generate();
    let (observer, observer_user, mut rx_observer) = services.connect_to(room_id).await;
    services.become_active(observer, observer_user, room_id).await;

    let (conn, user, _rx) = services.connect_to(room_id).await;
    services.become_active(conn, user, room_id).await;
    services
        .dispatcher
        .dispatch(
            conn,
            ClientEvent::RoomMemberLeft(RoomMemberLeftPayload { room_id, user_id: user }),
        )
        .await;

    assert_eq!(stats_counts(&mut rx_observer), vec![1, 2, 1]);
    assert_eq!(services.registry.active_count(room_id).await.unwrap(), 1);

    // 重复离开不会再减少人数
    services
        .dispatcher
        .dispatch(
            conn,
            ClientEvent::RoomMemberLeft(RoomMemberLeftPayload { room_id, user_id: user }),
        )
        .await;
    assert_eq!(stats_counts(&mut rx_observer), vec![1]);
}

/// 连续两次断开：不报错，也不会重复扣减人数
#[tokio::test]
async fn test_double_disconnect_releases_once() {
    let services = TestServices::new();
    let room_id = RoomId::generate();
    let (conn_a, user_a, mut rx_a) = services.connect_to(room_id).await;
    let (conn_b, user_b, _rx_b) = services.connect_to(room_id).await;
    services.become_active(conn_a, user_a, room_id).await;
    services.become_active(conn_b, user_b, room_id).await;
    stats_counts(&mut rx_a);

    services.dispatcher.disconnect(conn_b).await;
    services.dispatcher.disconnect(conn_b).await;

    assert_eq!(stats_counts(&mut rx_a), vec![1]);
    assert_eq!(services.registry.active_count(room_id).await.unwrap(), 1);
    assert_eq!(
        services.registry.active_members(room_id).await.unwrap(),
        vec![user_a]
    );
    assert_eq!(services.registry.lookup_connection(user_b).await.unwrap(), None);
    assert_eq!(services.hub.subscriber_count(room_id).await, 1);
}

/// 大量连接并发加入后全部断开，活跃集合清空
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mass_disconnect_empties_active_set() {
    let services = Arc::new(TestServices::new());
    let room_id = RoomId::generate();

    let mut connections = Vec::new();
    for _ in 0..16 {
        let (conn, user, rx) = services.connect_to(room_id).await;
        connections.push((conn, user, rx));
    }

    let joins = connections.iter().map(|(conn, user, _)| {
        let services = services.clone();
        let (conn, user) = (*conn, *user);
        tokio::spawn(async move { services.become_active(conn, user, room_id).await })
    });
    for result in join_all(joins).await {
        result.unwrap();
    }
    assert_eq!(services.registry.active_count(room_id).await.unwrap(), 16);

    let leaves = connections.iter().map(|(conn, _, _)| {
        let services = services.clone();
        let conn = *conn;
        tokio::spawn(async move { services.dispatcher.disconnect(conn).await })
    });
    for result in join_all(leaves).await {
        result.unwrap();
    }

    assert_eq!(services.registry.active_count(room_id).await.unwrap(), 0);
    assert_eq!(services.hub.connection_count().await, 0);
    assert_eq!(services.hub.subscriber_count(room_id).await, 0);
}
