use std::sync::Arc;

use application::PresenceRegistry;
use domain::{ConnectionId, RoomId, UserId};
use infrastructure::RedisPresenceRegistry;

fn registry() -> RedisPresenceRegistry {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(redis_url).expect("redis client");
    RedisPresenceRegistry::new(Arc::new(client), 60)
}

#[tokio::test]
#[ignore = "requires running Redis"]
async fn unbind_only_clears_current_binding() {
    let registry = registry();
    let user = UserId::generate();
    let old_conn = ConnectionId::generate();
    let new_conn = ConnectionId::generate();

    registry.bind(old_conn, user).await.expect("bind");
    registry.bind(new_conn, user).await.expect("bind");

    assert_eq!(registry.unbind(old_conn).await.expect("unbind"), Some(user));
    assert_eq!(
        registry.lookup_connection(user).await.expect("lookup"),
        Some(new_conn)
    );

    registry.refresh(new_conn).await.expect("refresh");
    assert_eq!(registry.unbind(new_conn).await.expect("unbind"), Some(user));
    assert_eq!(registry.lookup_connection(user).await.expect("lookup"), None);
    // 重复解绑无副作用
    assert_eq!(registry.unbind(new_conn).await.expect("unbind"), None);
}

#[tokio::test]
#[ignore = "requires running Redis"]
async fn active_set_counts_distinct_users() {
    let registry = registry();
    let room = RoomId::generate();
    let alice = UserId::generate();
    let bob = UserId::generate();

    registry.add_active(room, alice).await.expect("add");
    registry.add_active(room, alice).await.expect("add");
    registry.add_active(room, bob).await.expect("add");
    assert_eq!(registry.active_count(room).await.expect("count"), 2);

    registry.remove_active(room, alice).await.expect("remove");
    registry.remove_active(room, alice).await.expect("remove");
    assert_eq!(registry.active_members(room).await.expect("members"), vec![bob]);

    registry.remove_active(room, bob).await.expect("remove");
    assert_eq!(registry.active_count(room).await.expect("count"), 0);
}
