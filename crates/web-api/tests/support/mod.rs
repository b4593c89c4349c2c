use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    presence::memory::MemoryPresenceRegistry, repository::memory::MemoryMessageStore,
    MessageStore, PresenceRegistry,
};
use config::AppConfig;
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 使用内存存储和内存在线状态启动的测试服务
pub struct TestServer {
    pub addr: SocketAddr,
    jwt: JwtService,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(AppConfig::default()).await
    }

    pub async fn spawn_with(config: AppConfig) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let registry: Arc<dyn PresenceRegistry> = Arc::new(MemoryPresenceRegistry::default());
        let state = AppState::assemble(store, registry, &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router(state).into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            jwt: JwtService::new(config.jwt),
            _shutdown: shutdown_tx,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token_for(&self, user_id: UserId) -> String {
        self.jwt.generate_token(user_id).expect("token")
    }

    pub async fn connect(&self, user_id: UserId) -> WsClient {
        let url = format!("ws://{}/ws?token={}", self.addr, self.token_for(user_id));
        let (stream, _) = connect_async(url).await.expect("websocket connect");
        stream
    }
}

pub async fn send_event(ws: &mut WsClient, event: Value) {
    ws.send(TungsteniteMessage::Text(event.to_string().into()))
        .await
        .expect("send event");
}

/// 读取直到出现指定名称的事件，跳过其它事件
pub async fn expect_event(ws: &mut WsClient, name: &str) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            let frame = ws
                .next()
                .await
                .expect("stream closed")
                .expect("websocket error");
            if let TungsteniteMessage::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).expect("json event");
                if value["event"] == name {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// 加入房间，并以一次活跃成员查询确认加入已被处理
pub async fn join_room(ws: &mut WsClient, room_id: &str, user_id: UserId, user_name: &str) {
    send_event(
        ws,
        serde_json::json!({
            "event": "join_room",
            "data": { "roomId": room_id, "userId": user_id, "userName": user_name }
        }),
    )
    .await;
    send_event(
        ws,
        serde_json::json!({ "event": "get_active_members", "data": { "roomId": room_id } }),
    )
    .await;
    expect_event(ws, "active_members").await;
}
