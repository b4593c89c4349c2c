use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatSessionHandler, Clock, ConnectionHub, EventDispatcher, MessageHistoryService,
    MessageStore, PresenceRegistry, RoomPresenceHandler, SystemClock,
};
use config::AppConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ConnectionHub>,
    pub dispatcher: Arc<EventDispatcher>,
    pub chat: Arc<ChatSessionHandler>,
    pub history: Arc<MessageHistoryService>,
    pub jwt_service: Arc<JwtService>,
    /// 服务端向每个连接发送 ping 的间隔
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(
        hub: Arc<ConnectionHub>,
        dispatcher: Arc<EventDispatcher>,
        chat: Arc<ChatSessionHandler>,
        history: Arc<MessageHistoryService>,
        jwt_service: Arc<JwtService>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            hub,
            dispatcher,
            chat,
            history,
            jwt_service,
            heartbeat_interval,
        }
    }

    /// 以给定的存储和注册表组装所有处理器
    pub fn assemble(
        store: Arc<dyn MessageStore>,
        registry: Arc<dyn PresenceRegistry>,
        config: &AppConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let hub = Arc::new(ConnectionHub::new(registry.clone(), &config.hub));
        let chat = Arc::new(ChatSessionHandler::new(
            hub.clone(),
            registry.clone(),
            store.clone(),
            clock.clone(),
        ));
        let rooms = Arc::new(RoomPresenceHandler::new(hub.clone(), registry.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(
            hub.clone(),
            registry,
            chat.clone(),
            rooms,
        ));
        let history = Arc::new(MessageHistoryService::new(store, clock));
        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

        Self::new(
            hub,
            dispatcher,
            chat,
            history,
            jwt_service,
            Duration::from_secs(config.presence.heartbeat_seconds),
        )
    }
}
