//! 入站事件分发
//!
//! 把连接上收到的 `ClientEvent` 路由到聊天会话处理器或房间在线处理器，
//! 失败时只向发起连接回送 `error` 事件。

use std::sync::Arc;
use std::time::Duration;

use domain::{ClientEvent, ConnectionId, ServerEvent};
use tracing::{debug, error, warn};

use crate::error::ApplicationError;
use crate::hub::ConnectionHub;
use crate::presence::PresenceRegistry;
use crate::services::{ChatSessionHandler, RoomPresenceHandler};

const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable, please retry";

/// 客户端活动刷新在线状态的最小间隔
const ACTIVITY_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

pub struct EventDispatcher {
    hub: Arc<ConnectionHub>,
    registry: Arc<dyn PresenceRegistry>,
    chat: Arc<ChatSessionHandler>,
    rooms: Arc<RoomPresenceHandler>,
}

impl EventDispatcher {
    pub fn new(
        hub: Arc<ConnectionHub>,
        registry: Arc<dyn PresenceRegistry>,
        chat: Arc<ChatSessionHandler>,
        rooms: Arc<RoomPresenceHandler>,
    ) -> Self {
        Self {
            hub,
            registry,
            chat,
            rooms,
        }
    }

    /// 处理一条入站事件，错误转换为发给发起连接的 `error` 事件
    pub async fn dispatch(&self, connection_id: ConnectionId, event: ClientEvent) {
        let name = event.name();
        debug!(connection_id = %connection_id, event = name, "收到客户端事件");

        if let Err(err) = self.route(connection_id, event).await {
            let message = if err.is_transient() {
                error!(connection_id = %connection_id, event = name, error = %err, "事件处理失败");
                UNAVAILABLE_MESSAGE.to_string()
            } else {
                warn!(connection_id = %connection_id, event = name, error = %err, "事件被拒绝");
                err.to_string()
            };
            self.hub
                .send_to_connection(connection_id, ServerEvent::error(err.code(), message))
                .await;
        }
    }

    async fn route(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        let bound_user = self
            .hub
            .user_of(connection_id)
            .await
            .ok_or(ApplicationError::ConnectionNotFound(connection_id))?;

        if event
            .acting_user()
            .is_some_and(|acting_user| acting_user != bound_user)
        {
            return Err(ApplicationError::IdentityMismatch);
        }

        // 任何通过身份校验的事件都算作活动
        if self
            .hub
            .refresh_due(connection_id, ACTIVITY_REFRESH_INTERVAL)
            .await
        {
            self.heartbeat(connection_id).await;
        }

        match event {
            ClientEvent::JoinRoom(payload) => self.chat.join(connection_id, payload).await?,
            ClientEvent::SendMessage(payload) => {
                self.chat.send(connection_id, payload).await?;
            }
            ClientEvent::SendDirectMessage(payload) => {
                self.chat.send_direct(connection_id, payload).await?;
            }
            ClientEvent::Typing(payload) => self.chat.typing(connection_id, payload).await,
            ClientEvent::AddReaction(payload) => {
                self.chat.add_reaction(payload).await?;
            }
            ClientEvent::EditMessage(payload) => {
                self.chat.edit(payload).await?;
            }
            ClientEvent::DeleteMessage(payload) => {
                self.chat.delete(payload).await?;
            }
            ClientEvent::LeaveRoom(payload) => self.chat.leave(connection_id, payload).await,
            ClientEvent::RoomMemberJoined(payload) => {
                self.rooms.member_joined_active(connection_id, payload).await?;
            }
            ClientEvent::RoomMemberLeft(payload) => {
                self.rooms.member_left_active(connection_id, payload).await?;
            }
            ClientEvent::GetActiveMembers(payload) => {
                self.rooms.query_active(connection_id, payload.room_id).await?;
            }
        }
        Ok(())
    }

    /// 心跳：刷新连接的在线状态过期时间，收到 ping 或 pong 时调用
    pub async fn heartbeat(&self, connection_id: ConnectionId) {
        if let Err(err) = self.registry.refresh(connection_id).await {
            warn!(connection_id = %connection_id, error = %err, "心跳刷新在线状态失败");
        }
    }

    /// 连接关闭时的唯一清理入口，可重复调用
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        if let Some(snapshot) = self.chat.disconnect(connection_id).await {
            self.rooms.release(&snapshot).await;
        }
    }
}
