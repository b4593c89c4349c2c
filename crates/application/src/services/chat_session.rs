use std::sync::Arc;

use domain::{
    AddReactionPayload, ConnectionId, DeleteMessagePayload, DirectMessage, DomainError,
    EditMessagePayload, JoinRoomPayload, LeaveRoomPayload, Message, MessageChange, MessageId,
    PresenceNotice, Reaction, SendDirectMessagePayload, SendMessagePayload,
    SenderProfile, ServerEvent, TypingNotice, TypingPayload, UserId,
};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::hub::{ConnectionHub, ConnectionSnapshot};
use crate::presence::PresenceRegistry;
use crate::repository::MessageStore;

const MAX_MODIFY_ATTEMPTS: u32 = 2;

/// 聊天会话处理器
///
/// 处理单个连接上的消息生命周期：加入、发送、编辑、删除、回应、输入提示和私信。
/// 持久化成功后才会广播，存储副本是唯一权威。
pub struct ChatSessionHandler {
    hub: Arc<ConnectionHub>,
    registry: Arc<dyn PresenceRegistry>,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl ChatSessionHandler {
    pub fn new(
        hub: Arc<ConnectionHub>,
        registry: Arc<dyn PresenceRegistry>,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hub,
            registry,
            store,
            clock,
        }
    }

    /// 加入房间频道，并通知房间内其他连接
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        payload: JoinRoomPayload,
    ) -> Result<(), ApplicationError> {
        let newly_joined = self.hub.subscribe(connection_id, payload.room_id).await?;

        if !newly_joined {
            debug!(connection_id = %connection_id, room_id = %payload.room_id, "重复加入房间");
            return Ok(());
        }

        let notice = PresenceNotice {
            room_id: payload.room_id,
            user_id: payload.user_id,
            user_name: payload.user_name,
            timestamp: self.clock.now(),
        };
        self.hub
            .broadcast_to_room(
                payload.room_id,
                ServerEvent::UserJoined(notice),
                Some(connection_id),
            )
            .await;

        info!(room_id = %payload.room_id, user_id = %payload.user_id, "用户加入房间");
        Ok(())
    }

    /// 发送房间消息：先持久化，再把存储后的消息广播给整个房间（包括发送者）
    pub async fn send(
        &self,
        connection_id: ConnectionId,
        payload: SendMessagePayload,
    ) -> Result<Message, ApplicationError> {
        let message = Message::new(
            payload.room_id,
            payload.user_id,
            SenderProfile {
                name: payload.user_name,
                avatar: payload.user_avatar,
            },
            payload.content,
            payload.message_type,
            payload.attachments,
            self.clock.now(),
        )?;

        let stored = self.store.insert_message(message).await?;
        let delivered = self
            .hub
            .broadcast_to_room(stored.room_id, ServerEvent::NewMessage(stored.clone()), None)
            .await;

        debug!(
            connection_id = %connection_id,
            room_id = %stored.room_id,
            message_id = %stored.id,
            delivered,
            "房间消息已发送"
        );
        Ok(stored)
    }

    /// 发送私信：持久化后尝试推送给接收者，并始终回显给发送者当前连接
    pub async fn send_direct(
        &self,
        connection_id: ConnectionId,
        payload: SendDirectMessagePayload,
    ) -> Result<DirectMessage, ApplicationError> {
        let message = DirectMessage::new(
            payload.sender_id,
            payload.receiver_id,
            payload.sender_name,
            payload.content,
            payload.message_type,
            self.clock.now(),
        )?;

        let stored = self.store.insert_direct_message(message).await?;

        // 接收者离线时只落库，等待其下次拉取
        match self
            .hub
            .send_to_user(payload.receiver_id, ServerEvent::NewDirectMessage(stored.clone()))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(receiver_id = %payload.receiver_id, message_id = %stored.id, "接收者不在线")
            }
            Err(err) => {
                warn!(receiver_id = %payload.receiver_id, error = %err, "私信推送失败")
            }
        }

        self.hub
            .send_to_connection(connection_id, ServerEvent::NewDirectMessage(stored.clone()))
            .await;
        Ok(stored)
    }

    /// 输入提示，只广播不持久化
    pub async fn typing(&self, connection_id: ConnectionId, payload: TypingPayload) {
        let notice = TypingNotice {
            room_id: payload.room_id,
            user_id: payload.user_id,
            user_name: payload.user_name,
            is_typing: payload.is_typing,
        };
        self.hub
            .broadcast_to_room(
                payload.room_id,
                ServerEvent::UserTyping(notice),
                Some(connection_id),
            )
            .await;
    }

    /// 追加表情回应，任何参与者都可以回应。消息不存在时只记录日志
    pub async fn add_reaction(
        &self,
        payload: AddReactionPayload,
    ) -> Result<Option<Message>, ApplicationError> {
        if payload.emoji.trim().is_empty() {
            return Err(DomainError::validation_error("emoji", "表情不能为空").into());
        }

        let reaction = Reaction {
            user_id: payload.user_id,
            emoji: payload.emoji,
            timestamp: self.clock.now(),
        };

        let Some(updated) = self.store.push_reaction(payload.message_id, reaction).await? else {
            warn!(message_id = %payload.message_id, user_id = %payload.user_id, "回应的消息不存在");
            return Ok(None);
        };

        self.hub
            .broadcast_to_room(
                updated.room_id,
                ServerEvent::MessageUpdated(updated.clone()),
                None,
            )
            .await;
        Ok(Some(updated))
    }

    /// 编辑消息，仅作者可编辑且消息未删除
    pub async fn edit(&self, payload: EditMessagePayload) -> Result<Message, ApplicationError> {
        let change = MessageChange::Edit {
            content: payload.new_content,
        };
        self.modify(payload.message_id, payload.user_id, change).await
    }

    /// 软删除消息，正文替换为占位文本
    pub async fn delete(&self, payload: DeleteMessagePayload) -> Result<Message, ApplicationError> {
        self.modify(payload.message_id, payload.user_id, MessageChange::Delete)
            .await
    }

    async fn modify(
        &self,
        message_id: MessageId,
        user_id: UserId,
        change: MessageChange,
    ) -> Result<Message, ApplicationError> {
        if let MessageChange::Edit { content } = &change {
            domain::validate_content(content, domain::MessageKind::Text, false)?;
        }

        let mut attempts = 0;
        let updated = loop {
            attempts += 1;
            let now = self.clock.now();
            if let Some(updated) = self
                .store
                .update_message_by_author(message_id, user_id, change.clone(), now)
                .await?
            {
                break updated;
            }

            match self.classify_rejection(message_id, user_id).await? {
                Some(rejection) => return Err(rejection),
                // 条件更新与读取之间消息状态发生了变化，重试一次
                None if attempts < MAX_MODIFY_ATTEMPTS => continue,
                None => return Err(ApplicationError::ConcurrentModification(message_id)),
            }
        };

        self.hub
            .broadcast_to_room(
                updated.room_id,
                ServerEvent::MessageUpdated(updated.clone()),
                None,
            )
            .await;

        info!(
            message_id = %message_id,
            user_id = %user_id,
            deleted = updated.is_deleted,
            "消息已更新"
        );
        Ok(updated)
    }

    // 条件更新未命中时，读取当前状态区分具体原因。当前状态允许修改时返回 None
    async fn classify_rejection(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<ApplicationError>, ApplicationError> {
        let rejection = match self.store.find_message(message_id).await? {
            None => ApplicationError::MessageNotFound(message_id),
            Some(message) if !message.is_authored_by(user_id) => {
                ApplicationError::NotMessageAuthor(message_id)
            }
            Some(message) if message.is_deleted => ApplicationError::MessageDeleted(message_id),
            Some(_) => return Ok(None),
        };

        debug!(message_id = %message_id, user_id = %user_id, error = %rejection, "消息修改被拒绝");
        Ok(Some(rejection))
    }

    /// 离开房间频道，并通知剩余订阅者
    pub async fn leave(&self, connection_id: ConnectionId, payload: LeaveRoomPayload) {
        if !self.hub.unsubscribe(connection_id, payload.room_id).await {
            debug!(connection_id = %connection_id, room_id = %payload.room_id, "未订阅的房间，忽略离开");
            return;
        }

        let notice = PresenceNotice {
            room_id: payload.room_id,
            user_id: payload.user_id,
            user_name: payload.user_name,
            timestamp: self.clock.now(),
        };
        self.hub
            .broadcast_to_room(
                payload.room_id,
                ServerEvent::UserLeft(notice),
                Some(connection_id),
            )
            .await;

        info!(room_id = %payload.room_id, user_id = %payload.user_id, "用户离开房间");
    }

    /// 断开连接：解析绑定用户，清除在线状态并注销所有订阅
    ///
    /// 注册表条目可能已过期或不可用，都不影响本地清理。
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<ConnectionSnapshot> {
        match self.registry.lookup_user(connection_id).await {
            Ok(Some(user_id)) => {
                debug!(connection_id = %connection_id, user_id = %user_id, "断开已绑定的连接")
            }
            Ok(None) => debug!(connection_id = %connection_id, "在线状态绑定已不存在"),
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "查询在线状态绑定失败")
            }
        }

        self.hub.unregister_all(connection_id).await
    }
}
