//! 私信实体定义

use serde::{Deserialize, Serialize};

use crate::entities::message::{validate_content, MessageKind};
use crate::errors::DomainResult;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 私信实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: MessageId,
    /// 由参与者计算出的会话ID
    pub conversation_id: ConversationId,
    /// 发送者、接收者
    pub participants: [UserId; 2],
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageKind,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl DirectMessage {
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        sender_name: String,
        content: String,
        message_type: MessageKind,
        now: Timestamp,
    ) -> DomainResult<Self> {
        validate_content(&content, message_type, false)?;

        Ok(Self {
            id: MessageId::generate(),
            conversation_id: ConversationId::between(sender_id, receiver_id),
            participants: [sender_id, receiver_id],
            sender_id,
            sender_name,
            content,
            message_type,
            is_read: false,
            read_at: None,
            created_at: now,
        })
    }

    pub fn receiver_id(&self) -> UserId {
        self.participants[1]
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// 标记为已读，已读消息保持原有的已读时间
    pub fn mark_read(&mut self, now: Timestamp) {
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(now);
        }
    }
}

/// 会话列表中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub last_message: DirectMessage,
    /// 对方发来且未读的消息数
    pub unread_count: u64,
}
