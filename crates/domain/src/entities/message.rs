//! 房间消息实体定义
//!
//! 消息只做软删除：删除后正文替换为固定占位文本，记录本身保留。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 删除后替换正文的占位文本
pub const DELETED_MESSAGE_PLACEHOLDER: &str = "This message was deleted";

/// 消息正文最大长度（字符数）
pub const MAX_CONTENT_CHARS: usize = 4000;

/// 消息类型枚举
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// 文本消息
    #[default]
    Text,
    /// 附件消息
    Attachment,
    /// 系统消息
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Attachment => "attachment",
            MessageKind::System => "system",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "text" => Ok(MessageKind::Text),
            "attachment" => Ok(MessageKind::Attachment),
            "system" => Ok(MessageKind::System),
            other => Err(DomainError::validation_error(
                "message_type",
                format!("未知的消息类型: {other}"),
            )),
        }
    }
}

/// 消息附件信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// 文件URL
    pub url: String,
    /// 文件名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// MIME类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// 文件大小（字节）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// 表情回应，同一用户可以对同一表情重复回应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub timestamp: Timestamp,
}

/// 发送者展示信息，发送时复制进消息，之后不再随用户资料更新
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub name: String,
    pub avatar: Option<String>,
}

/// 作者对消息的一次条件修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageChange {
    /// 编辑正文
    Edit { content: String },
    /// 软删除
    Delete,
}

/// 房间消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// 消息唯一ID
    pub id: MessageId,
    /// 所属房间
    pub room_id: RoomId,
    /// 发送者ID
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    /// 消息内容
    pub content: String,
    pub message_type: MessageKind,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub is_edited: bool,
    pub is_deleted: bool,
    /// 服务端分配的发送时间
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    /// 创建新的房间消息，ID 和时间戳由服务端分配
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        sender: SenderProfile,
        content: String,
        message_type: MessageKind,
        attachments: Vec<Attachment>,
        now: Timestamp,
    ) -> DomainResult<Self> {
        validate_content(&content, message_type, !attachments.is_empty())?;

        Ok(Self {
            id: MessageId::generate(),
            room_id,
            sender_id,
            sender_name: sender.name,
            sender_avatar: sender.avatar,
            content,
            message_type,
            attachments,
            reactions: Vec::new(),
            is_edited: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_authored_by(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }

    /// 应用作者的修改。已删除的消息拒绝任何修改。
    pub fn apply(&mut self, change: MessageChange, now: Timestamp) -> DomainResult<()> {
        if self.is_deleted {
            return Err(DomainError::MessageDeleted);
        }

        match change {
            MessageChange::Edit { content } => {
                validate_content(&content, MessageKind::Text, false)?;
                self.content = content;
                self.is_edited = true;
            }
            MessageChange::Delete => {
                self.content = DELETED_MESSAGE_PLACEHOLDER.to_string();
                self.is_deleted = true;
            }
        }
        self.updated_at = now;
        Ok(())
    }

    /// 追加表情回应，不去重
    pub fn add_reaction(&mut self, reaction: Reaction) {
        self.reactions.push(reaction);
    }
}

/// 校验消息正文。附件消息允许正文为空。
pub fn validate_content(
    content: &str,
    kind: MessageKind,
    has_attachments: bool,
) -> DomainResult<()> {
    let blank = content.trim().is_empty();
    if blank && !(kind == MessageKind::Attachment && has_attachments) {
        return Err(DomainError::validation_error("content", "消息内容不能为空"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(DomainError::validation_error(
            "content",
            format!("消息内容不能超过{MAX_CONTENT_CHARS}个字符"),
        ));
    }
    Ok(())
}
