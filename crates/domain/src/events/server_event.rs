//! 服务端推送给客户端的事件

use serde::{Deserialize, Serialize};

use crate::entities::{DirectMessage, Message};
use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoined(PresenceNotice),
    NewMessage(Message),
    NewDirectMessage(DirectMessage),
    UserTyping(TypingNotice),
    MessageUpdated(Message),
    UserLeft(PresenceNotice),
    RoomStatsUpdated(RoomStats),
    ActiveMembers(ActiveMembers),
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            code: code.into(),
            message: message.into(),
        })
    }

    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::NewDirectMessage(_) => "new_direct_message",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::MessageUpdated(_) => "message_updated",
            ServerEvent::UserLeft(_) => "user_left",
            ServerEvent::RoomStatsUpdated(_) => "room_stats_updated",
            ServerEvent::ActiveMembers(_) => "active_members",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// 用户加入/离开房间频道的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    pub is_typing: bool,
}

/// 房间活跃人数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: RoomId,
    pub active_members: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMembers {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_wire_shape() {
        let event = ServerEvent::error("NOT_FOUND", "message not found");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["code"], "NOT_FOUND");
    }

    #[test]
    fn stats_event_uses_camel_case() {
        let event = ServerEvent::RoomStatsUpdated(RoomStats {
            room_id: RoomId::generate(),
            active_members: 3,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "room_stats_updated");
        assert_eq!(json["data"]["activeMembers"], 3);
    }
}
