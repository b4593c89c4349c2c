//! 客户端发往服务端的事件

use serde::{Deserialize, Serialize};

use crate::entities::message::{Attachment, MessageKind};
use crate::value_objects::{MessageId, RoomId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(JoinRoomPayload),
    SendMessage(SendMessagePayload),
    SendDirectMessage(SendDirectMessagePayload),
    Typing(TypingPayload),
    AddReaction(AddReactionPayload),
    EditMessage(EditMessagePayload),
    DeleteMessage(DeleteMessagePayload),
    LeaveRoom(LeaveRoomPayload),
    RoomMemberJoined(RoomMemberJoinedPayload),
    RoomMemberLeft(RoomMemberLeftPayload),
    GetActiveMembers(GetActiveMembersPayload),
}

impl ClientEvent {
    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::SendDirectMessage(_) => "send_direct_message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::AddReaction(_) => "add_reaction",
            ClientEvent::EditMessage(_) => "edit_message",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::RoomMemberJoined(_) => "room_member_joined",
            ClientEvent::RoomMemberLeft(_) => "room_member_left",
            ClientEvent::GetActiveMembers(_) => "get_active_members",
        }
    }

    /// 事件中声明的操作者，需与连接绑定的身份一致
    pub fn acting_user(&self) -> Option<UserId> {
        match self {
            ClientEvent::JoinRoom(p) => Some(p.user_id),
            ClientEvent::SendMessage(p) => Some(p.user_id),
            ClientEvent::SendDirectMessage(p) => Some(p.sender_id),
            ClientEvent::Typing(p) => Some(p.user_id),
            ClientEvent::AddReaction(p) => Some(p.user_id),
            ClientEvent::EditMessage(p) => Some(p.user_id),
            ClientEvent::DeleteMessage(p) => Some(p.user_id),
            ClientEvent::LeaveRoom(p) => Some(p.user_id),
            ClientEvent::RoomMemberJoined(p) => Some(p.user_id),
            ClientEvent::RoomMemberLeft(p) => Some(p.user_id),
            ClientEvent::GetActiveMembers(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    #[serde(default)]
    pub user_avatar: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDirectMessagePayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_name: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReactionPayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: MessageId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMemberJoinedPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMemberLeftPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetActiveMembersPayload {
    pub room_id: RoomId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn parses_send_message_with_defaults() {
        let room_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let raw = json!({
            "event": "send_message",
            "data": {
                "roomId": room_id,
                "userId": user_id,
                "userName": "alice",
                "content": "hello"
            }
        });

        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.room_id, RoomId::from(room_id));
                assert_eq!(payload.message_type, MessageKind::Text);
                assert!(payload.attachments.is_empty());
                assert!(payload.user_avatar.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn get_active_members_has_no_acting_user() {
        let event = ClientEvent::GetActiveMembers(GetActiveMembersPayload {
            room_id: RoomId::generate(),
        });
        assert_eq!(event.name(), "get_active_members");
        assert!(event.acting_user().is_none());
    }

    #[test]
    fn rejects_unknown_event() {
        let raw = json!({ "event": "shout", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }
}
