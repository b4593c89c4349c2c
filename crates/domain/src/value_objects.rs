use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<Uuid>().map(Self)
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识。
    UserId
);
uuid_id!(
    /// 房间唯一标识。
    RoomId
);
uuid_id!(
    /// 消息唯一标识（房间消息和私信共用）。
    MessageId
);
uuid_id!(
    /// 单个实时连接的标识，只在连接存活期间有效。
    ConnectionId
);

/// 私信会话标识。
///
/// 由两个参与者 ID 排序后拼接得到，与谁先发消息无关。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: UserId, b: UserId) -> Self {
        let mut pair = [a.to_string(), b.to_string()];
        pair.sort();
        Self(pair.join("_"))
    }

    /// 直接包装已存储的会话 ID，不做校验。
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_ignores_participant_order() {
        for _ in 0..32 {
            let a = UserId::generate();
            let b = UserId::generate();
            assert_eq!(ConversationId::between(a, b), ConversationId::between(b, a));
        }
    }

    #[test]
    fn conversation_id_joins_sorted_ids() {
        let low = UserId::from(Uuid::from_u128(1));
        let high = UserId::from(Uuid::from_u128(2));
        let id = ConversationId::between(high, low);
        assert_eq!(id.as_str(), format!("{}_{}", low, high));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = RoomId::from(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", Uuid::nil()));
    }
}
