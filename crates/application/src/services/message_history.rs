//! 消息历史查询服务
//!
//! 房间历史和私信会话都按时间游标（`before`）向前翻页，结果按旧 → 新返回。

use std::sync::Arc;

use domain::{
    ConversationId, ConversationSummary, DirectMessage, Message, RoomId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::repository::MessageStore;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 历史查询参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// 只返回早于该时间的消息
    pub before: Option<Timestamp>,
}

impl HistoryQuery {
    fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

pub struct MessageHistoryService {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl MessageHistoryService {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn room_history(
        &self,
        room_id: RoomId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, ApplicationError> {
        let messages = self
            .store
            .room_history(room_id, query.page_size(), query.before)
            .await?;
        Ok(messages)
    }

    /// 打开与 peer 的私信会话，并把对方发来的未读消息标记为已读
    ///
    /// 返回的消息是标记之前的状态，客户端据此区分本次新读到的消息。
    pub async fn open_conversation(
        &self,
        user_id: UserId,
        peer_id: UserId,
        query: HistoryQuery,
    ) -> Result<Vec<DirectMessage>, ApplicationError> {
        let conversation_id = ConversationId::between(user_id, peer_id);

        let messages = self
            .store
            .conversation_history(conversation_id.clone(), query.page_size(), query.before)
            .await?;

        let marked = self
            .store
            .mark_conversation_read(conversation_id.clone(), peer_id, self.clock.now())
            .await?;
        if marked > 0 {
            debug!(conversation_id = %conversation_id, marked, "私信已标记为已读");
        }

        Ok(messages)
    }

    /// 用户的会话列表，最近活跃的在前
    pub async fn conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, ApplicationError> {
        Ok(self.store.conversation_summaries(user_id).await?)
    }
}
