use async_trait::async_trait;
use domain::{
    ConversationId, ConversationSummary, DirectMessage, Message, MessageChange, MessageId,
    Reaction, RepositoryError, RoomId, Timestamp, UserId,
};

/// 消息文档存储
///
/// 房间消息与私信各自独立寻址，修改都是针对单个文档的条件更新。
/// 所有列表查询按写入顺序（旧 → 新）返回。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    // 保存房间消息，返回存储后的权威副本
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    // 条件更新：仅当作者匹配且消息未删除时生效，否则返回 None 且不做任何修改
    async fn update_message_by_author(
        &self,
        id: MessageId,
        author: UserId,
        change: MessageChange,
        now: Timestamp,
    ) -> Result<Option<Message>, RepositoryError>;

    // 追加表情回应，消息不存在时返回 None
    async fn push_reaction(
        &self,
        id: MessageId,
        reaction: Reaction,
    ) -> Result<Option<Message>, RepositoryError>;

    // 房间中早于 before 的最近 limit 条消息
    async fn room_history(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn insert_direct_message(
        &self,
        message: DirectMessage,
    ) -> Result<DirectMessage, RepositoryError>;

    async fn conversation_history(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> Result<Vec<DirectMessage>, RepositoryError>;

    // 将会话中 sender 发出的未读消息标记为已读，返回更新条数
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        now: Timestamp,
    ) -> Result<u64, RepositoryError>;

    // 用户参与的所有会话，按最后一条消息时间倒序
    async fn conversation_summaries(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError>;
}

/// 内存实现的消息存储（用于测试和本地开发）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryMessageStore {
        messages: RwLock<Vec<Message>>,
        direct_messages: RwLock<Vec<DirectMessage>>,
    }

    impl MemoryMessageStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn latest<T: Clone>(items: impl DoubleEndedIterator<Item = T>, limit: u32) -> Vec<T> {
        let mut page: Vec<T> = items.rev().take(limit as usize).collect();
        page.reverse();
        page
    }

    #[async_trait]
    impl MessageStore for MemoryMessageStore {
        async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError> {
            let mut messages = self.messages.write().await;
            if messages.iter().any(|m| m.id == message.id) {
                return Err(RepositoryError::Conflict);
            }
            messages.push(message.clone());
            Ok(message)
        }

        async fn find_message(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
            let messages = self.messages.read().await;
            Ok(messages.iter().find(|m| m.id == id).cloned())
        }

        async fn update_message_by_author(
            &self,
            id: MessageId,
            author: UserId,
            change: MessageChange,
            now: Timestamp,
        ) -> Result<Option<Message>, RepositoryError> {
            let mut messages = self.messages.write().await;
            let Some(message) = messages
                .iter_mut()
                .find(|m| m.id == id && m.is_authored_by(author) && !m.is_deleted)
            else {
                return Ok(None);
            };

            message
                .apply(change, now)
                .map_err(|err| RepositoryError::storage(err.to_string()))?;
            Ok(Some(message.clone()))
        }

        async fn push_reaction(
            &self,
            id: MessageId,
            reaction: Reaction,
        ) -> Result<Option<Message>, RepositoryError> {
            let mut messages = self.messages.write().await;
            Ok(messages.iter_mut().find(|m| m.id == id).map(|message| {
                message.add_reaction(reaction);
                message.clone()
            }))
        }

        async fn room_history(
            &self,
            room_id: RoomId,
            limit: u32,
            before: Option<Timestamp>,
        ) -> Result<Vec<Message>, RepositoryError> {
            let messages = self.messages.read().await;
            let matching = messages
                .iter()
                .filter(|m| m.room_id == room_id)
                .filter(|m| before.map_or(true, |cutoff| m.created_at < cutoff))
                .cloned();
            Ok(latest(matching.collect::<Vec<_>>().into_iter(), limit))
        }

        async fn insert_direct_message(
            &self,
            message: DirectMessage,
        ) -> Result<DirectMessage, RepositoryError> {
            let mut direct_messages = self.direct_messages.write().await;
            if direct_messages.iter().any(|m| m.id == message.id) {
                return Err(RepositoryError::Conflict);
            }
            direct_messages.push(message.clone());
            Ok(message)
        }

        async fn conversation_history(
            &self,
            conversation_id: ConversationId,
            limit: u32,
            before: Option<Timestamp>,
        ) -> Result<Vec<DirectMessage>, RepositoryError> {
            let direct_messages = self.direct_messages.read().await;
            let matching = direct_messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .filter(|m| before.map_or(true, |cutoff| m.created_at < cutoff))
                .cloned();
            Ok(latest(matching.collect::<Vec<_>>().into_iter(), limit))
        }

        async fn mark_conversation_read(
            &self,
            conversation_id: ConversationId,
            sender_id: UserId,
            now: Timestamp,
        ) -> Result<u64, RepositoryError> {
            let mut direct_messages = self.direct_messages.write().await;
            let mut updated = 0;
            for message in direct_messages.iter_mut().filter(|m| {
                m.conversation_id == conversation_id && m.sender_id == sender_id && !m.is_read
            }) {
                message.mark_read(now);
                updated += 1;
            }
            Ok(updated)
        }

        async fn conversation_summaries(
            &self,
            user_id: UserId,
        ) -> Result<Vec<ConversationSummary>, RepositoryError> {
            let direct_messages = self.direct_messages.read().await;
            let mut summaries: HashMap<ConversationId, ConversationSummary> = HashMap::new();

            // 按写入顺序遍历，后写入的消息覆盖 last_message
            for message in direct_messages.iter().filter(|m| m.involves(user_id)) {
                let unread = u64::from(!message.is_read && message.sender_id != user_id);
                summaries
                    .entry(message.conversation_id.clone())
                    .and_modify(|summary| {
                        summary.last_message = message.clone();
                        summary.unread_count += unread;
                    })
                    .or_insert_with(|| ConversationSummary {
                        conversation_id: message.conversation_id.clone(),
                        last_message: message.clone(),
                        unread_count: unread,
                    });
            }

            let mut summaries: Vec<_> = summaries.into_values().collect();
            summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
            Ok(summaries)
        }
    }
}
