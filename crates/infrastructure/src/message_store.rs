//! PostgreSQL 消息存储
//!
//! 每条消息是一行文档，附件和表情回应以 JSONB 存储。修改都是单行条件更新，
//! `seq` 列记录写入顺序，历史查询按它排序。

use application::MessageStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Attachment, ConversationId, ConversationSummary, DirectMessage, Message, MessageChange,
    MessageId, MessageKind, Reaction, RepositoryError, RoomId, Timestamp, UserId,
    DELETED_MESSAGE_PLACEHOLDER,
};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, sender_name, sender_avatar, content, \
     message_type, attachments, reactions, is_edited, is_deleted, created_at, updated_at";

const DIRECT_MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, sender_name, \
     content, message_type, is_read, read_at, created_at";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::Conflict;
        }
    }
    RepositoryError::storage_with_source(err.to_string(), err)
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    sender_name: String,
    sender_avatar: Option<String>,
    content: String,
    message_type: String,
    attachments: Json<Vec<Attachment>>,
    reactions: Json<Vec<Reaction>>,
    is_edited: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let message_type =
            MessageKind::parse(&value.message_type).map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            sender_name: value.sender_name,
            sender_avatar: value.sender_avatar,
            content: value.content,
            message_type,
            attachments: value.attachments.0,
            reactions: value.reactions.0,
            is_edited: value.is_edited,
            is_deleted: value.is_deleted,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DirectMessageRecord {
    id: Uuid,
    conversation_id: String,
    sender_id: Uuid,
    receiver_id: Uuid,
    sender_name: String,
    content: String,
    message_type: String,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DirectMessageRecord> for DirectMessage {
    type Error = RepositoryError;

    fn try_from(value: DirectMessageRecord) -> Result<Self, Self::Error> {
        let message_type =
            MessageKind::parse(&value.message_type).map_err(|err| invalid_data(err.to_string()))?;
        let sender_id = UserId::from(value.sender_id);

        Ok(DirectMessage {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from_raw(value.conversation_id),
            participants: [sender_id, UserId::from(value.receiver_id)],
            sender_id,
            sender_name: value.sender_name,
            content: value.content,
            message_type,
            is_read: value.is_read,
            read_at: value.read_at,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationSummaryRecord {
    #[sqlx(flatten)]
    last_message: DirectMessageRecord,
    unread_count: i64,
}

fn into_messages(records: Vec<MessageRecord>) -> Result<Vec<Message>, RepositoryError> {
    // 查询按 seq 倒序取最近一页，这里翻转为旧 → 新
    records.into_iter().rev().map(Message::try_from).collect()
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO room_messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(&message.sender_name)
        .bind(&message.sender_avatar)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(Json(&message.attachments))
        .bind(Json(&message.reactions))
        .bind(message.is_edited)
        .bind(message.is_deleted)
        .bind(message.created_at)
        .bind(message.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM room_messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn update_message_by_author(
        &self,
        id: MessageId,
        author: UserId,
        change: MessageChange,
        now: Timestamp,
    ) -> Result<Option<Message>, RepositoryError> {
        let (assignments, content) = match change {
            MessageChange::Edit { content } => ("content = $3, is_edited = TRUE", content),
            MessageChange::Delete => (
                "content = $3, is_deleted = TRUE",
                DELETED_MESSAGE_PLACEHOLDER.to_string(),
            ),
        };

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE room_messages
            SET {assignments}, updated_at = $4
            WHERE id = $1 AND sender_id = $2 AND NOT is_deleted
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(Uuid::from(author))
        .bind(content)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn push_reaction(
        &self,
        id: MessageId,
        reaction: Reaction,
    ) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE room_messages
            SET reactions = reactions || $2::jsonb
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(Json(vec![reaction]))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn room_history(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM room_messages
            WHERE room_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY seq DESC
            LIMIT $3
            "#
        ))
        .bind(Uuid::from(room_id))
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        into_messages(records)
    }

    async fn insert_direct_message(
        &self,
        message: DirectMessage,
    ) -> Result<DirectMessage, RepositoryError> {
        let record = sqlx::query_as::<_, DirectMessageRecord>(&format!(
            r#"
            INSERT INTO direct_messages ({DIRECT_MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {DIRECT_MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(message.conversation_id.as_str())
        .bind(Uuid::from(message.sender_id))
        .bind(Uuid::from(message.receiver_id()))
        .bind(&message.sender_name)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(message.is_read)
        .bind(message.read_at)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        DirectMessage::try_from(record)
    }

    async fn conversation_history(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> Result<Vec<DirectMessage>, RepositoryError> {
        let records = sqlx::query_as::<_, DirectMessageRecord>(&format!(
            r#"
            SELECT {DIRECT_MESSAGE_COLUMNS} FROM direct_messages
            WHERE conversation_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY seq DESC
            LIMIT $3
            "#
        ))
        .bind(conversation_id.as_str())
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .rev()
            .map(DirectMessage::try_from)
            .collect()
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE direct_messages
            SET is_read = TRUE, read_at = $3
            WHERE conversation_id = $1 AND sender_id = $2 AND NOT is_read
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(Uuid::from(sender_id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn conversation_summaries(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationSummaryRecord>(
            r#"
            SELECT DISTINCT ON (dm.conversation_id)
                dm.id, dm.conversation_id, dm.sender_id, dm.receiver_id, dm.sender_name,
                dm.content, dm.message_type, dm.is_read, dm.read_at, dm.created_at,
                (
                    SELECT COUNT(*) FROM direct_messages unread
                    WHERE unread.conversation_id = dm.conversation_id
                      AND unread.sender_id <> $1
                      AND NOT unread.is_read
                ) AS unread_count
            FROM direct_messages dm
            WHERE dm.sender_id = $1 OR dm.receiver_id = $1
            ORDER BY dm.conversation_id, dm.seq DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut summaries = records
            .into_iter()
            .map(|record| {
                let last_message = DirectMessage::try_from(record.last_message)?;
                Ok(ConversationSummary {
                    conversation_id: last_message.conversation_id.clone(),
                    last_message,
                    unread_count: u64::try_from(record.unread_count).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
