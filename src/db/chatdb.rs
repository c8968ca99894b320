// db/chatdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::chatmodels::{ordered_pair, Conversation, Message};

#[async_trait]
pub trait ChatExt {
    async fn create_or_get_conversation(
        &self,
        user_one_id: Uuid,
        user_two_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Conversation, Error>;

    async fn get_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>, Error>;

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, Error>;

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> Result<Message, Error>;

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, Error>;

    /// Marks the other participant's messages as read, returning how many changed.
    async fn mark_messages_as_read(&self, conversation_id: Uuid, user_id: Uuid)
        -> Result<u64, Error>;

    async fn get_unread_message_count(&self, user_id: Uuid) -> Result<i64, Error>;
}

#[async_trait]
impl ChatExt for DBClient {
    async fn create_or_get_conversation(
        &self,
        user_one_id: Uuid,
        user_two_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Conversation, Error> {
        let (first, second) = ordered_pair(user_one_id, user_two_id);

        let existing = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, participant_one_id, participant_two_id, project_id,
                   last_message_at, created_at
            FROM conversations
            WHERE participant_one_id = $1 AND participant_two_id = $2
              AND project_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(first)
        .bind(second)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (participant_one_id, participant_two_id, project_id)
            VALUES ($1, $2, $3)
            RETURNING id, participant_one_id, participant_two_id, project_id,
                      last_message_at, created_at
            "#,
        )
        .bind(first)
        .bind(second)
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>, Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, participant_one_id, participant_two_id, project_id,
                   last_message_at, created_at
            FROM conversations
            WHERE participant_one_id = $1 OR participant_two_id = $1
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, participant_one_id, participant_two_id, project_id,
                   last_message_at, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> Result<Message, Error> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (conversation_id, sender_id, content)
            VALUES ($1, $2, $3)
            RETURNING id, conversation_id, sender_id, content, is_read, read_at, created_at
            "#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, Error> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, sender_id, content, is_read, read_at, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_messages_as_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = true, read_at = NOW()
            WHERE conversation_id = $1
              AND sender_id != $2
              AND is_read = false
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_unread_message_count(&self, user_id: Uuid) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages m
            INNER JOIN conversations c ON m.conversation_id = c.id
            WHERE (c.participant_one_id = $1 OR c.participant_two_id = $1)
              AND m.sender_id != $1
              AND m.is_read = false
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }
}
