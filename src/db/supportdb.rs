// db/supportdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::supportmodel::{
    SupportMessage, SupportTicket, SupportTicketWithMessages, TicketCategory, TicketPriority,
    TicketStatus,
};

#[async_trait]
pub trait SupportExt {
    async fn create_support_ticket(
        &self,
        user_id: Uuid,
        title: String,
        description: String,
        category: TicketCategory,
        priority: TicketPriority,
    ) -> Result<SupportTicket, Error>;

    async fn get_support_tickets(
        &self,
        limit: i64,
        offset: i64,
        status: Option<TicketStatus>,
    ) -> Result<Vec<SupportTicket>, Error>;

    async fn count_support_tickets(&self, status: Option<TicketStatus>) -> Result<i64, Error>;

    async fn get_user_support_tickets(&self, user_id: Uuid) -> Result<Vec<SupportTicket>, Error>;

    async fn get_support_ticket(&self, ticket_id: Uuid) -> Result<Option<SupportTicket>, Error>;

    /// Internal notes are only included when `include_internal` is set.
    async fn get_support_ticket_with_messages(
        &self,
        ticket_id: Uuid,
        include_internal: bool,
    ) -> Result<Option<SupportTicketWithMessages>, Error>;

    async fn add_ticket_message(
        &self,
        ticket_id: Uuid,
        user_id: Uuid,
        message: String,
        is_internal: bool,
    ) -> Result<SupportMessage, Error>;

    async fn get_ticket_messages(
        &self,
        ticket_id: Uuid,
        include_internal: bool,
    ) -> Result<Vec<SupportMessage>, Error>;

    async fn update_ticket_status(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<SupportTicket, Error>;

    async fn assign_ticket(&self, ticket_id: Uuid, assigned_to: Uuid)
        -> Result<SupportTicket, Error>;
}

#[async_trait]
impl SupportExt for DBClient {
    async fn create_support_ticket(
        &self,
        user_id: Uuid,
        title: String,
        description: String,
        category: TicketCategory,
        priority: TicketPriority,
    ) -> Result<SupportTicket, Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            INSERT INTO support_tickets (user_id, title, description, category, priority, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(description)
        .bind(category)
        .bind(priority)
        .bind(TicketStatus::Open)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_support_tickets(
        &self,
        limit: i64,
        offset: i64,
        status: Option<TicketStatus>,
    ) -> Result<Vec<SupportTicket>, Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT * FROM support_tickets
            WHERE ($1::ticket_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn count_support_tickets(&self, status: Option<TicketStatus>) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM support_tickets WHERE ($1::ticket_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_user_support_tickets(&self, user_id: Uuid) -> Result<Vec<SupportTicket>, Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT * FROM support_tickets
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_support_ticket(&self, ticket_id: Uuid) -> Result<Option<SupportTicket>, Error> {
        sqlx::query_as::<_, SupportTicket>("SELECT * FROM support_tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_support_ticket_with_messages(
        &self,
        ticket_id: Uuid,
        include_internal: bool,
    ) -> Result<Option<SupportTicketWithMessages>, Error> {
        match self.get_support_ticket(ticket_id).await? {
            Some(ticket) => {
                let messages = self.get_ticket_messages(ticket_id, include_internal).await?;
                Ok(Some(SupportTicketWithMessages { ticket, messages }))
            }
            None => Ok(None),
        }
    }

    async fn add_ticket_message(
        &self,
        ticket_id: Uuid,
        user_id: Uuid,
        message: String,
        is_internal: bool,
    ) -> Result<SupportMessage, Error> {
        let mut tx = self.pool.begin().await?;

        let msg = sqlx::query_as::<_, SupportMessage>(
            r#"
            INSERT INTO support_messages (ticket_id, user_id, message, is_internal)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(ticket_id)
        .bind(user_id)
        .bind(message)
        .bind(is_internal)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE support_tickets SET updated_at = NOW() WHERE id = $1")
            .bind(ticket_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(msg)
    }

    async fn get_ticket_messages(
        &self,
        ticket_id: Uuid,
        include_internal: bool,
    ) -> Result<Vec<SupportMessage>, Error> {
        sqlx::query_as::<_, SupportMessage>(
            r#"
            SELECT * FROM support_messages
            WHERE ticket_id = $1 AND ($2 OR is_internal = false)
            ORDER BY created_at ASC
            "#,
        )
        .bind(ticket_id)
        .bind(include_internal)
        .fetch_all(&self.pool)
        .await
    }

    async fn update_ticket_status(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<SupportTicket, Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            UPDATE support_tickets
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(ticket_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn assign_ticket(
        &self,
        ticket_id: Uuid,
        assigned_to: Uuid,
    ) -> Result<SupportTicket, Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            UPDATE support_tickets
            SET assigned_to = $1,
                status = CASE WHEN status = 'open' THEN 'in_progress'::ticket_status ELSE status END,
                updated_at = NOW()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(assigned_to)
        .bind(ticket_id)
        .fetch_one(&self.pool)
        .await
    }
}
