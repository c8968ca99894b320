// db/notificationdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::notificationmodel::Notification;

#[async_trait]
pub trait NotificationExt {
    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Notification, Error>;

    async fn get_user_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, Error>;

    async fn count_user_notifications(&self, user_id: Uuid, unread_only: bool)
        -> Result<i64, Error>;

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Notification>, Error>;

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64, Error>;
}

#[async_trait]
impl NotificationExt for DBClient {
    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Notification, Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (user_id, kind, title, message, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, kind, title, message, data, is_read, created_at
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(message)
        .bind(data)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_user_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, kind, title, message, data, is_read, created_at
            FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR is_read = false)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn count_user_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR is_read = false)
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Notification>, Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications SET is_read = true
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, kind, title, message, data, is_read, created_at
            "#,
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64, Error> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
