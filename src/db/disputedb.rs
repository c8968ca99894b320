// db/disputedb.rs
use async_trait::async_trait;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::disputemodel::{Dispute, DisputeMessage, DisputeStatus};

const DISPUTE_COLUMNS: &str = r#"
    id, contract_id, transaction_id, raised_by, against, reason, description, status,
    resolution, resolution_notes, resolved_by, created_at, resolved_at
"#;

#[async_trait]
pub trait DisputeExt {
    /// Opens a dispute and moves the contract from `active` to `disputed` in
    /// one transaction. `None` when the contract is not active.
    async fn create_dispute(
        &self,
        contract_id: Uuid,
        transaction_id: Option<Uuid>,
        raised_by: Uuid,
        against: Uuid,
        reason: String,
        description: String,
    ) -> Result<Option<Dispute>, sqlx::Error>;

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, sqlx::Error>;

    async fn get_disputes(
        &self,
        status: Option<DisputeStatus>,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Dispute>, sqlx::Error>;

    async fn count_disputes(&self, status: Option<DisputeStatus>) -> Result<i64, sqlx::Error>;

    async fn update_dispute_status(
        &self,
        dispute_id: Uuid,
        from: DisputeStatus,
        to: DisputeStatus,
    ) -> Result<Option<Dispute>, sqlx::Error>;

    /// Settles an unsettled dispute. `None` when it was already settled.
    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        status: DisputeStatus,
        resolution: &str,
        resolution_notes: Option<String>,
        resolved_by: Uuid,
    ) -> Result<Option<Dispute>, sqlx::Error>;

    async fn add_dispute_message(
        &self,
        dispute_id: Uuid,
        sender_id: Uuid,
        message: String,
    ) -> Result<DisputeMessage, sqlx::Error>;

    async fn get_dispute_messages(
        &self,
        dispute_id: Uuid,
    ) -> Result<Vec<DisputeMessage>, sqlx::Error>;
}

#[async_trait]
impl DisputeExt for DBClient {
    async fn create_dispute(
        &self,
        contract_id: Uuid,
        transaction_id: Option<Uuid>,
        raised_by: Uuid,
        against: Uuid,
        reason: String,
        description: String,
    ) -> Result<Option<Dispute>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let disputed = sqlx::query(
            r#"
            UPDATE contracts SET status = 'disputed', updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(contract_id)
        .execute(&mut *tx)
        .await?;

        if disputed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            INSERT INTO disputes (contract_id, transaction_id, raised_by, against, reason, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(contract_id)
        .bind(transaction_id)
        .bind(raised_by)
        .bind(against)
        .bind(reason)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(dispute))
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, sqlx::Error> {
        sqlx::query_as::<_, Dispute>(&format!(
            "SELECT {} FROM disputes WHERE id = $1",
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_disputes(
        &self,
        status: Option<DisputeStatus>,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Dispute>, sqlx::Error> {
        let offset = (page.max(1) - 1) as i64 * limit as i64;

        sqlx::query_as::<_, Dispute>(&format!(
            r#"
            SELECT {} FROM disputes
            WHERE ($1::dispute_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(status)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn count_disputes(&self, status: Option<DisputeStatus>) -> Result<i64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM disputes WHERE ($1::dispute_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_dispute_status(
        &self,
        dispute_id: Uuid,
        from: DisputeStatus,
        to: DisputeStatus,
    ) -> Result<Option<Dispute>, sqlx::Error> {
        sqlx::query_as::<_, Dispute>(&format!(
            r#"
            UPDATE disputes SET status = $3
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
    }

    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        status: DisputeStatus,
        resolution: &str,
        resolution_notes: Option<String>,
        resolved_by: Uuid,
    ) -> Result<Option<Dispute>, sqlx::Error> {
        sqlx::query_as::<_, Dispute>(&format!(
            r#"
            UPDATE disputes SET
                status = $2,
                resolution = $3,
                resolution_notes = $4,
                resolved_by = $5,
                resolved_at = NOW()
            WHERE id = $1 AND status IN ('open', 'under_review')
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .bind(status)
        .bind(resolution)
        .bind(resolution_notes)
        .bind(resolved_by)
        .fetch_optional(&self.pool)
        .await
    }

    async fn add_dispute_message(
        &self,
        dispute_id: Uuid,
        sender_id: Uuid,
        message: String,
    ) -> Result<DisputeMessage, sqlx::Error> {
        sqlx::query_as::<_, DisputeMessage>(
            r#"
            INSERT INTO dispute_messages (dispute_id, sender_id, message)
            VALUES ($1, $2, $3)
            RETURNING id, dispute_id, sender_id, message, created_at
            "#,
        )
        .bind(dispute_id)
        .bind(sender_id)
        .bind(message)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_dispute_messages(
        &self,
        dispute_id: Uuid,
    ) -> Result<Vec<DisputeMessage>, sqlx::Error> {
        sqlx::query_as::<_, DisputeMessage>(
            r#"
            SELECT id, dispute_id, sender_id, message, created_at
            FROM dispute_messages
            WHERE dispute_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(dispute_id)
        .fetch_all(&self.pool)
        .await
    }
}
