// db/escrowdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::{
    contractmodel::ContractStatus,
    transactionmodel::{NewTransaction, Transaction, TransactionStatus},
};

const TRANSACTION_COLUMNS: &str = r#"
    id, contract_id, milestone_id, client_id, provider_id, amount, platform_fee, currency,
    status, description, gateway_payment_id, gateway_transfer_id, gateway_refund_id,
    refunded_amount, escrow_date, released_at, release_attempts, last_error, created_at, updated_at
"#;

/// What a finished payout changed besides the transaction itself.
#[derive(Debug, Clone)]
pub struct PayoutOutcome {
    pub transaction: Transaction,
    pub milestone_paid: bool,
    pub contract_completed: bool,
}

/// Refund recorded alongside a payout when held funds are split.
#[derive(Debug, Clone)]
pub struct PartialRefund {
    pub refund_id: String,
    pub amount: BigDecimal,
}

/// Store operations behind the escrow release path. Every status change is a
/// conditional update so concurrent callers cannot move the same funds twice.
#[async_trait]
pub trait EscrowExt: Send + Sync {
    async fn get_transactions_due_for_release(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Transaction>, sqlx::Error>;

    /// Transactions on a contract whose money has not reached a final state.
    async fn get_live_transactions(
        &self,
        contract_id: Uuid,
    ) -> Result<Vec<Transaction>, sqlx::Error>;

    async fn get_contract_status(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ContractStatus>, sqlx::Error>;

    /// `held_in_escrow -> released`. With `require_open_contract` the claim also
    /// fails unless the contract is active or completed. `None` means another
    /// caller got there first or the guard failed.
    async fn claim_escrow_release(
        &self,
        transaction_id: Uuid,
        require_open_contract: bool,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    /// `released -> paid_out`, marks the milestone paid and completes the
    /// contract once every milestone is paid.
    async fn complete_payout(
        &self,
        transaction_id: Uuid,
        transfer_id: Option<String>,
        refund: Option<PartialRefund>,
    ) -> Result<Option<PayoutOutcome>, sqlx::Error>;

    /// `released -> held_in_escrow` after a failed transfer.
    async fn revert_escrow_release(
        &self,
        transaction_id: Uuid,
        error: String,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    /// `held_in_escrow -> refunded`.
    async fn mark_refunded(
        &self,
        transaction_id: Uuid,
        refund_id: String,
        amount: BigDecimal,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    async fn get_payout_account(&self, user_id: Uuid) -> Result<Option<String>, sqlx::Error>;
}

/// Ledger reads and webhook-driven writes.
#[async_trait]
pub trait TransactionExt {
    async fn create_transaction(
        &self,
        transaction: NewTransaction,
        gateway_payment_id: String,
    ) -> Result<Transaction, sqlx::Error>;

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    async fn get_transaction_by_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    async fn get_user_transactions(
        &self,
        user_id: Uuid,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Transaction>, sqlx::Error>;

    async fn count_user_transactions(&self, user_id: Uuid) -> Result<i64, sqlx::Error>;

    async fn get_live_milestone_funding(
        &self,
        milestone_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    /// Compare-and-set on the transaction status. Entering `held_in_escrow`
    /// stamps the escrow date.
    async fn update_transaction_status(
        &self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<Option<Transaction>, sqlx::Error>;
}

#[async_trait]
impl EscrowExt for DBClient {
    async fn get_transactions_due_for_release(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {} FROM transactions t
            WHERE t.status = 'held_in_escrow'
            AND t.escrow_date IS NOT NULL
            AND t.escrow_date <= $1
            AND t.release_attempts < $2
            AND EXISTS (
                SELECT 1 FROM contracts c
                WHERE c.id = t.contract_id AND c.status IN ('active', 'completed')
            )
            AND (
                t.milestone_id IS NULL
                OR EXISTS (
                    SELECT 1 FROM milestones m
                    WHERE m.id = t.milestone_id AND m.status IN ('submitted', 'approved')
                )
            )
            ORDER BY t.escrow_date ASC
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(cutoff)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_live_transactions(
        &self,
        contract_id: Uuid,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE contract_id = $1
            AND status IN ('pending', 'processing', 'held_in_escrow', 'released')
            ORDER BY created_at ASC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_contract_status(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ContractStatus>, sqlx::Error> {
        sqlx::query_scalar("SELECT status FROM contracts WHERE id = $1")
            .bind(contract_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn claim_escrow_release(
        &self,
        transaction_id: Uuid,
        require_open_contract: bool,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions t SET status = 'released', updated_at = NOW()
            WHERE t.id = $1
            AND t.status = 'held_in_escrow'
            AND (
                NOT $2
                OR EXISTS (
                    SELECT 1 FROM contracts c
                    WHERE c.id = t.contract_id AND c.status IN ('active', 'completed')
                )
            )
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(require_open_contract)
        .fetch_optional(&self.pool)
        .await
    }

    async fn complete_payout(
        &self,
        transaction_id: Uuid,
        transfer_id: Option<String>,
        refund: Option<PartialRefund>,
    ) -> Result<Option<PayoutOutcome>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let (refund_id, refunded_amount) = match refund {
            Some(refund) => (Some(refund.refund_id), Some(refund.amount)),
            None => (None, None),
        };

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions SET
                status = 'paid_out',
                gateway_transfer_id = $2,
                gateway_refund_id = COALESCE($3, gateway_refund_id),
                refunded_amount = COALESCE($4, refunded_amount),
                released_at = NOW(),
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'released'
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(transfer_id)
        .bind(refund_id)
        .bind(refunded_amount)
        .fetch_optional(&mut *tx)
        .await?;

        let transaction = match transaction {
            Some(transaction) => transaction,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let mut milestone_paid = false;
        if let Some(milestone_id) = transaction.milestone_id {
            let result = sqlx::query(
                r#"
                UPDATE milestones m SET status = 'paid', paid_at = NOW(), updated_at = NOW()
                FROM contracts c
                WHERE m.id = $1
                AND c.id = m.contract_id
                AND c.status IN ('active', 'completed')
                AND m.status IN ('submitted', 'approved')
                "#,
            )
            .bind(milestone_id)
            .execute(&mut *tx)
            .await?;
            milestone_paid = result.rows_affected() > 0;
        }

        let completed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE contracts SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            AND status = 'active'
            AND NOT EXISTS (
                SELECT 1 FROM milestones WHERE contract_id = $1 AND status <> 'paid'
            )
            RETURNING project_id
            "#,
        )
        .bind(transaction.contract_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(project_id) = completed {
            sqlx::query(
                "UPDATE projects SET status = 'completed', updated_at = NOW() WHERE id = $1",
            )
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Some(PayoutOutcome {
            transaction,
            milestone_paid,
            contract_completed: completed.is_some(),
        }))
    }

    async fn revert_escrow_release(
        &self,
        transaction_id: Uuid,
        error: String,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions SET
                status = 'held_in_escrow',
                release_attempts = release_attempts + 1,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'released'
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_refunded(
        &self,
        transaction_id: Uuid,
        refund_id: String,
        amount: BigDecimal,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions SET
                status = 'refunded',
                gateway_refund_id = $2,
                refunded_amount = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'held_in_escrow'
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(refund_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_payout_account(&self, user_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        let account: Option<Option<String>> =
            sqlx::query_scalar("SELECT payout_account_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(account.flatten())
    }
}

#[async_trait]
impl TransactionExt for DBClient {
    async fn create_transaction(
        &self,
        transaction: NewTransaction,
        gateway_payment_id: String,
    ) -> Result<Transaction, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions
                (contract_id, milestone_id, client_id, provider_id, amount, platform_fee,
                 currency, description, gateway_payment_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction.contract_id)
        .bind(transaction.milestone_id)
        .bind(transaction.client_id)
        .bind(transaction.provider_id)
        .bind(transaction.amount)
        .bind(transaction.platform_fee)
        .bind(transaction.currency)
        .bind(transaction.description)
        .bind(gateway_payment_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_transaction_by_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE gateway_payment_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_user_transactions(
        &self,
        user_id: Uuid,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let offset = (page.max(1) - 1) as i64 * limit as i64;

        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE client_id = $1 OR provider_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn count_user_transactions(&self, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE client_id = $1 OR provider_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_live_milestone_funding(
        &self,
        milestone_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE milestone_id = $1
            AND status IN ('pending', 'processing', 'held_in_escrow', 'released', 'paid_out')
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(milestone_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_transaction_status(
        &self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions SET
                status = $3,
                escrow_date = CASE
                    WHEN $3 = 'held_in_escrow'::transaction_status THEN NOW()
                    ELSE escrow_date
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
    }
}
