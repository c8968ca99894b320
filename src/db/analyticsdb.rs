// db/analyticsdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;

use super::db::DBClient;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusCount {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EscrowTotals {
    pub held: BigDecimal,
    pub paid_out: BigDecimal,
    pub refunded: BigDecimal,
    pub platform_revenue: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAnalytics {
    pub users_by_role: Vec<StatusCount>,
    pub projects_by_status: Vec<StatusCount>,
    pub contracts_by_status: Vec<StatusCount>,
    pub escrow: EscrowTotals,
    pub open_disputes: i64,
    pub open_tickets: i64,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait AnalyticsExt {
    async fn get_platform_analytics(&self) -> Result<PlatformAnalytics, sqlx::Error>;
}

#[async_trait]
impl AnalyticsExt for DBClient {
    async fn get_platform_analytics(&self) -> Result<PlatformAnalytics, sqlx::Error> {
        let users_by_role = sqlx::query_as::<_, StatusCount>(
            "SELECT role::text AS key, COUNT(*) AS count FROM users GROUP BY role ORDER BY role",
        )
        .fetch_all(&self.pool)
        .await?;

        let projects_by_status = sqlx::query_as::<_, StatusCount>(
            "SELECT status::text AS key, COUNT(*) AS count FROM projects GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let contracts_by_status = sqlx::query_as::<_, StatusCount>(
            "SELECT status::text AS key, COUNT(*) AS count FROM contracts GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let escrow = sqlx::query_as::<_, EscrowTotals>(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE status IN ('held_in_escrow', 'released')), 0) AS held,
                COALESCE(SUM(amount - COALESCE(refunded_amount, 0)) FILTER (WHERE status = 'paid_out'), 0) AS paid_out,
                COALESCE(SUM(COALESCE(refunded_amount, amount)) FILTER (WHERE status = 'refunded'), 0)
                    + COALESCE(SUM(refunded_amount) FILTER (WHERE status = 'paid_out'), 0) AS refunded,
                COALESCE(SUM(platform_fee) FILTER (WHERE status = 'paid_out'), 0) AS platform_revenue
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let open_disputes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM disputes WHERE status IN ('open', 'under_review')",
        )
        .fetch_one(&self.pool)
        .await?;

        let open_tickets: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM support_tickets WHERE status IN ('open', 'in_progress')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(PlatformAnalytics {
            users_by_role,
            projects_by_status,
            contracts_by_status,
            escrow,
            open_disputes,
            open_tickets,
            generated_at: Utc::now(),
        })
    }
}
