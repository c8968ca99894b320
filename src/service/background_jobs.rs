// service/background_jobs.rs
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration};

use crate::{
    db::{
        cache::{project_key, CacheHelper},
        contractdb::ContractExt,
    },
    AppState,
};

/// `tokio::time::interval` panics on a zero period.
pub fn release_period(interval_secs: u64) -> Duration {
    Duration::from_secs(interval_secs.max(1))
}

/// Pays out escrowed funds whose hold has elapsed. The first tick fires
/// immediately, so a restart never waits a full period.
pub async fn start_escrow_release_job(app_state: Arc<AppState>) {
    let mut interval = interval(release_period(app_state.env.escrow_release_interval_secs));

    loop {
        interval.tick().await;

        let now = Utc::now();
        tracing::info!("Running escrow release job at {}", now);

        let report = match app_state.escrow_service.run_release(now).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Escrow release job failed: {}", e);
                continue;
            }
        };

        tracing::info!(
            "Escrow release job completed: {} examined, {} released, {} skipped, {} failed",
            report.examined,
            report.released,
            report.skipped,
            report.failed
        );

        for payout in &report.payouts {
            app_state
                .notification_service
                .notify_payment_released(&payout.transaction)
                .await;

            if payout.contract_completed {
                if let Some(contract) = app_state
                    .db_client
                    .get_contract(payout.transaction.contract_id)
                    .await
                    .ok()
                    .flatten()
                {
                    CacheHelper::invalidate(
                        app_state.db_client.redis_client.as_ref(),
                        &[project_key(contract.project_id)],
                    )
                    .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_period_never_zero() {
        assert_eq!(release_period(0), Duration::from_secs(1));
        assert_eq!(release_period(86_400), Duration::from_secs(86_400));
    }
}
