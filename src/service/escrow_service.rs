// service/escrow_service.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use num_traits::Zero;
use serde::Serialize;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    config::Config,
    db::{
        escrowdb::{EscrowExt, PartialRefund, PayoutOutcome, TransactionExt},
        DBClient,
    },
    models::{
        contractmodel::{Contract, ContractStatus, Milestone, MilestoneStatus, TransitionError},
        disputemodel::DisputeResolution,
        transactionmodel::{NewTransaction, Transaction, TransactionStatus},
    },
    service::{
        error::ServiceError,
        payment_provider::{GatewayEvent, PaymentGateway},
    },
    utils::currency::{payout_amount, platform_fee, split_amount, to_minor_units},
};

#[derive(Debug, Clone, Copy)]
pub struct ReleasePolicy {
    pub hold_days: i64,
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl ReleasePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hold_days: config.escrow_hold_days,
            max_attempts: config.escrow_max_release_attempts,
            batch_size: 500,
        }
    }

    /// Funds escrowed at or before this instant have served their hold. A hold
    /// too long to represent leaves nothing due.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(self.hold_days)
            .and_then(|hold| now.checked_sub_signed(hold))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReleaseReport {
    pub examined: usize,
    pub released: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip)]
    pub payouts: Vec<PayoutOutcome>,
}

#[derive(Debug)]
pub enum ReleaseOutcome {
    Released(PayoutOutcome),
    /// Someone else already moved the funds, or the contract guard failed.
    Skipped,
    /// The funds went back to escrow; the message is stored on the transaction.
    Failed(String),
}

async fn fail_release<S>(store: &S, transaction_id: Uuid, message: String) -> ReleaseOutcome
where
    S: EscrowExt + ?Sized,
{
    if let Err(e) = store
        .revert_escrow_release(transaction_id, message.clone())
        .await
    {
        tracing::error!(
            "Failed to return transaction {} to escrow: {}",
            transaction_id,
            e
        );
    }
    ReleaseOutcome::Failed(message)
}

/// Moves one held transaction out to the freelancer: claim, transfer, then
/// record the payout. A lost claim is a skip, so repeated calls are harmless.
pub async fn release_held_transaction<S, G>(
    store: &S,
    gateway: &G,
    transaction: &Transaction,
    require_open_contract: bool,
) -> Result<ReleaseOutcome, ServiceError>
where
    S: EscrowExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let claimed = match store
        .claim_escrow_release(transaction.id, require_open_contract)
        .await?
    {
        Some(claimed) => claimed,
        None => return Ok(ReleaseOutcome::Skipped),
    };

    let payout = payout_amount(&claimed.amount, &claimed.platform_fee);

    let transfer_id = if payout.is_zero() {
        None
    } else {
        let destination = match store.get_payout_account(claimed.provider_id).await? {
            Some(account) => account,
            None => {
                let message = format!("User {} has no payout account", claimed.provider_id);
                return Ok(fail_release(store, claimed.id, message).await);
            }
        };

        let amount_minor = match to_minor_units(&payout) {
            Ok(minor) => minor,
            Err(e) => return Ok(fail_release(store, claimed.id, e).await),
        };

        match gateway
            .transfer(
                &destination,
                amount_minor,
                &claimed.currency,
                &claimed.id.to_string(),
            )
            .await
        {
            Ok(receipt) => Some(receipt.transfer_id),
            Err(e) => return Ok(fail_release(store, claimed.id, e.to_string()).await),
        }
    };

    match store.complete_payout(claimed.id, transfer_id, None).await? {
        Some(outcome) => Ok(ReleaseOutcome::Released(outcome)),
        None => Err(ServiceError::Conflict(format!(
            "Transaction {} left the released state during payout",
            claimed.id
        ))),
    }
}

/// One pass of the auto-release job. Individual failures are logged and the
/// batch continues.
pub async fn run_escrow_release<S, G>(
    store: &S,
    gateway: &G,
    policy: &ReleasePolicy,
    now: DateTime<Utc>,
) -> Result<ReleaseReport, ServiceError>
where
    S: EscrowExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let due = store
        .get_transactions_due_for_release(policy.cutoff(now), policy.max_attempts, policy.batch_size)
        .await?;

    let mut report = ReleaseReport::default();

    for transaction in due {
        report.examined += 1;

        if !transaction.hold_elapsed(policy.hold_days, now) {
            report.skipped += 1;
            continue;
        }

        match release_held_transaction(store, gateway, &transaction, true).await {
            Ok(ReleaseOutcome::Released(outcome)) => {
                report.released += 1;
                report.payouts.push(outcome);
            }
            Ok(ReleaseOutcome::Skipped) => {
                report.skipped += 1;
            }
            Ok(ReleaseOutcome::Failed(message)) => {
                report.failed += 1;
                tracing::warn!(
                    "Escrow release failed for transaction {} (attempt {}): {}",
                    transaction.id,
                    transaction.release_attempts + 1,
                    message
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!("Escrow release error for transaction {}: {}", transaction.id, e);
            }
        }
    }

    Ok(report)
}

/// Returns held funds to the client in full.
pub async fn refund_held_transaction<S, G>(
    store: &S,
    gateway: &G,
    transaction: &Transaction,
) -> Result<Transaction, ServiceError>
where
    S: EscrowExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let payment_id = transaction.gateway_payment_id.as_deref().ok_or_else(|| {
        ServiceError::Validation(format!("Transaction {} has no gateway payment", transaction.id))
    })?;

    let receipt = gateway
        .refund(payment_id, None, &format!("refund-{}", transaction.id))
        .await?;

    store
        .mark_refunded(transaction.id, receipt.refund_id, transaction.amount.clone())
        .await?
        .ok_or_else(|| {
            ServiceError::Conflict(format!("Transaction {} is no longer held", transaction.id))
        })
}

#[derive(Debug)]
pub struct SplitOutcome {
    pub payout: PayoutOutcome,
    pub freelancer_share: BigDecimal,
    pub client_share: BigDecimal,
    /// Set when the transfer went through but the client refund did not.
    pub refund_error: Option<String>,
}

/// Pays `freelancer_percentage` of held funds to the freelancer (less the
/// same share of the platform fee) and refunds the remainder to the client.
pub async fn split_held_transaction<S, G>(
    store: &S,
    gateway: &G,
    transaction: &Transaction,
    freelancer_percentage: f64,
) -> Result<SplitOutcome, ServiceError>
where
    S: EscrowExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let (freelancer_share, client_share) =
        split_amount(&transaction.amount, freelancer_percentage).map_err(ServiceError::Validation)?;
    let (fee_share, _) = split_amount(&transaction.platform_fee, freelancer_percentage)
        .map_err(ServiceError::Validation)?;
    let payout = payout_amount(&freelancer_share, &fee_share);

    let payout_minor = to_minor_units(&payout).map_err(ServiceError::Validation)?;
    let refund_minor = to_minor_units(&client_share).map_err(ServiceError::Validation)?;

    let claimed = store
        .claim_escrow_release(transaction.id, false)
        .await?
        .ok_or_else(|| {
            ServiceError::Conflict(format!("Transaction {} is no longer held", transaction.id))
        })?;

    let transfer_id = if payout_minor > 0 {
        let destination = match store.get_payout_account(claimed.provider_id).await? {
            Some(account) => account,
            None => {
                fail_release(store, claimed.id, "Missing payout account".to_string()).await;
                return Err(ServiceError::MissingPayoutAccount(claimed.provider_id));
            }
        };

        match gateway
            .transfer(&destination, payout_minor, &claimed.currency, &claimed.id.to_string())
            .await
        {
            Ok(receipt) => Some(receipt.transfer_id),
            Err(e) => {
                fail_release(store, claimed.id, e.to_string()).await;
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let mut refund = None;
    let mut refund_error = None;
    if refund_minor > 0 {
        match claimed.gateway_payment_id.as_deref() {
            Some(payment_id) => {
                match gateway
                    .refund(payment_id, Some(refund_minor), &format!("refund-{}", claimed.id))
                    .await
                {
                    Ok(receipt) => {
                        refund = Some(PartialRefund {
                            refund_id: receipt.refund_id,
                            amount: client_share.clone(),
                        })
                    }
                    Err(e) => {
                        tracing::error!(
                            "Split refund of {} failed for transaction {}: {}",
                            client_share,
                            claimed.id,
                            e
                        );
                        refund_error = Some(e.to_string());
                    }
                }
            }
            None => refund_error = Some("Transaction has no gateway payment".to_string()),
        }
    }

    let payout = store
        .complete_payout(claimed.id, transfer_id, refund)
        .await?
        .ok_or_else(|| {
            ServiceError::Conflict(format!(
                "Transaction {} left the released state during payout",
                claimed.id
            ))
        })?;

    Ok(SplitOutcome {
        payout,
        freelancer_share,
        client_share,
        refund_error,
    })
}

/// The first live transaction whose money is mid-flight. A contract cannot be
/// closed under it: a capture or transfer is still deciding where it lands.
pub fn unsettled_blocker(live: &[Transaction]) -> Option<&Transaction> {
    live.iter().find(|t| {
        matches!(
            t.status,
            TransactionStatus::Processing | TransactionStatus::Released
        )
    })
}

/// Where a dispute resolution moved a contract's money.
#[derive(Debug, Default, Serialize)]
pub struct ContractSettlement {
    pub refunded: Vec<Transaction>,
    pub paid_out: Vec<Transaction>,
    /// Fundings that were never authorised, now failed.
    pub cancelled: Vec<Transaction>,
    /// Gateway calls that failed. The affected transactions keep their last
    /// recorded status.
    pub errors: Vec<String>,
}

/// Settles every live transaction on a contract the way a dispute resolution
/// says. Held funds are refunded, released or split; pending fundings are
/// failed so a late authorisation is never captured. `Dismiss` moves nothing.
pub async fn settle_contract_funds<S, G>(
    store: &S,
    gateway: &G,
    contract_id: Uuid,
    resolution: &DisputeResolution,
) -> Result<ContractSettlement, ServiceError>
where
    S: EscrowExt + TransactionExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let mut settlement = ContractSettlement::default();
    if *resolution == DisputeResolution::Dismiss {
        return Ok(settlement);
    }

    for transaction in store.get_live_transactions(contract_id).await? {
        match transaction.status {
            TransactionStatus::Pending => {
                match store
                    .update_transaction_status(
                        transaction.id,
                        TransactionStatus::Pending,
                        TransactionStatus::Failed,
                    )
                    .await?
                {
                    Some(failed) => settlement.cancelled.push(failed),
                    None => settlement.errors.push(format!(
                        "cancel {}: funding changed during settlement",
                        transaction.id
                    )),
                }
            }
            TransactionStatus::HeldInEscrow => {
                settle_held(store, gateway, resolution, &transaction, &mut settlement).await;
            }
            other => settlement.errors.push(format!(
                "{}: still {}, settle it once the gateway finishes",
                transaction.id,
                other.to_str()
            )),
        }
    }

    Ok(settlement)
}

async fn settle_held<S, G>(
    store: &S,
    gateway: &G,
    resolution: &DisputeResolution,
    transaction: &Transaction,
    settlement: &mut ContractSettlement,
) where
    S: EscrowExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    match resolution {
        DisputeResolution::RefundClient => {
            match refund_held_transaction(store, gateway, transaction).await {
                Ok(refunded) => settlement.refunded.push(refunded),
                Err(e) => {
                    tracing::error!("Refund of transaction {} failed: {}", transaction.id, e);
                    settlement
                        .errors
                        .push(format!("refund {}: {}", transaction.id, e));
                }
            }
        }
        DisputeResolution::ReleaseToFreelancer => {
            match release_held_transaction(store, gateway, transaction, false).await {
                Ok(ReleaseOutcome::Released(payout)) => {
                    settlement.paid_out.push(payout.transaction)
                }
                Ok(ReleaseOutcome::Skipped) => {
                    tracing::info!("Transaction {} already moved", transaction.id);
                }
                Ok(ReleaseOutcome::Failed(message)) => settlement
                    .errors
                    .push(format!("release {}: {}", transaction.id, message)),
                Err(e) => {
                    tracing::error!("Release of transaction {} failed: {}", transaction.id, e);
                    settlement
                        .errors
                        .push(format!("release {}: {}", transaction.id, e));
                }
            }
        }
        DisputeResolution::Split {
            freelancer_percentage,
        } => match split_held_transaction(store, gateway, transaction, *freelancer_percentage).await
        {
            Ok(outcome) => {
                if let Some(refund_error) = outcome.refund_error {
                    settlement.errors.push(format!(
                        "refund of {} on {}: {}",
                        outcome.client_share, transaction.id, refund_error
                    ));
                }
                settlement.paid_out.push(outcome.payout.transaction);
            }
            Err(e) => {
                tracing::error!("Split of transaction {} failed: {}", transaction.id, e);
                settlement
                    .errors
                    .push(format!("split {}: {}", transaction.id, e));
            }
        },
        DisputeResolution::Dismiss => {}
    }
}

/// What a webhook event means for the transaction it names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WebhookAction {
    /// Funds are authorised; capture them and mark the payment processing.
    Capture,
    Transition(TransactionStatus),
    Duplicate,
    Unhandled,
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

pub fn plan_webhook_action(current: TransactionStatus, event_type: &str) -> WebhookAction {
    if event_type == "payment_intent.amount_capturable_updated" {
        return match current {
            TransactionStatus::Pending => WebhookAction::Capture,
            TransactionStatus::Processing => WebhookAction::Duplicate,
            other => WebhookAction::InvalidTransition {
                from: other,
                to: TransactionStatus::Processing,
            },
        };
    }

    let target = match TransactionStatus::from_gateway_event(event_type) {
        Some(target) => target,
        None => return WebhookAction::Unhandled,
    };

    if current == target {
        WebhookAction::Duplicate
    } else if current.can_transition_to(target) {
        WebhookAction::Transition(target)
    } else {
        WebhookAction::InvalidTransition {
            from: current,
            to: target,
        }
    }
}

/// Held funds on a closed contract have nowhere to go but back to the client.
async fn refund_if_orphaned<S, G>(
    store: &S,
    gateway: &G,
    held: Transaction,
) -> Result<Transaction, ServiceError>
where
    S: EscrowExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    match store.get_contract_status(held.contract_id).await? {
        Some(status) if status.is_terminal() => {
            tracing::warn!(
                "Transaction {} reached escrow on {} contract {}; refunding",
                held.id,
                status.to_str(),
                held.contract_id
            );
            refund_held_transaction(store, gateway, &held).await
        }
        _ => Ok(held),
    }
}

/// Applies a verified gateway event. Returns the transaction when its status
/// changed. Invalid and repeated events are logged and ignored.
pub async fn apply_gateway_event<S, G>(
    store: &S,
    gateway: &G,
    event: &GatewayEvent,
) -> Result<Option<Transaction>, ServiceError>
where
    S: EscrowExt + TransactionExt + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let payment_id = match event.payment_id() {
        Some(id) => id,
        None => {
            tracing::info!("Ignoring gateway event {} without a payment", event.id);
            return Ok(None);
        }
    };

    let transaction = match store.get_transaction_by_payment_id(payment_id).await? {
        Some(t) => t,
        None => {
            tracing::warn!(
                "Gateway event {} names unknown payment {}",
                event.id,
                payment_id
            );
            return Ok(None);
        }
    };

    match plan_webhook_action(transaction.status, &event.event_type) {
        WebhookAction::Capture => {
            gateway.capture(payment_id).await?;
            Ok(store
                .update_transaction_status(
                    transaction.id,
                    TransactionStatus::Pending,
                    TransactionStatus::Processing,
                )
                .await?)
        }
        WebhookAction::Transition(to) => {
            if to == TransactionStatus::Failed {
                tracing::warn!(
                    "Payment {} failed: {}",
                    payment_id,
                    event.failure_message().unwrap_or("no reason given")
                );
            }
            let updated = store
                .update_transaction_status(transaction.id, transaction.status, to)
                .await?;
            match updated {
                Some(held) if held.status == TransactionStatus::HeldInEscrow => {
                    Ok(Some(refund_if_orphaned(store, gateway, held).await?))
                }
                Some(updated) => Ok(Some(updated)),
                None => {
                    tracing::info!(
                        "Transaction {} changed before event {} applied",
                        transaction.id,
                        event.id
                    );
                    Ok(None)
                }
            }
        }
        WebhookAction::Duplicate => {
            tracing::debug!("Duplicate gateway event {} for {}", event.id, transaction.id);
            // a refund that failed on the first delivery is retried here
            if transaction.status == TransactionStatus::HeldInEscrow {
                let after = refund_if_orphaned(store, gateway, transaction.clone()).await?;
                if after.status != transaction.status {
                    return Ok(Some(after));
                }
            }
            Ok(None)
        }
        WebhookAction::Unhandled => {
            tracing::info!("Unhandled gateway event type: {}", event.event_type);
            Ok(None)
        }
        WebhookAction::InvalidTransition { from, to } => {
            tracing::warn!(
                "Gateway event {} would move transaction {} from {} to {}; ignored",
                event.id,
                transaction.id,
                from.to_str(),
                to.to_str()
            );
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingResult {
    pub transaction: Transaction,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EscrowService {
    db_client: Arc<DBClient>,
    gateway: Arc<dyn PaymentGateway>,
    policy: ReleasePolicy,
    fee_percent: f64,
}

impl EscrowService {
    pub fn new(db_client: Arc<DBClient>, gateway: Arc<dyn PaymentGateway>, config: &Config) -> Self {
        Self {
            db_client,
            gateway,
            policy: ReleasePolicy::from_config(config),
            fee_percent: config.platform_fee_percent,
        }
    }

    /// Opens a gateway hold for a milestone and records a pending transaction.
    pub async fn fund_milestone(
        &self,
        contract: &Contract,
        milestone: &Milestone,
        client_id: Uuid,
    ) -> Result<FundingResult, ServiceError> {
        if contract.client_id != client_id {
            return Err(ServiceError::Forbidden(
                "Only the client can fund milestones".to_string(),
            ));
        }
        if contract.status != ContractStatus::Active {
            return Err(TransitionError::ContractNotActive(contract.status).into());
        }
        if milestone.status == MilestoneStatus::Paid {
            return Err(ServiceError::Conflict("Milestone is already paid".to_string()));
        }
        if self
            .db_client
            .get_live_milestone_funding(milestone.id)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "Milestone is already funded".to_string(),
            ));
        }

        let fee =
            platform_fee(&milestone.amount, self.fee_percent).map_err(ServiceError::Validation)?;
        let amount_minor = to_minor_units(&milestone.amount).map_err(ServiceError::Validation)?;

        let reference = format!("milestone-{}-{}", milestone.id, Uuid::new_v4());
        let hold = self
            .gateway
            .create_hold(amount_minor, &contract.currency, &reference)
            .await?;

        let new_transaction = NewTransaction {
            contract_id: contract.id,
            milestone_id: Some(milestone.id),
            client_id: contract.client_id,
            provider_id: contract.freelancer_id,
            amount: milestone.amount.clone(),
            platform_fee: fee,
            currency: contract.currency.clone(),
            description: format!("{}: {}", contract.title, milestone.title),
        };

        let transaction = self
            .db_client
            .create_transaction(new_transaction, hold.payment_id)
            .await
            .map_err(|e| {
                let duplicate = matches!(
                    &e,
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation()
                );
                if duplicate {
                    ServiceError::Conflict("Milestone is already funded".to_string())
                } else {
                    ServiceError::Database(e)
                }
            })?;

        tracing::info!(
            "Funding transaction {} created for milestone {} ({} {})",
            transaction.id,
            milestone.id,
            transaction.amount,
            transaction.currency
        );

        Ok(FundingResult {
            transaction,
            client_secret: hold.client_secret,
        })
    }

    /// Releases a milestone's held funds right away, without waiting out the hold.
    pub async fn release_milestone(
        &self,
        milestone_id: Uuid,
    ) -> Result<Option<ReleaseOutcome>, ServiceError> {
        let transaction = match self
            .db_client
            .get_live_milestone_funding(milestone_id)
            .await?
        {
            Some(t) if t.status == TransactionStatus::HeldInEscrow => t,
            _ => return Ok(None),
        };

        let outcome =
            release_held_transaction(&*self.db_client, &*self.gateway, &transaction, true).await?;
        Ok(Some(outcome))
    }

    pub async fn run_release(&self, now: DateTime<Utc>) -> Result<ReleaseReport, ServiceError> {
        run_escrow_release(&*self.db_client, &*self.gateway, &self.policy, now).await
    }

    pub async fn live_transactions(
        &self,
        contract_id: Uuid,
    ) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.db_client.get_live_transactions(contract_id).await?)
    }

    pub async fn settle_contract(
        &self,
        contract_id: Uuid,
        resolution: &DisputeResolution,
    ) -> Result<ContractSettlement, ServiceError> {
        settle_contract_funds(&*self.db_client, &*self.gateway, contract_id, resolution).await
    }

    pub async fn apply_gateway_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<Option<Transaction>, ServiceError> {
        apply_gateway_event(&*self.db_client, &*self.gateway, event).await
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::service::payment_provider::mock::MockGateway;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::str::FromStr;
    use std::sync::Mutex;

    /// In-memory stand-in for the escrow tables.
    #[derive(Default)]
    pub struct MockStore {
        pub transactions: Mutex<HashMap<Uuid, Transaction>>,
        /// Contracts not listed here count as active.
        pub contract_statuses: Mutex<HashMap<Uuid, ContractStatus>>,
        pub unfinished_milestones: Mutex<HashSet<Uuid>>,
        pub payout_accounts: Mutex<HashMap<Uuid, String>>,
    }

    impl MockStore {
        pub fn insert(&self, transaction: Transaction) {
            self.transactions
                .lock()
                .unwrap()
                .insert(transaction.id, transaction);
        }

        pub fn get(&self, id: Uuid) -> Transaction {
            self.transactions.lock().unwrap()[&id].clone()
        }

        pub fn set_payout_account(&self, user_id: Uuid, account: &str) {
            self.payout_accounts
                .lock()
                .unwrap()
                .insert(user_id, account.to_string());
        }

        pub fn set_contract_status(&self, contract_id: Uuid, status: ContractStatus) {
            self.contract_statuses
                .lock()
                .unwrap()
                .insert(contract_id, status);
        }

        fn contract_open(&self, contract_id: Uuid) -> bool {
            matches!(
                self.contract_statuses.lock().unwrap().get(&contract_id),
                None | Some(ContractStatus::Active) | Some(ContractStatus::Completed)
            )
        }
    }

    #[async_trait]
    impl EscrowExt for MockStore {
        async fn get_transactions_due_for_release(
            &self,
            cutoff: DateTime<Utc>,
            max_attempts: i32,
            limit: i64,
        ) -> Result<Vec<Transaction>, sqlx::Error> {
            let unfinished = self.unfinished_milestones.lock().unwrap().clone();
            let mut due: Vec<Transaction> = self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.status == TransactionStatus::HeldInEscrow)
                .filter(|t| t.escrow_date.map(|d| d <= cutoff).unwrap_or(false))
                .filter(|t| t.release_attempts < max_attempts)
                .filter(|t| self.contract_open(t.contract_id))
                .filter(|t| t.milestone_id.map(|m| !unfinished.contains(&m)).unwrap_or(true))
                .cloned()
                .collect();
            due.sort_by_key(|t| t.escrow_date);
            due.truncate(limit as usize);
            Ok(due)
        }

        async fn get_live_transactions(
            &self,
            contract_id: Uuid,
        ) -> Result<Vec<Transaction>, sqlx::Error> {
            use TransactionStatus::*;
            let mut live: Vec<Transaction> = self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.contract_id == contract_id)
                .filter(|t| matches!(t.status, Pending | Processing | HeldInEscrow | Released))
                .cloned()
                .collect();
            live.sort_by_key(|t| t.created_at);
            Ok(live)
        }

        async fn get_contract_status(
            &self,
            contract_id: Uuid,
        ) -> Result<Option<ContractStatus>, sqlx::Error> {
            Ok(Some(
                self.contract_statuses
                    .lock()
                    .unwrap()
                    .get(&contract_id)
                    .copied()
                    .unwrap_or(ContractStatus::Active),
            ))
        }

        async fn claim_escrow_release(
            &self,
            transaction_id: Uuid,
            require_open_contract: bool,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            let mut transactions = self.transactions.lock().unwrap();
            let transaction = match transactions.get_mut(&transaction_id) {
                Some(t) => t,
                None => return Ok(None),
            };
            if transaction.status != TransactionStatus::HeldInEscrow {
                return Ok(None);
            }
            if require_open_contract && !self.contract_open(transaction.contract_id) {
                return Ok(None);
            }
            transaction.status = TransactionStatus::Released;
            Ok(Some(transaction.clone()))
        }

        async fn complete_payout(
            &self,
            transaction_id: Uuid,
            transfer_id: Option<String>,
            refund: Option<PartialRefund>,
        ) -> Result<Option<PayoutOutcome>, sqlx::Error> {
            let mut transactions = self.transactions.lock().unwrap();
            let transaction = match transactions.get_mut(&transaction_id) {
                Some(t) if t.status == TransactionStatus::Released => t,
                _ => return Ok(None),
            };
            transaction.status = TransactionStatus::PaidOut;
            transaction.gateway_transfer_id = transfer_id;
            transaction.released_at = Some(Utc::now());
            transaction.last_error = None;
            if let Some(refund) = refund {
                transaction.gateway_refund_id = Some(refund.refund_id);
                transaction.refunded_amount = Some(refund.amount);
            }
            Ok(Some(PayoutOutcome {
                milestone_paid: transaction.milestone_id.is_some(),
                contract_completed: false,
                transaction: transaction.clone(),
            }))
        }

        async fn revert_escrow_release(
            &self,
            transaction_id: Uuid,
            error: String,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            let mut transactions = self.transactions.lock().unwrap();
            let transaction = match transactions.get_mut(&transaction_id) {
                Some(t) if t.status == TransactionStatus::Released => t,
                _ => return Ok(None),
            };
            transaction.status = TransactionStatus::HeldInEscrow;
            transaction.release_attempts += 1;
            transaction.last_error = Some(error);
            Ok(Some(transaction.clone()))
        }

        async fn mark_refunded(
            &self,
            transaction_id: Uuid,
            refund_id: String,
            amount: BigDecimal,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            let mut transactions = self.transactions.lock().unwrap();
            let transaction = match transactions.get_mut(&transaction_id) {
                Some(t) if t.status == TransactionStatus::HeldInEscrow => t,
                _ => return Ok(None),
            };
            transaction.status = TransactionStatus::Refunded;
            transaction.gateway_refund_id = Some(refund_id);
            transaction.refunded_amount = Some(amount);
            Ok(Some(transaction.clone()))
        }

        async fn get_payout_account(&self, user_id: Uuid) -> Result<Option<String>, sqlx::Error> {
            Ok(self.payout_accounts.lock().unwrap().get(&user_id).cloned())
        }
    }

    #[async_trait]
    impl TransactionExt for MockStore {
        async fn create_transaction(
            &self,
            transaction: NewTransaction,
            gateway_payment_id: String,
        ) -> Result<Transaction, sqlx::Error> {
            let now = Utc::now();
            let created = Transaction {
                id: Uuid::new_v4(),
                contract_id: transaction.contract_id,
                milestone_id: transaction.milestone_id,
                client_id: transaction.client_id,
                provider_id: transaction.provider_id,
                amount: transaction.amount,
                platform_fee: transaction.platform_fee,
                currency: transaction.currency,
                status: TransactionStatus::Pending,
                description: transaction.description,
                gateway_payment_id: Some(gateway_payment_id),
                gateway_transfer_id: None,
                gateway_refund_id: None,
                refunded_amount: None,
                escrow_date: None,
                released_at: None,
                release_attempts: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            self.insert(created.clone());
            Ok(created)
        }

        async fn get_transaction(
            &self,
            transaction_id: Uuid,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            Ok(self.transactions.lock().unwrap().get(&transaction_id).cloned())
        }

        async fn get_transaction_by_payment_id(
            &self,
            gateway_payment_id: &str,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .values()
                .find(|t| t.gateway_payment_id.as_deref() == Some(gateway_payment_id))
                .cloned())
        }

        async fn get_user_transactions(
            &self,
            user_id: Uuid,
            _page: u32,
            _limit: usize,
        ) -> Result<Vec<Transaction>, sqlx::Error> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.involves(user_id))
                .cloned()
                .collect())
        }

        async fn count_user_transactions(&self, user_id: Uuid) -> Result<i64, sqlx::Error> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.involves(user_id))
                .count() as i64)
        }

        async fn get_live_milestone_funding(
            &self,
            milestone_id: Uuid,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            use TransactionStatus::*;
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .values()
                .find(|t| {
                    t.milestone_id == Some(milestone_id)
                        && matches!(
                            t.status,
                            Pending | Processing | HeldInEscrow | Released | PaidOut
                        )
                })
                .cloned())
        }

        async fn update_transaction_status(
            &self,
            transaction_id: Uuid,
            from: TransactionStatus,
            to: TransactionStatus,
        ) -> Result<Option<Transaction>, sqlx::Error> {
            let mut transactions = self.transactions.lock().unwrap();
            let transaction = match transactions.get_mut(&transaction_id) {
                Some(t) if t.status == from => t,
                _ => return Ok(None),
            };
            transaction.status = to;
            if to == TransactionStatus::HeldInEscrow {
                transaction.escrow_date = Some(Utc::now());
            }
            Ok(Some(transaction.clone()))
        }
    }

    pub fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    pub fn held_transaction(days_in_escrow: i64, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            milestone_id: Some(Uuid::new_v4()),
            client_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            amount: dec("100.00"),
            platform_fee: dec("10.00"),
            currency: "usd".to_string(),
            status: TransactionStatus::HeldInEscrow,
            description: "Milestone".to_string(),
            gateway_payment_id: Some(format!("pi_{}", Uuid::new_v4().simple())),
            gateway_transfer_id: None,
            gateway_refund_id: None,
            refunded_amount: None,
            escrow_date: Some(now - Duration::days(days_in_escrow)),
            released_at: None,
            release_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn policy() -> ReleasePolicy {
        ReleasePolicy {
            hold_days: 7,
            max_attempts: 3,
            batch_size: 100,
        }
    }

    fn store_with(transactions: &[Transaction]) -> MockStore {
        let store = MockStore::default();
        for t in transactions {
            store.set_payout_account(t.provider_id, &format!("acct_{}", t.provider_id.simple()));
            store.insert(t.clone());
        }
        store
    }

    #[tokio::test]
    async fn test_releases_only_after_hold_period() {
        let now = Utc::now();
        let old = held_transaction(8, now);
        let recent = held_transaction(3, now);
        let store = store_with(&[old.clone(), recent.clone()]);
        let gateway = MockGateway::default();

        let report = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.released, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.get(old.id).status, TransactionStatus::PaidOut);
        assert_eq!(store.get(recent.id).status, TransactionStatus::HeldInEscrow);

        let transfers = gateway.transfers.lock().unwrap().clone();
        assert_eq!(transfers.len(), 1);
        // 100.00 less the 10.00 fee, in cents, keyed by the transaction id
        assert_eq!(transfers[0].1, 9000);
        assert_eq!(transfers[0].2, old.id.to_string());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let now = Utc::now();
        let old = held_transaction(10, now);
        let store = store_with(&[old.clone()]);
        let gateway = MockGateway::default();

        let first = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();
        let second = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();

        assert_eq!(first.released, 1);
        assert_eq!(second.examined, 0);
        assert_eq!(second.released, 0);
        assert_eq!(gateway.transfer_count(), 1);

        let again = release_held_transaction(&store, &gateway, &old, true).await.unwrap();
        assert!(matches!(again, ReleaseOutcome::Skipped));
        assert_eq!(gateway.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_transfer_returns_to_escrow_and_batch_continues() {
        let now = Utc::now();
        let broken = held_transaction(9, now);
        let healthy = held_transaction(8, now);
        let store = store_with(&[broken.clone(), healthy.clone()]);
        let gateway = MockGateway::default();
        gateway.fail_transfers_to(&format!("acct_{}", broken.provider_id.simple()));

        let report = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.released, 1);
        assert_eq!(report.failed, 1);

        let broken_after = store.get(broken.id);
        assert_eq!(broken_after.status, TransactionStatus::HeldInEscrow);
        assert_eq!(broken_after.release_attempts, 1);
        assert!(broken_after.last_error.is_some());
        assert_eq!(store.get(healthy.id).status, TransactionStatus::PaidOut);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let now = Utc::now();
        let broken = held_transaction(9, now);
        let store = store_with(&[broken.clone()]);
        let gateway = MockGateway::default();
        gateway.fail_transfers_to(&format!("acct_{}", broken.provider_id.simple()));

        for _ in 0..3 {
            let report = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();
            assert_eq!(report.failed, 1);
        }
        let report = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(store.get(broken.id).release_attempts, 3);
    }

    #[tokio::test]
    async fn test_missing_payout_account_is_a_failure() {
        let now = Utc::now();
        let t = held_transaction(8, now);
        let store = MockStore::default();
        store.insert(t.clone());
        let gateway = MockGateway::default();

        let report = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(gateway.transfer_count(), 0);
        assert_eq!(store.get(t.id).status, TransactionStatus::HeldInEscrow);
    }

    #[tokio::test]
    async fn test_disputed_and_undelivered_work_is_held() {
        let now = Utc::now();
        let disputed = held_transaction(30, now);
        let undelivered = held_transaction(30, now);
        let store = store_with(&[disputed.clone(), undelivered.clone()]);
        store.set_contract_status(disputed.contract_id, ContractStatus::Disputed);
        store
            .unfinished_milestones
            .lock()
            .unwrap()
            .insert(undelivered.milestone_id.unwrap());
        let gateway = MockGateway::default();

        let report = run_escrow_release(&store, &gateway, &policy(), now).await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(gateway.transfer_count(), 0);

        // the claim guard holds even if a stale candidate slips through
        let outcome = release_held_transaction(&store, &gateway, &disputed, true).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_refund_held_transaction() {
        let now = Utc::now();
        let t = held_transaction(1, now);
        let store = store_with(&[t.clone()]);
        let gateway = MockGateway::default();

        let refunded = refund_held_transaction(&store, &gateway, &t).await.unwrap();

        assert_eq!(refunded.status, TransactionStatus::Refunded);
        assert_eq!(refunded.refunded_amount, Some(dec("100.00")));
        assert_eq!(gateway.refund_count(), 1);

        let err = refund_held_transaction(&store, &gateway, &t).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_split_held_transaction() {
        let now = Utc::now();
        let t = held_transaction(1, now);
        let store = store_with(&[t.clone()]);
        let gateway = MockGateway::default();

        let outcome = split_held_transaction(&store, &gateway, &t, 60.0).await.unwrap();

        assert_eq!(outcome.freelancer_share, dec("60.00"));
        assert_eq!(outcome.client_share, dec("40.00"));
        assert!(outcome.refund_error.is_none());

        // 60.00 share less 60% of the 10.00 fee
        assert_eq!(gateway.transfers.lock().unwrap()[0].1, 5400);
        assert_eq!(gateway.refunds.lock().unwrap()[0].1, Some(4000));

        let after = store.get(t.id);
        assert_eq!(after.status, TransactionStatus::PaidOut);
        assert_eq!(after.refunded_amount, Some(dec("40.00")));
    }

    #[test]
    fn test_webhook_planning() {
        use TransactionStatus::*;
        assert_eq!(
            plan_webhook_action(Pending, "payment_intent.amount_capturable_updated"),
            WebhookAction::Capture
        );
        assert_eq!(
            plan_webhook_action(Processing, "payment_intent.succeeded"),
            WebhookAction::Transition(HeldInEscrow)
        );
        assert_eq!(
            plan_webhook_action(HeldInEscrow, "payment_intent.succeeded"),
            WebhookAction::Duplicate
        );
        assert_eq!(
            plan_webhook_action(PaidOut, "payment_intent.payment_failed"),
            WebhookAction::InvalidTransition {
                from: PaidOut,
                to: Failed
            }
        );
        assert_eq!(
            plan_webhook_action(Pending, "customer.updated"),
            WebhookAction::Unhandled
        );
    }

    #[test]
    fn test_policy_cutoff() {
        let now = Utc::now();
        assert_eq!(policy().cutoff(now), now - Duration::days(7));

        let endless = ReleasePolicy {
            hold_days: i64::MAX,
            ..policy()
        };
        assert_eq!(endless.cutoff(now), DateTime::<Utc>::MIN_UTC);
    }

    /// Two held milestones, one unauthorised funding, all on one contract.
    fn contract_with_live_funds(now: DateTime<Utc>) -> (MockStore, Vec<Transaction>, Transaction) {
        let first = held_transaction(2, now);
        let mut second = held_transaction(1, now);
        second.contract_id = first.contract_id;
        second.client_id = first.client_id;
        second.provider_id = first.provider_id;
        let mut pending = held_transaction(0, now);
        pending.contract_id = first.contract_id;
        pending.status = TransactionStatus::Pending;
        pending.escrow_date = None;

        let store = store_with(&[first.clone(), second.clone(), pending.clone()]);
        store.set_contract_status(first.contract_id, ContractStatus::Disputed);
        (store, vec![first, second], pending)
    }

    #[tokio::test]
    async fn test_refund_settles_every_held_transaction_on_the_contract() {
        let now = Utc::now();
        let (store, held, pending) = contract_with_live_funds(now);
        let gateway = MockGateway::default();

        let settlement = settle_contract_funds(
            &store,
            &gateway,
            held[0].contract_id,
            &DisputeResolution::RefundClient,
        )
        .await
        .unwrap();

        assert_eq!(settlement.refunded.len(), 2);
        assert_eq!(settlement.cancelled.len(), 1);
        assert!(settlement.errors.is_empty());
        assert_eq!(gateway.refund_count(), 2);
        for t in &held {
            assert_eq!(store.get(t.id).status, TransactionStatus::Refunded);
        }
        assert_eq!(store.get(pending.id).status, TransactionStatus::Failed);
        assert!(store
            .get_live_transactions(held[0].contract_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_release_settles_every_held_transaction_on_the_contract() {
        let now = Utc::now();
        let (store, held, _) = contract_with_live_funds(now);
        let gateway = MockGateway::default();

        let settlement = settle_contract_funds(
            &store,
            &gateway,
            held[0].contract_id,
            &DisputeResolution::ReleaseToFreelancer,
        )
        .await
        .unwrap();

        assert_eq!(settlement.paid_out.len(), 2);
        assert_eq!(gateway.transfer_count(), 2);
        assert_eq!(gateway.refund_count(), 0);
        for t in &held {
            assert_eq!(store.get(t.id).status, TransactionStatus::PaidOut);
        }
    }

    #[tokio::test]
    async fn test_split_settles_every_held_transaction_on_the_contract() {
        let now = Utc::now();
        let (store, held, _) = contract_with_live_funds(now);
        let gateway = MockGateway::default();

        let settlement = settle_contract_funds(
            &store,
            &gateway,
            held[0].contract_id,
            &DisputeResolution::Split {
                freelancer_percentage: 50.0,
            },
        )
        .await
        .unwrap();

        assert_eq!(settlement.paid_out.len(), 2);
        assert!(settlement.errors.is_empty());
        // 50.00 share less half the 10.00 fee, and 50.00 back to the client
        let transfers = gateway.transfers.lock().unwrap().clone();
        assert!(transfers.iter().all(|(_, amount, _)| *amount == 4500));
        let refunds = gateway.refunds.lock().unwrap().clone();
        assert_eq!(refunds.len(), 2);
        assert!(refunds.iter().all(|(_, amount)| *amount == Some(5000)));
    }

    #[tokio::test]
    async fn test_dismiss_moves_no_money() {
        let now = Utc::now();
        let (store, held, pending) = contract_with_live_funds(now);
        let gateway = MockGateway::default();

        let settlement = settle_contract_funds(
            &store,
            &gateway,
            held[0].contract_id,
            &DisputeResolution::Dismiss,
        )
        .await
        .unwrap();

        assert!(settlement.refunded.is_empty() && settlement.paid_out.is_empty());
        assert_eq!(store.get(held[0].id).status, TransactionStatus::HeldInEscrow);
        assert_eq!(store.get(pending.id).status, TransactionStatus::Pending);
    }

    #[test]
    fn test_in_flight_money_blocks_settlement() {
        let now = Utc::now();
        let held = held_transaction(1, now);
        assert!(unsettled_blocker(std::slice::from_ref(&held)).is_none());

        for status in [TransactionStatus::Processing, TransactionStatus::Released] {
            let mut moving = held_transaction(1, now);
            moving.status = status;
            let live = vec![held.clone(), moving.clone()];
            assert_eq!(unsettled_blocker(&live).map(|t| t.id), Some(moving.id));
        }
    }

    fn gateway_event(event_type: &str, payment_id: &str) -> GatewayEvent {
        serde_json::from_value(serde_json::json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": event_type,
            "data": { "object": { "id": payment_id } }
        }))
        .unwrap()
    }

    fn funding(status: TransactionStatus, now: DateTime<Utc>) -> Transaction {
        let mut t = held_transaction(0, now);
        t.status = status;
        t.escrow_date = None;
        t
    }

    #[tokio::test]
    async fn test_webhook_walks_funding_into_escrow() {
        let now = Utc::now();
        let t = funding(TransactionStatus::Pending, now);
        let payment_id = t.gateway_payment_id.clone().unwrap();
        let store = store_with(&[t.clone()]);
        let gateway = MockGateway::default();

        let authorised = gateway_event("payment_intent.amount_capturable_updated", &payment_id);
        let processing = apply_gateway_event(&store, &gateway, &authorised)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processing.status, TransactionStatus::Processing);
        assert_eq!(gateway.captures.lock().unwrap().clone(), vec![payment_id.clone()]);

        let succeeded = gateway_event("payment_intent.succeeded", &payment_id);
        let held = apply_gateway_event(&store, &gateway, &succeeded)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.status, TransactionStatus::HeldInEscrow);
        assert!(held.escrow_date.is_some());

        // redelivery changes nothing
        let again = apply_gateway_event(&store, &gateway, &succeeded).await.unwrap();
        assert!(again.is_none());
        assert_eq!(store.get(t.id).status, TransactionStatus::HeldInEscrow);
        assert_eq!(gateway.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_webhook_marks_failed_payment() {
        let now = Utc::now();
        let t = funding(TransactionStatus::Pending, now);
        let store = store_with(&[t.clone()]);
        let gateway = MockGateway::default();

        let failed = gateway_event(
            "payment_intent.payment_failed",
            t.gateway_payment_id.as_deref().unwrap(),
        );
        let updated = apply_gateway_event(&store, &gateway, &failed).await.unwrap().unwrap();

        assert_eq!(updated.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_webhook_ignores_stale_and_unknown_events() {
        let now = Utc::now();
        let paid = funding(TransactionStatus::PaidOut, now);
        let failed = funding(TransactionStatus::Failed, now);
        let store = store_with(&[paid.clone(), failed.clone()]);
        let gateway = MockGateway::default();

        let late_failure = gateway_event(
            "payment_intent.payment_failed",
            paid.gateway_payment_id.as_deref().unwrap(),
        );
        assert!(apply_gateway_event(&store, &gateway, &late_failure)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get(paid.id).status, TransactionStatus::PaidOut);

        let late_success = gateway_event(
            "payment_intent.succeeded",
            failed.gateway_payment_id.as_deref().unwrap(),
        );
        assert!(apply_gateway_event(&store, &gateway, &late_success)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get(failed.id).status, TransactionStatus::Failed);

        let unknown = gateway_event("payment_intent.succeeded", "pi_nobody");
        assert!(apply_gateway_event(&store, &gateway, &unknown)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_funds_arriving_on_closed_contract_are_refunded() {
        let now = Utc::now();
        let t = funding(TransactionStatus::Processing, now);
        let store = store_with(&[t.clone()]);
        store.set_contract_status(t.contract_id, ContractStatus::Cancelled);
        let gateway = MockGateway::default();

        let succeeded = gateway_event(
            "payment_intent.succeeded",
            t.gateway_payment_id.as_deref().unwrap(),
        );
        let updated = apply_gateway_event(&store, &gateway, &succeeded)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, TransactionStatus::Refunded);
        assert_eq!(gateway.refund_count(), 1);
    }
}
