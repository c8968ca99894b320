// service/notification_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{notificationdb::NotificationExt, DBClient},
    models::{
        contractmodel::{Contract, Milestone},
        disputemodel::Dispute,
        notificationmodel::Notification,
        projectmodel::{Project, Proposal},
        transactionmodel::Transaction,
    },
    service::{
        error::ServiceError,
        realtime::{RealtimeHub, ServerEvent},
    },
};

#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
    realtime: Arc<RealtimeHub>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>, realtime: Arc<RealtimeHub>) -> Self {
        Self {
            db_client,
            realtime,
        }
    }

    /// Stores the notification and pushes it to the user's sockets.
    pub async fn notify(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        message: String,
        data: Option<serde_json::Value>,
    ) -> Result<Notification, ServiceError> {
        let notification = self
            .db_client
            .create_notification(user_id, kind, title, &message, data)
            .await?;

        let delivered = self
            .realtime
            .emit_to_user(user_id, ServerEvent::Notification(notification.clone()))
            .await;
        tracing::debug!(
            "Notification {} ({}) pushed to {} socket(s)",
            notification.id,
            kind,
            delivered
        );

        Ok(notification)
    }

    /// Same as `notify`, but a failure is only logged.
    pub async fn notify_quietly(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        message: String,
        data: Option<serde_json::Value>,
    ) {
        if let Err(e) = self.notify(user_id, kind, title, message, data).await {
            tracing::warn!("Failed to notify user {} ({}): {}", user_id, kind, e);
        }
    }

    pub async fn notify_proposal_received(&self, project: &Project, proposal: &Proposal) {
        self.notify_quietly(
            project.client_id,
            "proposal_received",
            "New proposal",
            format!("You received a new proposal for \"{}\"", project.title),
            Some(serde_json::json!({
                "project_id": project.id,
                "proposal_id": proposal.id,
                "bid_amount": proposal.bid_amount,
            })),
        )
        .await;
    }

    pub async fn notify_proposal_accepted(&self, proposal: &Proposal, contract: &Contract) {
        self.notify_quietly(
            proposal.freelancer_id,
            "proposal_accepted",
            "Proposal accepted",
            format!(
                "Your proposal for \"{}\" was accepted. Review and sign the contract.",
                contract.title
            ),
            Some(serde_json::json!({
                "proposal_id": proposal.id,
                "contract_id": contract.id,
            })),
        )
        .await;
    }

    pub async fn notify_proposal_rejected(&self, proposal: &Proposal, project: &Project) {
        self.notify_quietly(
            proposal.freelancer_id,
            "proposal_rejected",
            "Proposal declined",
            format!("Your proposal for \"{}\" was declined", project.title),
            Some(serde_json::json!({ "proposal_id": proposal.id })),
        )
        .await;
    }

    pub async fn notify_contract_update(&self, contract: &Contract, actor_id: Uuid, action: &str) {
        if let Some(counterparty) = contract.counterparty(actor_id) {
            self.notify_quietly(
                counterparty,
                "contract_update",
                "Contract update",
                format!("Contract \"{}\" was {}", contract.title, action),
                Some(serde_json::json!({
                    "contract_id": contract.id,
                    "status": contract.status,
                })),
            )
            .await;
        }
    }

    pub async fn notify_milestone_update(
        &self,
        contract: &Contract,
        milestone: &Milestone,
        recipient_id: Uuid,
    ) {
        self.notify_quietly(
            recipient_id,
            "milestone_update",
            "Milestone update",
            format!(
                "Milestone \"{}\" on \"{}\" is now {}",
                milestone.title,
                contract.title,
                milestone.status.to_str()
            ),
            Some(serde_json::json!({
                "contract_id": contract.id,
                "milestone_id": milestone.id,
                "status": milestone.status,
            })),
        )
        .await;
    }

    pub async fn notify_payment_released(&self, transaction: &Transaction) {
        self.notify_quietly(
            transaction.provider_id,
            "payment_released",
            "Payment released",
            format!(
                "{} {} was released to your payout account",
                transaction.amount, transaction.currency
            ),
            Some(serde_json::json!({
                "transaction_id": transaction.id,
                "contract_id": transaction.contract_id,
            })),
        )
        .await;
        self.push_payment_update(transaction).await;
    }

    /// Live status push for both parties; nothing is stored.
    pub async fn push_payment_update(&self, transaction: &Transaction) {
        let event = ServerEvent::PaymentUpdate {
            transaction_id: transaction.id,
            contract_id: transaction.contract_id,
            status: transaction.status,
        };
        self.realtime
            .emit_to_user(transaction.client_id, event.clone())
            .await;
        self.realtime.emit_to_user(transaction.provider_id, event).await;
    }

    pub async fn notify_dispute_opened(&self, dispute: &Dispute) {
        self.notify_quietly(
            dispute.against,
            "dispute_opened",
            "Dispute opened",
            format!("A dispute was opened on your contract: {}", dispute.reason),
            Some(serde_json::json!({
                "dispute_id": dispute.id,
                "contract_id": dispute.contract_id,
            })),
        )
        .await;
    }

    pub async fn notify_dispute_resolved(&self, dispute: &Dispute) {
        let resolution = dispute.resolution.clone().unwrap_or_default();
        for user_id in [dispute.raised_by, dispute.against] {
            self.notify_quietly(
                user_id,
                "dispute_resolved",
                "Dispute resolved",
                format!("The dispute was settled: {}", resolution),
                Some(serde_json::json!({
                    "dispute_id": dispute.id,
                    "contract_id": dispute.contract_id,
                    "resolution": resolution,
                })),
            )
            .await;
        }
    }

    pub async fn notify_review_received(&self, reviewee_id: Uuid, contract: &Contract, rating: i32) {
        self.notify_quietly(
            reviewee_id,
            "review_received",
            "New review",
            format!("You received a {}-star review for \"{}\"", rating, contract.title),
            Some(serde_json::json!({ "contract_id": contract.id })),
        )
        .await;
    }

    pub async fn notify_ticket_update(&self, user_id: Uuid, ticket_id: Uuid, message: String) {
        self.notify_quietly(
            user_id,
            "support_ticket",
            "Support ticket update",
            message,
            Some(serde_json::json!({ "ticket_id": ticket_id })),
        )
        .await;
    }
}
