// service/dispute_service.rs
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{
        cache::{project_key, CacheHelper},
        contractdb::ContractExt,
        disputedb::DisputeExt,
        escrowdb::TransactionExt,
        projectdb::ProjectExt,
        DBClient,
    },
    models::{
        contractmodel::{Contract, ContractStatus},
        disputemodel::{Dispute, DisputeMessage, DisputeResolution, DisputeStatus},
        projectmodel::ProjectStatus,
        usermodel::User,
    },
    service::{
        error::ServiceError,
        escrow_service::{unsettled_blocker, ContractSettlement, EscrowService},
        notification_service::NotificationService,
    },
};

/// Where a resolution leaves the dispute, the contract and the project.
pub fn settlement_plan(
    resolution: &DisputeResolution,
) -> Result<(DisputeStatus, ContractStatus, ProjectStatus), ServiceError> {
    match resolution {
        DisputeResolution::RefundClient => Ok((
            DisputeStatus::Resolved,
            ContractStatus::Cancelled,
            ProjectStatus::Cancelled,
        )),
        DisputeResolution::ReleaseToFreelancer => Ok((
            DisputeStatus::Resolved,
            ContractStatus::Completed,
            ProjectStatus::Completed,
        )),
        DisputeResolution::Split {
            freelancer_percentage,
        } => {
            if !freelancer_percentage.is_finite() || !(0.0..=100.0).contains(freelancer_percentage)
            {
                return Err(ServiceError::Validation(
                    "freelancer_percentage must be between 0 and 100".to_string(),
                ));
            }
            Ok((
                DisputeStatus::Resolved,
                ContractStatus::Completed,
                ProjectStatus::Completed,
            ))
        }
        DisputeResolution::Dismiss => Ok((
            DisputeStatus::Closed,
            ContractStatus::Active,
            ProjectStatus::InProgress,
        )),
    }
}

#[derive(Debug, Serialize)]
pub struct DisputeSettlement {
    pub dispute: Dispute,
    pub contract: Contract,
    #[serde(flatten)]
    pub funds: ContractSettlement,
}

#[derive(Debug, Clone)]
pub struct DisputeService {
    db_client: Arc<DBClient>,
    escrow: Arc<EscrowService>,
    notifications: Arc<NotificationService>,
}

impl DisputeService {
    pub fn new(
        db_client: Arc<DBClient>,
        escrow: Arc<EscrowService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db_client,
            escrow,
            notifications,
        }
    }

    async fn load_dispute(&self, dispute_id: Uuid) -> Result<Dispute, ServiceError> {
        self.db_client
            .get_dispute(dispute_id)
            .await?
            .ok_or(ServiceError::DisputeNotFound(dispute_id))
    }

    fn ensure_can_view(dispute: &Dispute, user: &User) -> Result<(), ServiceError> {
        if dispute.raised_by == user.id || dispute.against == user.id || user.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "You are not involved in this dispute".to_string(),
            ))
        }
    }

    /// Opens a dispute on an active contract. The contract moves to
    /// `disputed`, which stops automatic release of its funds.
    pub async fn create_dispute(
        &self,
        contract_id: Uuid,
        user_id: Uuid,
        transaction_id: Option<Uuid>,
        reason: String,
        description: String,
    ) -> Result<Dispute, ServiceError> {
        let contract = self
            .db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        let against = contract
            .counterparty(user_id)
            .ok_or(ServiceError::NotContractParty(user_id, contract_id))?;

        contract.status.transition(ContractStatus::Disputed)?;

        if let Some(transaction_id) = transaction_id {
            let transaction = self
                .db_client
                .get_transaction(transaction_id)
                .await?
                .ok_or(ServiceError::TransactionNotFound(transaction_id))?;
            if transaction.contract_id != contract_id {
                return Err(ServiceError::Validation(
                    "Transaction does not belong to this contract".to_string(),
                ));
            }
        }

        let dispute = self
            .db_client
            .create_dispute(
                contract_id,
                transaction_id,
                user_id,
                against,
                reason,
                description,
            )
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("Contract is no longer active".to_string())
            })?;

        tracing::warn!(
            "Dispute {} opened on contract {} by {}",
            dispute.id,
            contract_id,
            user_id
        );
        self.notifications.notify_dispute_opened(&dispute).await;

        Ok(dispute)
    }

    pub async fn get_dispute(&self, dispute_id: Uuid, user: &User) -> Result<Dispute, ServiceError> {
        let dispute = self.load_dispute(dispute_id).await?;
        Self::ensure_can_view(&dispute, user)?;
        Ok(dispute)
    }

    pub async fn get_messages(
        &self,
        dispute_id: Uuid,
        user: &User,
    ) -> Result<Vec<DisputeMessage>, ServiceError> {
        let dispute = self.load_dispute(dispute_id).await?;
        Self::ensure_can_view(&dispute, user)?;
        Ok(self.db_client.get_dispute_messages(dispute_id).await?)
    }

    pub async fn add_message(
        &self,
        dispute_id: Uuid,
        user: &User,
        message: String,
    ) -> Result<DisputeMessage, ServiceError> {
        let dispute = self.load_dispute(dispute_id).await?;
        Self::ensure_can_view(&dispute, user)?;
        if dispute.status.is_settled() {
            return Err(ServiceError::Conflict("Dispute is already settled".to_string()));
        }

        Ok(self
            .db_client
            .add_dispute_message(dispute_id, user.id, message)
            .await?)
    }

    pub async fn list_disputes(
        &self,
        status: Option<DisputeStatus>,
        page: u32,
        limit: usize,
    ) -> Result<(Vec<Dispute>, i64), ServiceError> {
        let disputes = self.db_client.get_disputes(status, page, limit).await?;
        let total = self.db_client.count_disputes(status).await?;
        Ok((disputes, total))
    }

    pub async fn start_review(&self, dispute_id: Uuid, admin_id: Uuid) -> Result<Dispute, ServiceError> {
        let dispute = self
            .db_client
            .update_dispute_status(dispute_id, DisputeStatus::Open, DisputeStatus::UnderReview)
            .await?;

        match dispute {
            Some(dispute) => {
                tracing::info!("Dispute {} taken under review by {}", dispute_id, admin_id);
                Ok(dispute)
            }
            None => {
                let current = self.load_dispute(dispute_id).await?;
                Err(ServiceError::Conflict(format!(
                    "Dispute is {:?} and cannot be taken under review",
                    current.status
                )))
            }
        }
    }

    /// Settles a dispute. The dispute row is claimed first, then the contract
    /// status is written, and only then are gateway calls made. A gateway
    /// failure after that point is reported in the settlement, not rolled back.
    /// Every live transaction on the contract is settled, not only the one the
    /// dispute names, so no money is left on a closed contract.
    pub async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        admin_id: Uuid,
        resolution: DisputeResolution,
        notes: Option<String>,
    ) -> Result<DisputeSettlement, ServiceError> {
        let (dispute_status, contract_status, project_status) = settlement_plan(&resolution)?;

        let dispute = self.load_dispute(dispute_id).await?;
        if dispute.status.is_settled() {
            return Err(ServiceError::Conflict("Dispute is already settled".to_string()));
        }

        let contract = self
            .db_client
            .get_contract(dispute.contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(dispute.contract_id))?;
        contract.status.transition(contract_status)?;

        if resolution != DisputeResolution::Dismiss {
            let live = self.escrow.live_transactions(contract.id).await?;
            if let Some(moving) = unsettled_blocker(&live) {
                return Err(ServiceError::Conflict(format!(
                    "Transaction {} is still {}; resolve the dispute once it settles",
                    moving.id,
                    moving.status.to_str()
                )));
            }
        }

        let dispute = self
            .db_client
            .resolve_dispute(
                dispute_id,
                dispute_status,
                resolution.to_str(),
                notes,
                admin_id,
            )
            .await?
            .ok_or_else(|| ServiceError::Conflict("Dispute is already settled".to_string()))?;

        let contract = self
            .db_client
            .update_contract_status(contract.id, contract.status, contract_status)
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("Contract status changed during resolution".to_string())
            })?;

        self.db_client
            .update_project_status(contract.project_id, project_status)
            .await?;
        CacheHelper::invalidate(
            self.db_client.redis_client.as_ref(),
            &[project_key(contract.project_id)],
        )
        .await;

        let funds = self.escrow.settle_contract(contract.id, &resolution).await?;
        for refunded in &funds.refunded {
            self.notifications.push_payment_update(refunded).await;
        }
        for paid in &funds.paid_out {
            self.notifications.notify_payment_released(paid).await;
        }
        for error in &funds.errors {
            tracing::error!("Dispute {} settlement: {}", dispute_id, error);
        }

        let settlement = DisputeSettlement {
            dispute,
            contract,
            funds,
        };

        tracing::info!(
            "Dispute {} resolved by {} as {}: {} refunded, {} paid out, {} cancelled, {} error(s)",
            dispute_id,
            admin_id,
            resolution.to_str(),
            settlement.funds.refunded.len(),
            settlement.funds.paid_out.len(),
            settlement.funds.cancelled.len(),
            settlement.funds.errors.len()
        );
        self.notifications
            .notify_dispute_resolved(&settlement.dispute)
            .await;

        Ok(settlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_plan() {
        let (dispute, contract, project) = settlement_plan(&DisputeResolution::RefundClient).unwrap();
        assert_eq!(dispute, DisputeStatus::Resolved);
        assert_eq!(contract, ContractStatus::Cancelled);
        assert_eq!(project, ProjectStatus::Cancelled);

        let (dispute, contract, _) = settlement_plan(&DisputeResolution::Dismiss).unwrap();
        assert_eq!(dispute, DisputeStatus::Closed);
        assert_eq!(contract, ContractStatus::Active);

        let (_, contract, _) = settlement_plan(&DisputeResolution::Split {
            freelancer_percentage: 60.0,
        })
        .unwrap();
        assert_eq!(contract, ContractStatus::Completed);
    }

    #[test]
    fn test_split_percentage_bounds() {
        for bad in [-1.0, 100.5, f64::NAN] {
            let err = settlement_plan(&DisputeResolution::Split {
                freelancer_percentage: bad,
            })
            .unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }
        assert!(settlement_plan(&DisputeResolution::Split {
            freelancer_percentage: 0.0
        })
        .is_ok());
    }

    #[test]
    fn test_every_outcome_leaves_disputed_contract_validly() {
        for resolution in [
            DisputeResolution::RefundClient,
            DisputeResolution::ReleaseToFreelancer,
            DisputeResolution::Split {
                freelancer_percentage: 50.0,
            },
            DisputeResolution::Dismiss,
        ] {
            let (_, contract, _) = settlement_plan(&resolution).unwrap();
            assert!(ContractStatus::Disputed.can_transition_to(contract));
        }
    }
}
