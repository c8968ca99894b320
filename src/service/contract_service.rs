// service/contract_service.rs
use std::sync::Arc;

use serde::Serialize;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    db::{
        cache::{project_key, CacheHelper, PROJECT_LIST_PATTERN},
        contractdb::ContractExt,
        projectdb::ProjectExt,
        DBClient,
    },
    models::{
        contractmodel::{
            check_milestone_transition, validate_milestone_amounts, Contract, ContractParty,
            ContractStatus, ContractWithMilestones, Milestone, MilestoneStatus, NewMilestone,
            TransitionError,
        },
        projectmodel::{Project, ProjectStatus, Proposal, ProposalStatus, ProposedMilestone},
        transactionmodel::Transaction,
        usermodel::{User, UserRole},
    },
    service::{
        error::ServiceError,
        escrow_service::{EscrowService, FundingResult, ReleaseOutcome},
        notification_service::NotificationService,
    },
};

/// Milestones for a new contract: the proposal's own breakdown, or a single
/// milestone for the whole bid when the freelancer proposed none.
pub fn milestones_from_proposal(
    proposal: &Proposal,
    project: &Project,
) -> Result<Vec<NewMilestone>, TransitionError> {
    let milestones: Vec<NewMilestone> = if proposal.milestones.0.is_empty() {
        vec![NewMilestone {
            title: project.title.clone(),
            description: Some("Full project delivery".to_string()),
            amount: proposal.bid_amount.clone(),
            due_date: project.deadline,
        }]
    } else {
        proposal
            .milestones
            .0
            .iter()
            .map(|m| NewMilestone {
                title: m.title.clone(),
                description: m.description.clone(),
                amount: m.amount.clone(),
                due_date: m.due_date,
            })
            .collect()
    };

    let amounts: Vec<BigDecimal> = milestones.iter().map(|m| m.amount.clone()).collect();
    validate_milestone_amounts(&proposal.bid_amount, &amounts)?;
    Ok(milestones)
}

/// Which side of the contract may move a milestone into `to`.
pub fn milestone_actor(to: MilestoneStatus) -> Option<ContractParty> {
    match to {
        MilestoneStatus::InProgress | MilestoneStatus::Submitted => Some(ContractParty::Freelancer),
        MilestoneStatus::Approved | MilestoneStatus::Rejected => Some(ContractParty::Client),
        // only the escrow release path pays
        MilestoneStatus::Pending | MilestoneStatus::Paid => None,
    }
}

#[derive(Debug, Serialize)]
pub struct MilestoneApproval {
    pub milestone: Milestone,
    pub payment: Option<Transaction>,
    pub contract_completed: bool,
    /// Set when held funds exist but the payout could not be made yet.
    pub release_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContractService {
    db_client: Arc<DBClient>,
    escrow: Arc<EscrowService>,
    notifications: Arc<NotificationService>,
}

impl ContractService {
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

    async fn invalidate_project(&self, project_id: Uuid) {
        let redis = self.db_client.redis_client.as_ref();
        CacheHelper::invalidate(redis, &[project_key(project_id)]).await;
        CacheHelper::invalidate_pattern(redis, PROJECT_LIST_PATTERN).await;
    }

    async fn load_project(&self, project_id: Uuid) -> Result<Project, ServiceError> {
        self.db_client
            .get_project(project_id)
            .await?
            .ok_or(ServiceError::ProjectNotFound(project_id))
    }

    async fn load_proposal(&self, proposal_id: Uuid) -> Result<Proposal, ServiceError> {
        self.db_client
            .get_proposal(proposal_id)
            .await?
            .ok_or(ServiceError::ProposalNotFound(proposal_id))
    }

    async fn load_contract(&self, contract_id: Uuid) -> Result<Contract, ServiceError> {
        self.db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))
    }

    async fn load_party_contract(
        &self,
        contract_id: Uuid,
        user_id: Uuid,
    ) -> Result<(Contract, ContractParty), ServiceError> {
        let contract = self.load_contract(contract_id).await?;
        let party = contract
            .party(user_id)
            .ok_or(ServiceError::NotContractParty(user_id, contract_id))?;
        Ok((contract, party))
    }

    async fn load_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
    ) -> Result<Milestone, ServiceError> {
        self.db_client
            .get_milestone(contract_id, milestone_id)
            .await?
            .ok_or(ServiceError::MilestoneNotFound(milestone_id))
    }

    pub async fn submit_proposal(
        &self,
        project_id: Uuid,
        freelancer: &User,
        cover_letter: String,
        bid_amount: BigDecimal,
        estimated_days: i32,
        milestones: Vec<ProposedMilestone>,
    ) -> Result<Proposal, ServiceError> {
        if freelancer.role != UserRole::Freelancer {
            return Err(ServiceError::Forbidden(
                "Only freelancers can submit proposals".to_string(),
            ));
        }

        let project = self.load_project(project_id).await?;
        if project.status != ProjectStatus::Open {
            return Err(ServiceError::Conflict(
                "Project is not accepting proposals".to_string(),
            ));
        }
        if project.client_id == freelancer.id {
            return Err(ServiceError::Forbidden(
                "You cannot bid on your own project".to_string(),
            ));
        }

        if !milestones.is_empty() {
            let amounts: Vec<BigDecimal> = milestones.iter().map(|m| m.amount.clone()).collect();
            validate_milestone_amounts(&bid_amount, &amounts)?;
        }

        if self
            .db_client
            .has_pending_proposal(project_id, freelancer.id)
            .await?
        {
            return Err(ServiceError::Conflict(
                "You already have a pending proposal for this project".to_string(),
            ));
        }

        let proposal = self
            .db_client
            .create_proposal(
                project_id,
                freelancer.id,
                cover_letter,
                bid_amount,
                estimated_days,
                milestones,
            )
            .await?;

        tracing::info!(
            "Proposal {} submitted for project {} by {}",
            proposal.id,
            project_id,
            freelancer.id
        );
        self.notifications
            .notify_proposal_received(&project, &proposal)
            .await;

        Ok(proposal)
    }

    /// Accepts a proposal and writes the draft contract with its milestones.
    pub async fn accept_proposal(
        &self,
        proposal_id: Uuid,
        client_id: Uuid,
    ) -> Result<ContractWithMilestones, ServiceError> {
        let proposal = self.load_proposal(proposal_id).await?;
        let project = self.load_project(proposal.project_id).await?;

        if project.client_id != client_id {
            return Err(ServiceError::Forbidden(
                "Only the project owner can accept proposals".to_string(),
            ));
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(ServiceError::Conflict(
                "Proposal is no longer pending".to_string(),
            ));
        }
        if project.status != ProjectStatus::Open {
            return Err(ServiceError::Conflict("Project is no longer open".to_string()));
        }

        let milestones = milestones_from_proposal(&proposal, &project)?;

        let contract = self
            .db_client
            .create_contract_from_proposal(&proposal, &project, milestones)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Proposal is no longer pending".to_string()))?;

        tracing::info!(
            "Proposal {} accepted, contract {} created with {} milestone(s)",
            proposal.id,
            contract.contract.id,
            contract.milestones.len()
        );

        self.invalidate_project(project.id).await;
        self.notifications
            .notify_proposal_accepted(&proposal, &contract.contract)
            .await;

        Ok(contract)
    }

    pub async fn reject_proposal(
        &self,
        proposal_id: Uuid,
        client_id: Uuid,
    ) -> Result<Proposal, ServiceError> {
        let proposal = self.load_proposal(proposal_id).await?;
        let project = self.load_project(proposal.project_id).await?;
        if project.client_id != client_id {
            return Err(ServiceError::Forbidden(
                "Only the project owner can reject proposals".to_string(),
            ));
        }

        let rejected = self
            .db_client
            .close_pending_proposal(proposal_id, ProposalStatus::Rejected)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Proposal is no longer pending".to_string()))?;

        self.notifications
            .notify_proposal_rejected(&rejected, &project)
            .await;
        Ok(rejected)
    }

    pub async fn withdraw_proposal(
        &self,
        proposal_id: Uuid,
        freelancer_id: Uuid,
    ) -> Result<Proposal, ServiceError> {
        let proposal = self.load_proposal(proposal_id).await?;
        if proposal.freelancer_id != freelancer_id {
            return Err(ServiceError::Forbidden(
                "You can only withdraw your own proposals".to_string(),
            ));
        }

        self.db_client
            .close_pending_proposal(proposal_id, ProposalStatus::Withdrawn)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Proposal is no longer pending".to_string()))
    }

    /// Contract with milestones, visible to its parties and to admins.
    pub async fn get_contract(
        &self,
        contract_id: Uuid,
        user: &User,
    ) -> Result<ContractWithMilestones, ServiceError> {
        let contract = self
            .db_client
            .get_contract_with_milestones(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        if contract.contract.party(user.id).is_none() && !user.is_admin() {
            return Err(ServiceError::NotContractParty(user.id, contract_id));
        }
        Ok(contract)
    }

    pub async fn sign_contract(
        &self,
        contract_id: Uuid,
        user_id: Uuid,
    ) -> Result<Contract, ServiceError> {
        let (contract, party) = self.load_party_contract(contract_id, user_id).await?;
        if contract.status != ContractStatus::Draft {
            return Err(ServiceError::Conflict(format!(
                "Contract is {} and can no longer be signed",
                contract.status.to_str()
            )));
        }

        let signed = self
            .db_client
            .sign_contract(contract_id, party)
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("Contract can no longer be signed".to_string())
            })?;

        if signed.status == ContractStatus::Active {
            tracing::info!("Contract {} signed by both parties and active", contract_id);
            self.notifications
                .notify_contract_update(&signed, user_id, "signed by both parties and is now active")
                .await;
        } else {
            self.notifications
                .notify_contract_update(&signed, user_id, "signed by the other party")
                .await;
        }

        Ok(signed)
    }

    /// Cancels a draft or active contract. Refused while any funds are live;
    /// those go through a dispute.
    pub async fn cancel_contract(
        &self,
        contract_id: Uuid,
        user_id: Uuid,
    ) -> Result<Contract, ServiceError> {
        let (contract, _) = self.load_party_contract(contract_id, user_id).await?;
        contract.status.transition(ContractStatus::Cancelled)?;

        if self.db_client.has_live_funds(contract_id).await? {
            return Err(ServiceError::Conflict(
                "Contract has funds in flight; open a dispute instead".to_string(),
            ));
        }

        let cancelled = self
            .db_client
            .update_contract_status(contract_id, contract.status, ContractStatus::Cancelled)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Contract status changed, retry".to_string()))?;

        self.db_client
            .update_project_status(cancelled.project_id, ProjectStatus::Cancelled)
            .await?;
        self.invalidate_project(cancelled.project_id).await;

        tracing::info!("Contract {} cancelled by {}", contract_id, user_id);
        self.notifications
            .notify_contract_update(&cancelled, user_id, "cancelled")
            .await;

        Ok(cancelled)
    }

    /// Replaces the milestones of a draft contract. Both parties must sign again.
    pub async fn replace_milestones(
        &self,
        contract_id: Uuid,
        user_id: Uuid,
        milestones: Vec<NewMilestone>,
    ) -> Result<ContractWithMilestones, ServiceError> {
        let (contract, _) = self.load_party_contract(contract_id, user_id).await?;
        if contract.status != ContractStatus::Draft {
            return Err(ServiceError::Conflict(
                "Milestones can only be edited on a draft contract".to_string(),
            ));
        }

        let amounts: Vec<BigDecimal> = milestones.iter().map(|m| m.amount.clone()).collect();
        validate_milestone_amounts(&contract.total_amount, &amounts)?;

        let updated = self
            .db_client
            .replace_milestones(contract_id, milestones)
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict("Contract is no longer a draft".to_string())
            })?;

        self.notifications
            .notify_contract_update(&updated.contract, user_id, "edited; please review and sign again")
            .await;
        Ok(updated)
    }

    /// Moves a milestone on behalf of the contract party allowed to make the move.
    async fn move_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
        user_id: Uuid,
        to: MilestoneStatus,
        note: Option<String>,
    ) -> Result<(Contract, Milestone), ServiceError> {
        let (contract, party) = self.load_party_contract(contract_id, user_id).await?;
        if milestone_actor(to) != Some(party) {
            return Err(ServiceError::Forbidden(format!(
                "The {:?} cannot move a milestone to {}",
                party,
                to.to_str()
            )));
        }

        let milestone = self.load_milestone(contract_id, milestone_id).await?;
        check_milestone_transition(contract.status, milestone.status, to)?;

        let updated = self
            .db_client
            .update_milestone_status(milestone_id, milestone.status, to, note)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Milestone status changed, retry".to_string()))?;

        if let Some(recipient) = contract.counterparty(user_id) {
            self.notifications
                .notify_milestone_update(&contract, &updated, recipient)
                .await;
        }

        Ok((contract, updated))
    }

    pub async fn start_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
        user_id: Uuid,
    ) -> Result<Milestone, ServiceError> {
        let (_, milestone) = self
            .move_milestone(contract_id, milestone_id, user_id, MilestoneStatus::InProgress, None)
            .await?;
        Ok(milestone)
    }

    pub async fn submit_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
        user_id: Uuid,
        note: Option<String>,
    ) -> Result<Milestone, ServiceError> {
        let (_, milestone) = self
            .move_milestone(contract_id, milestone_id, user_id, MilestoneStatus::Submitted, note)
            .await?;
        Ok(milestone)
    }

    pub async fn reject_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
        user_id: Uuid,
        reason: String,
    ) -> Result<Milestone, ServiceError> {
        let (_, milestone) = self
            .move_milestone(
                contract_id,
                milestone_id,
                user_id,
                MilestoneStatus::Rejected,
                Some(reason),
            )
            .await?;
        Ok(milestone)
    }

    /// Approves submitted work and releases the milestone's held funds without
    /// waiting for the hold period. A failed payout leaves the funds held for
    /// the release job to retry.
    pub async fn approve_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
        user_id: Uuid,
    ) -> Result<MilestoneApproval, ServiceError> {
        let (contract, milestone) = self
            .move_milestone(contract_id, milestone_id, user_id, MilestoneStatus::Approved, None)
            .await?;

        let mut approval = MilestoneApproval {
            milestone,
            payment: None,
            contract_completed: false,
            release_error: None,
        };

        match self.escrow.release_milestone(milestone_id).await {
            Ok(Some(ReleaseOutcome::Released(payout))) => {
                tracing::info!(
                    "Milestone {} approved and paid out via {}",
                    milestone_id,
                    payout.transaction.id
                );
                self.notifications
                    .notify_payment_released(&payout.transaction)
                    .await;
                if payout.contract_completed {
                    self.invalidate_project(contract.project_id).await;
                }
                approval.contract_completed = payout.contract_completed;
                approval.payment = Some(payout.transaction);
                approval.milestone = self.load_milestone(contract_id, milestone_id).await?;
            }
            Ok(Some(ReleaseOutcome::Failed(message))) => {
                tracing::warn!(
                    "Milestone {} approved but payout failed: {}",
                    milestone_id,
                    message
                );
                approval.release_error = Some(message);
            }
            Ok(Some(ReleaseOutcome::Skipped)) | Ok(None) => {
                tracing::debug!("Milestone {} approved with no held funds", milestone_id);
            }
            Err(e) => {
                tracing::error!(
                    "Milestone {} approved but release errored: {}",
                    milestone_id,
                    e
                );
                approval.release_error = Some(e.to_string());
            }
        }

        Ok(approval)
    }

    pub async fn fund_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
        user_id: Uuid,
    ) -> Result<FundingResult, ServiceError> {
        let (contract, _) = self.load_party_contract(contract_id, user_id).await?;
        let milestone = self.load_milestone(contract_id, milestone_id).await?;

        let funding = self
            .escrow
            .fund_milestone(&contract, &milestone, user_id)
            .await?;
        self.notifications
            .push_payment_update(&funding.transaction)
            .await;
        Ok(funding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn project() -> Project {
        let now = Utc::now();
        Project {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            title: "Marketing site".to_string(),
            description: "Five pages".to_string(),
            category: "web".to_string(),
            skills: vec!["rust".to_string()],
            budget_min: dec("500"),
            budget_max: dec("1500"),
            currency: "usd".to_string(),
            deadline: None,
            status: ProjectStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    fn proposal(project: &Project, bid: &str, milestones: Vec<ProposedMilestone>) -> Proposal {
        let now = Utc::now();
        Proposal {
            id: Uuid::new_v4(),
            project_id: project.id,
            freelancer_id: Uuid::new_v4(),
            cover_letter: "I can do this".to_string(),
            bid_amount: dec(bid),
            estimated_days: 14,
            milestones: Json(milestones),
            status: ProposalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn proposed(title: &str, amount: &str) -> ProposedMilestone {
        ProposedMilestone {
            title: title.to_string(),
            description: None,
            amount: dec(amount),
            due_date: None,
        }
    }

    #[test]
    fn test_proposal_without_milestones_gets_one() {
        let project = project();
        let proposal = proposal(&project, "1000.00", vec![]);

        let milestones = milestones_from_proposal(&proposal, &project).unwrap();
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].amount, dec("1000.00"));
        assert_eq!(milestones[0].title, "Marketing site");
    }

    #[test]
    fn test_proposed_milestones_are_copied_in_order() {
        let project = project();
        let proposal = proposal(
            &project,
            "1000.00",
            vec![proposed("Design", "400.00"), proposed("Build", "600.00")],
        );

        let milestones = milestones_from_proposal(&proposal, &project).unwrap();
        let titles: Vec<&str> = milestones.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Design", "Build"]);
    }

    #[test]
    fn test_proposed_milestones_must_sum_to_bid() {
        let project = project();
        let proposal = proposal(
            &project,
            "1000.00",
            vec![proposed("Design", "400.00"), proposed("Build", "500.00")],
        );

        let err = milestones_from_proposal(&proposal, &project).unwrap_err();
        assert!(matches!(err, TransitionError::AmountMismatch { .. }));
    }

    #[test]
    fn test_milestone_actor() {
        assert_eq!(
            milestone_actor(MilestoneStatus::Submitted),
            Some(ContractParty::Freelancer)
        );
        assert_eq!(
            milestone_actor(MilestoneStatus::Approved),
            Some(ContractParty::Client)
        );
        assert_eq!(milestone_actor(MilestoneStatus::Paid), None);
    }
}
