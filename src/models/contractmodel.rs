use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::utils::currency::sum_amounts;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
    Disputed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "milestone_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Approved,
    Rejected,
    Paid,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Contract cannot move from {from:?} to {to:?}")]
    InvalidContractTransition {
        from: ContractStatus,
        to: ContractStatus,
    },

    #[error("Milestone cannot move from {from:?} to {to:?}")]
    InvalidMilestoneTransition {
        from: MilestoneStatus,
        to: MilestoneStatus,
    },

    #[error("Milestone work requires an active contract, contract is {0:?}")]
    ContractNotActive(ContractStatus),

    #[error("Milestone cannot be paid while the contract is {0:?}")]
    ContractNotPayable(ContractStatus),

    #[error("Milestone amounts sum to {sum} but the contract total is {total}")]
    AmountMismatch { total: BigDecimal, sum: BigDecimal },

    #[error("A contract needs at least one milestone")]
    NoMilestones,
}

impl ContractStatus {
    pub fn to_str(&self) -> &str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::Active => "active",
            ContractStatus::Completed => "completed",
            ContractStatus::Cancelled => "cancelled",
            ContractStatus::Disputed => "disputed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContractStatus::Completed | ContractStatus::Cancelled)
    }

    pub fn can_transition_to(&self, to: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, to),
            (Draft, Active)
                | (Draft, Cancelled)
                | (Active, Completed)
                | (Active, Cancelled)
                | (Active, Disputed)
                | (Disputed, Active)
                | (Disputed, Completed)
                | (Disputed, Cancelled)
        )
    }

    pub fn transition(self, to: ContractStatus) -> Result<ContractStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError::InvalidContractTransition { from: self, to })
        }
    }

    /// Milestones may only be marked paid while the contract is active or completed.
    pub fn allows_payment(&self) -> bool {
        matches!(self, ContractStatus::Active | ContractStatus::Completed)
    }
}

impl MilestoneStatus {
    pub fn to_str(&self) -> &str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Submitted => "submitted",
            MilestoneStatus::Approved => "approved",
            MilestoneStatus::Rejected => "rejected",
            MilestoneStatus::Paid => "paid",
        }
    }

    pub fn can_transition_to(&self, to: MilestoneStatus) -> bool {
        use MilestoneStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Submitted)
                | (Submitted, Approved)
                | (Submitted, Rejected)
                | (Rejected, InProgress)
                | (Rejected, Submitted)
                | (Approved, Paid)
                // hold period elapsed without a client decision
                | (Submitted, Paid)
        )
    }
}

/// Validates a milestone move together with the status of its contract.
pub fn check_milestone_transition(
    contract_status: ContractStatus,
    from: MilestoneStatus,
    to: MilestoneStatus,
) -> Result<MilestoneStatus, TransitionError> {
    if !from.can_transition_to(to) {
        return Err(TransitionError::InvalidMilestoneTransition { from, to });
    }

    if to == MilestoneStatus::Paid {
        if !contract_status.allows_payment() {
            return Err(TransitionError::ContractNotPayable(contract_status));
        }
    } else if contract_status != ContractStatus::Active {
        return Err(TransitionError::ContractNotActive(contract_status));
    }

    Ok(to)
}

/// Milestone amounts must add up exactly to the contract total.
pub fn validate_milestone_amounts(
    total: &BigDecimal,
    amounts: &[BigDecimal],
) -> Result<(), TransitionError> {
    if amounts.is_empty() {
        return Err(TransitionError::NoMilestones);
    }

    let sum = sum_amounts(amounts);
    if &sum != total {
        return Err(TransitionError::AmountMismatch {
            total: total.clone(),
            sum,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractParty {
    Client,
    Freelancer,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub project_id: Uuid,
    pub proposal_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub title: String,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub status: ContractStatus,
    pub signed_by_client: bool,
    pub signed_by_freelancer: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn party(&self, user_id: Uuid) -> Option<ContractParty> {
        if self.client_id == user_id {
            Some(ContractParty::Client)
        } else if self.freelancer_id == user_id {
            Some(ContractParty::Freelancer)
        } else {
            None
        }
    }

    pub fn counterparty(&self, user_id: Uuid) -> Option<Uuid> {
        match self.party(user_id)? {
            ContractParty::Client => Some(self.freelancer_id),
            ContractParty::Freelancer => Some(self.client_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Milestone {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub position: i32,
    pub title: String,
    pub description: Option<String>,
    pub amount: BigDecimal,
    pub due_date: Option<DateTime<Utc>>,
    pub status: MilestoneStatus,
    pub submission_note: Option<String>,
    pub rejection_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Milestone values used when a contract is first written.
#[derive(Debug, Clone)]
pub struct NewMilestone {
    pub title: String,
    pub description: Option<String>,
    pub amount: BigDecimal,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractWithMilestones {
    #[serde(flatten)]
    pub contract: Contract,
    pub milestones: Vec<Milestone>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_contract_lifecycle() {
        let status = ContractStatus::Draft;
        let status = status.transition(ContractStatus::Active).unwrap();
        let status = status.transition(ContractStatus::Disputed).unwrap();
        let status = status.transition(ContractStatus::Completed).unwrap();
        assert!(status.is_terminal());

        assert_eq!(
            ContractStatus::Cancelled.transition(ContractStatus::Active),
            Err(TransitionError::InvalidContractTransition {
                from: ContractStatus::Cancelled,
                to: ContractStatus::Active,
            })
        );
        assert!(!ContractStatus::Draft.can_transition_to(ContractStatus::Completed));
    }

    #[test]
    fn test_milestone_happy_path() {
        let contract = ContractStatus::Active;
        let mut status = MilestoneStatus::Pending;
        for next in [
            MilestoneStatus::InProgress,
            MilestoneStatus::Submitted,
            MilestoneStatus::Approved,
            MilestoneStatus::Paid,
        ] {
            status = check_milestone_transition(contract, status, next).unwrap();
        }
        assert_eq!(status, MilestoneStatus::Paid);
    }

    #[test]
    fn test_rejected_milestone_can_be_reworked() {
        let contract = ContractStatus::Active;
        let status =
            check_milestone_transition(contract, MilestoneStatus::Submitted, MilestoneStatus::Rejected)
                .unwrap();
        assert!(check_milestone_transition(contract, status, MilestoneStatus::InProgress).is_ok());
        assert!(check_milestone_transition(contract, status, MilestoneStatus::Paid).is_err());
    }

    #[test]
    fn test_cannot_pay_on_cancelled_contract() {
        let err = check_milestone_transition(
            ContractStatus::Cancelled,
            MilestoneStatus::Approved,
            MilestoneStatus::Paid,
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::ContractNotPayable(ContractStatus::Cancelled));

        let err = check_milestone_transition(
            ContractStatus::Disputed,
            MilestoneStatus::Approved,
            MilestoneStatus::Paid,
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::ContractNotPayable(ContractStatus::Disputed));

        assert!(check_milestone_transition(
            ContractStatus::Completed,
            MilestoneStatus::Approved,
            MilestoneStatus::Paid,
        )
        .is_ok());
    }

    #[test]
    fn test_cannot_approve_on_cancelled_contract() {
        let err = check_milestone_transition(
            ContractStatus::Cancelled,
            MilestoneStatus::Submitted,
            MilestoneStatus::Approved,
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::ContractNotActive(ContractStatus::Cancelled));
    }

    #[test]
    fn test_milestone_amounts_must_match_total() {
        let total = dec("1000.00");
        assert!(validate_milestone_amounts(&total, &[dec("400.00"), dec("600")]).is_ok());

        let err = validate_milestone_amounts(&total, &[dec("400.00"), dec("500.00")]).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AmountMismatch {
                total: dec("1000.00"),
                sum: dec("900.00"),
            }
        );
        assert_eq!(
            validate_milestone_amounts(&total, &[]),
            Err(TransitionError::NoMilestones)
        );
    }

    #[test]
    fn test_party_lookup() {
        let client = Uuid::new_v4();
        let freelancer = Uuid::new_v4();
        let now = Utc::now();
        let contract = Contract {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            client_id: client,
            freelancer_id: freelancer,
            title: "Landing page".to_string(),
            total_amount: dec("500.00"),
            currency: "usd".to_string(),
            status: ContractStatus::Active,
            signed_by_client: true,
            signed_by_freelancer: true,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(contract.party(client), Some(ContractParty::Client));
        assert_eq!(contract.counterparty(freelancer), Some(client));
        assert_eq!(contract.party(Uuid::new_v4()), None);
    }
}
