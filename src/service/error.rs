use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::HttpError, models::contractmodel::TransitionError,
    service::payment_provider::GatewayError,
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Project {0} not found")]
    ProjectNotFound(Uuid),

    #[error("Proposal {0} not found")]
    ProposalNotFound(Uuid),

    #[error("Contract {0} not found")]
    ContractNotFound(Uuid),

    #[error("Milestone {0} not found")]
    MilestoneNotFound(Uuid),

    #[error("Transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Dispute {0} not found")]
    DisputeNotFound(Uuid),

    #[error("User {0} is not a party to contract {1}")]
    NotContractParty(Uuid, Uuid),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Conflict(String),

    #[error("User {0} has no payout account")]
    MissingPayoutAccount(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        match error {
            ServiceError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                HttpError::server_error("Database operation failed")
            }
            _ => HttpError::new(error.to_string(), status),
        }
    }
}

impl From<String> for ServiceError {
    fn from(err: String) -> Self {
        ServiceError::Other(err)
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UserNotFound(_)
            | ServiceError::ProjectNotFound(_)
            | ServiceError::ProposalNotFound(_)
            | ServiceError::ContractNotFound(_)
            | ServiceError::MilestoneNotFound(_)
            | ServiceError::TransactionNotFound(_)
            | ServiceError::DisputeNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::NotContractParty(_, _) | ServiceError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }

            ServiceError::Transition(TransitionError::AmountMismatch { .. })
            | ServiceError::Transition(TransitionError::NoMilestones)
            | ServiceError::MissingPayoutAccount(_)
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,

            ServiceError::Transition(_) | ServiceError::Conflict(_) => StatusCode::CONFLICT,

            ServiceError::Gateway(_) => StatusCode::BAD_GATEWAY,

            ServiceError::Database(_) | ServiceError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contractmodel::{ContractStatus, MilestoneStatus};

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::ContractNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Transition(TransitionError::InvalidMilestoneTransition {
                from: MilestoneStatus::Pending,
                to: MilestoneStatus::Paid,
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Transition(TransitionError::NoMilestones).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Gateway(GatewayError::Rejected("card_declined".to_string()))
                .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_into_http_error() {
        let err: HttpError =
            ServiceError::Transition(TransitionError::ContractNotActive(ContractStatus::Draft))
                .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(err.message.contains("Draft"));

        let err: HttpError = ServiceError::Database(sqlx::Error::RowNotFound).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Database operation failed");
    }
}
