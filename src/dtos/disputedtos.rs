use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::disputemodel::{DisputeResolution, DisputeStatus};

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateDisputeDto {
    #[validate(length(min = 5, max = 200, message = "Reason must be between 5-200 characters"))]
    pub reason: String,

    #[validate(length(min = 20, max = 5000, message = "Description must be at least 20 characters"))]
    pub description: String,

    pub transaction_id: Option<Uuid>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct DisputeMessageDto {
    #[validate(length(min = 1, max = 5000, message = "Message cannot be empty"))]
    pub message: String,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDisputeDto {
    pub resolution: DisputeResolution,

    #[validate(length(max = 5000))]
    pub notes: Option<String>,
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct DisputeQueryDto {
    pub status: Option<DisputeStatus>,
    #[validate(range(min = 1))]
    pub page: Option<usize>,
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_body() {
        let dto: ResolveDisputeDto = serde_json::from_str(
            r#"{"resolution":{"type":"split","freelancer_percentage":70},"notes":"partial work"}"#,
        )
        .unwrap();
        assert_eq!(
            dto.resolution,
            DisputeResolution::Split {
                freelancer_percentage: 70.0
            }
        );
    }
}
