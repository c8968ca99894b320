use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Closed,
}

impl DisputeStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, DisputeStatus::Resolved | DisputeStatus::Closed)
    }
}

/// Outcome an admin picks when settling a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisputeResolution {
    RefundClient,
    ReleaseToFreelancer,
    Split { freelancer_percentage: f64 },
    Dismiss,
}

impl DisputeResolution {
    pub fn to_str(&self) -> &str {
        match self {
            DisputeResolution::RefundClient => "refund_client",
            DisputeResolution::ReleaseToFreelancer => "release_to_freelancer",
            DisputeResolution::Split { .. } => "split",
            DisputeResolution::Dismiss => "dismiss",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dispute {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub raised_by: Uuid,
    pub against: Uuid,
    pub reason: String,
    pub description: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DisputeMessage {
    pub id: Uuid,
    pub dispute_id: Uuid,
    pub sender_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_wire_format() {
        let split: DisputeResolution =
            serde_json::from_str(r#"{"type":"split","freelancer_percentage":60.0}"#).unwrap();
        assert_eq!(split, DisputeResolution::Split { freelancer_percentage: 60.0 });
        assert_eq!(split.to_str(), "split");

        let refund: DisputeResolution = serde_json::from_str(r#"{"type":"refund_client"}"#).unwrap();
        assert_eq!(refund, DisputeResolution::RefundClient);
    }
}
