use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Human-readable form for notification text.
    pub fn label(&self) -> &str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    /// A closed ticket only takes replies from staff.
    pub fn accepts_user_replies(&self) -> bool {
        !matches!(self, TicketStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "ticket_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "ticket_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    General,
    Technical,
    Billing,
    Account,
    Other,
}

impl TicketCategory {
    /// Priority used when the reporter does not pick one. Money problems jump the queue.
    pub fn default_priority(&self) -> TicketPriority {
        match self {
            TicketCategory::Billing => TicketPriority::High,
            TicketCategory::Account | TicketCategory::Technical => TicketPriority::Medium,
            TicketCategory::General | TicketCategory::Other => TicketPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SupportTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SupportMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportTicketWithMessages {
    pub ticket: SupportTicket,
    pub messages: Vec<SupportMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_tickets_default_high() {
        assert_eq!(TicketCategory::Billing.default_priority(), TicketPriority::High);
        assert_eq!(TicketCategory::General.default_priority(), TicketPriority::Low);
    }

    #[test]
    fn test_closed_tickets_refuse_user_replies() {
        assert!(TicketStatus::Resolved.accepts_user_replies());
        assert!(!TicketStatus::Closed.accepts_user_replies());
    }
}
