use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::supportmodel::{TicketCategory, TicketPriority, TicketStatus};

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicketDto {
    #[validate(length(min = 5, max = 200, message = "Title must be between 5-200 characters"))]
    pub title: String,

    #[validate(length(min = 10, max = 5000, message = "Description must be at least 10 characters"))]
    pub description: String,

    pub category: TicketCategory,

    pub priority: Option<TicketPriority>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct TicketMessageDto {
    #[validate(length(min = 1, max = 5000, message = "Message cannot be empty"))]
    pub message: String,

    /// Only honoured for admins.
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTicketStatusDto {
    pub status: TicketStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTicketDto {
    pub assigned_to: Uuid,
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct TicketQueryDto {
    pub status: Option<TicketStatus>,
    #[validate(range(min = 1))]
    pub page: Option<usize>,
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<usize>,
}
