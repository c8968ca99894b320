use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationDto {
    pub participant_id: Uuid,
    pub project_id: Option<Uuid>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageDto {
    #[validate(length(min = 1, max = 5000, message = "Message must be between 1-5000 characters"))]
    pub content: String,
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct MessageQueryDto {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

impl MessageQueryDto {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQueryDto {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
