use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateReviewDto {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,

    #[serde(default)]
    #[validate(length(max = 2000, message = "Comment must not exceed 2000 characters"))]
    pub comment: String,
}
