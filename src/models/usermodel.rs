use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Freelancer,
    Admin,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Client => "client",
            UserRole::Freelancer => "freelancer",
            UserRole::Admin => "admin",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: uuid::Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: UserRole,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub hourly_rate: Option<BigDecimal>,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub payout_account_id: Option<String>,
    pub rating_average: f64,
    pub rating_count: i32,
    pub is_active: bool,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Aggregate of the ratings a user has received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub average: f64,
    pub count: i32,
}

impl RatingSummary {
    /// Mean rating rounded to two decimals; zero when there are no reviews.
    pub fn from_ratings(ratings: &[i32]) -> Self {
        if ratings.is_empty() {
            return RatingSummary {
                average: 0.0,
                count: 0,
            };
        }

        let total: i64 = ratings.iter().map(|r| *r as i64).sum();
        let average = total as f64 / ratings.len() as f64;

        RatingSummary {
            average: (average * 100.0).round() / 100.0,
            count: ratings.len() as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_recalculation() {
        let summary = RatingSummary::from_ratings(&[4, 5, 3]);
        assert_eq!(summary.average, 4.0);
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn test_rating_rounding_and_empty() {
        let summary = RatingSummary::from_ratings(&[5, 4, 4]);
        assert_eq!(summary.average, 4.33);
        assert_eq!(summary.count, 3);

        let empty = RatingSummary::from_ratings(&[]);
        assert_eq!(empty.average, 0.0);
        assert_eq!(empty.count, 0);
    }
}
