use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use validator::{Validate, ValidationError};

use crate::models::usermodel::{User, UserRole};

fn validate_signup_role(role: &UserRole) -> Result<(), ValidationError> {
    if *role == UserRole::Admin {
        let mut error = ValidationError::new("invalid_role");
        error.message = Some("Role must be client or freelancer".into());
        return Err(error);
    }
    Ok(())
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserDto {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,

    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email is invalid")
    )]
    pub email: String,

    #[validate(length(min = 8, max = 64, message = "Password must be between 8-64 characters"))]
    pub password: String,

    #[validate(must_match(other = "password", message = "passwords do not match"))]
    #[serde(rename = "passwordConfirm")]
    pub password_confirm: String,

    #[validate(custom = "validate_signup_role")]
    pub role: UserRole,
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct LoginUserDto {
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email is invalid")
    )]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// What other users may see of an account.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterUserDto {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub hourly_rate: Option<BigDecimal>,
    pub avatar_url: Option<String>,
    pub rating_average: f64,
    pub rating_count: i32,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl FilterUserDto {
    pub fn filter_user(user: &User) -> Self {
        FilterUserDto {
            id: user.id.to_string(),
            name: user.name.to_owned(),
            role: user.role,
            bio: user.bio.clone(),
            skills: user.skills.clone(),
            hourly_rate: user.hourly_rate.clone(),
            avatar_url: user.avatar_url.clone(),
            rating_average: user.rating_average,
            rating_count: user.rating_count,
            created_at: user.created_at,
        }
    }
}

/// The account owner's own view, including private fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeDto {
    #[serde(flatten)]
    pub profile: FilterUserDto,
    pub email: String,
    pub has_payout_account: bool,
    pub is_active: bool,
}

impl MeDto {
    pub fn from_user(user: &User) -> Self {
        MeDto {
            profile: FilterUserDto::filter_user(user),
            email: user.email.clone(),
            has_payout_account: user.payout_account_id.is_some(),
            is_active: user.is_active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserLoginResponseDto {
    pub status: String,
    pub token: String,
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct UpdateProfileDto {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1-100 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 2000, message = "Bio must not exceed 2000 characters"))]
    pub bio: Option<String>,

    #[validate(length(max = 30, message = "At most 30 skills"))]
    pub skills: Option<Vec<String>>,

    #[validate(range(min = 0.0, max = 100000.0, message = "Hourly rate is out of range"))]
    pub hourly_rate: Option<f64>,

    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar_url: Option<String>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccountDto {
    #[validate(length(min = 3, max = 255, message = "Payout account id is required"))]
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleUpdateDto {
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveUpdateDto {
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(role: UserRole, confirm: &str) -> RegisterUserDto {
        RegisterUserDto {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "password123".to_string(),
            password_confirm: confirm.to_string(),
            role,
        }
    }

    #[test]
    fn test_register_validation() {
        assert!(register(UserRole::Freelancer, "password123").validate().is_ok());
        assert!(register(UserRole::Client, "different").validate().is_err());
        assert!(register(UserRole::Admin, "password123").validate().is_err());
    }

    #[test]
    fn test_profile_update_validation() {
        let ok = UpdateProfileDto {
            avatar_url: Some("https://cdn.example.com/a.png".to_string()),
            hourly_rate: Some(45.0),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad = UpdateProfileDto {
            avatar_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
