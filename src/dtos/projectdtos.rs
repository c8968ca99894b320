use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    models::projectmodel::{ProjectStatus, ProposedMilestone},
    utils::currency::money_from_f64,
};

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectDto {
    #[validate(length(min = 5, max = 150, message = "Title must be between 5-150 characters"))]
    pub title: String,

    #[validate(length(min = 20, max = 10000, message = "Description must be at least 20 characters"))]
    pub description: String,

    #[validate(length(min = 2, max = 100, message = "Category is required"))]
    pub category: String,

    #[serde(default)]
    #[validate(length(max = 30, message = "At most 30 skills"))]
    pub skills: Vec<String>,

    #[validate(range(min = 1.0, message = "Minimum budget must be positive"))]
    pub budget_min: f64,

    #[validate(range(min = 1.0, message = "Maximum budget must be positive"))]
    pub budget_max: f64,

    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: Option<String>,

    pub deadline: Option<DateTime<Utc>>,
}

impl CreateProjectDto {
    pub fn validate_budget(&self) -> Result<(), String> {
        if self.budget_min > self.budget_max {
            return Err("Minimum budget cannot exceed maximum budget".to_string());
        }
        Ok(())
    }
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct UpdateProjectDto {
    #[validate(length(min = 5, max = 150, message = "Title must be between 5-150 characters"))]
    pub title: Option<String>,

    #[validate(length(min = 20, max = 10000, message = "Description must be at least 20 characters"))]
    pub description: Option<String>,

    #[validate(length(min = 2, max = 100))]
    pub category: Option<String>,

    #[validate(length(max = 30))]
    pub skills: Option<Vec<String>>,

    #[validate(range(min = 1.0))]
    pub budget_min: Option<f64>,

    #[validate(range(min = 1.0))]
    pub budget_max: Option<f64>,

    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProjectQueryDto {
    pub status: Option<ProjectStatus>,
    pub category: Option<String>,
    #[validate(length(max = 100))]
    pub search: Option<String>,
    #[validate(range(min = 1))]
    pub page: Option<usize>,
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<usize>,
}

impl ProjectQueryDto {
    /// Stable string for the list cache key.
    pub fn cache_fragment(&self) -> String {
        format!(
            "s={}&c={}&q={}&p={}&l={}",
            self.status.map(|s| format!("{:?}", s)).unwrap_or_default(),
            self.category.clone().unwrap_or_default(),
            self.search.clone().unwrap_or_default(),
            self.page.unwrap_or(1),
            self.limit.unwrap_or(super::DEFAULT_PAGE_SIZE)
        )
    }
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ProposedMilestoneDto {
    #[validate(length(min = 2, max = 150, message = "Milestone title must be between 2-150 characters"))]
    pub title: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    #[validate(range(min = 1.0, message = "Milestone amount must be positive"))]
    pub amount: f64,

    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateProposalDto {
    #[validate(length(min = 20, max = 5000, message = "Cover letter must be at least 20 characters"))]
    pub cover_letter: String,

    #[validate(range(min = 1.0, message = "Bid must be positive"))]
    pub bid_amount: f64,

    #[validate(range(min = 1, max = 365, message = "Estimated days must be between 1-365"))]
    pub estimated_days: i32,

    #[serde(default)]
    #[validate]
    pub milestones: Vec<ProposedMilestoneDto>,
}

impl CreateProposalDto {
    pub fn proposed_milestones(&self) -> Result<Vec<ProposedMilestone>, String> {
        self.milestones
            .iter()
            .map(|m| {
                Ok(ProposedMilestone {
                    title: m.title.clone(),
                    description: m.description.clone(),
                    amount: money_from_f64(m.amount)?,
                    due_date: m.due_date,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use sqlx::types::BigDecimal;

    #[test]
    fn test_budget_range() {
        let dto = CreateProjectDto {
            title: "Mobile app".to_string(),
            description: "A small mobile app for bookings".to_string(),
            category: "mobile".to_string(),
            skills: vec![],
            budget_min: 900.0,
            budget_max: 500.0,
            currency: None,
            deadline: None,
        };
        assert!(dto.validate().is_ok());
        assert!(dto.validate_budget().is_err());
    }

    #[test]
    fn test_title_fits_column() {
        let with_title = |len: usize| CreateProjectDto {
            title: "a".repeat(len),
            description: "A small mobile app for bookings".to_string(),
            category: "mobile".to_string(),
            skills: vec![],
            budget_min: 500.0,
            budget_max: 900.0,
            currency: None,
            deadline: None,
        };
        assert!(with_title(150).validate().is_ok());
        assert!(with_title(151).validate().is_err());

        let update = UpdateProjectDto {
            title: Some("a".repeat(151)),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let milestone = |len: usize| ProposedMilestoneDto {
            title: "m".repeat(len),
            description: None,
            amount: 100.0,
            due_date: None,
        };
        assert!(milestone(150).validate().is_ok());
        assert!(milestone(151).validate().is_err());
    }

    #[test]
    fn test_proposed_milestones_convert_to_cents() {
        let dto = CreateProposalDto {
            cover_letter: "I have built many booking apps before".to_string(),
            bid_amount: 1000.0,
            estimated_days: 20,
            milestones: vec![ProposedMilestoneDto {
                title: "Design".to_string(),
                description: None,
                amount: 399.999,
                due_date: None,
            }],
        };
        let milestones = dto.proposed_milestones().unwrap();
        assert_eq!(milestones[0].amount, BigDecimal::from_str("400.00").unwrap());
    }

    #[test]
    fn test_nested_milestones_are_validated() {
        let dto = CreateProposalDto {
            cover_letter: "I have built many booking apps before".to_string(),
            bid_amount: 1000.0,
            estimated_days: 20,
            milestones: vec![ProposedMilestoneDto {
                title: "x".to_string(),
                description: None,
                amount: 1000.0,
                due_date: None,
            }],
        };
        assert!(dto.validate().is_err());
    }
}
