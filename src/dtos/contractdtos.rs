use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{models::contractmodel::NewMilestone, utils::currency::money_from_f64};

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct SubmitMilestoneDto {
    #[validate(length(max = 5000, message = "Note must not exceed 5000 characters"))]
    pub note: Option<String>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct RejectMilestoneDto {
    #[validate(length(min = 5, max = 5000, message = "Please explain what needs to change"))]
    pub reason: String,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneInputDto {
    #[validate(length(min = 2, max = 150, message = "Milestone title must be between 2-150 characters"))]
    pub title: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    #[validate(range(min = 1.0, message = "Milestone amount must be positive"))]
    pub amount: f64,

    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceMilestonesDto {
    #[validate]
    pub milestones: Vec<MilestoneInputDto>,
}

pub const MAX_MILESTONES: usize = 50;

impl ReplaceMilestonesDto {
    pub fn into_milestones(self) -> Result<Vec<NewMilestone>, String> {
        if self.milestones.is_empty() || self.milestones.len() > MAX_MILESTONES {
            return Err(format!("Between 1 and {} milestones", MAX_MILESTONES));
        }
        self.milestones
            .into_iter()
            .map(|m| {
                Ok(NewMilestone {
                    amount: money_from_f64(m.amount)?,
                    title: m.title,
                    description: m.description,
                    due_date: m.due_date,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_milestones_requires_one() {
        let dto = ReplaceMilestonesDto { milestones: vec![] };
        assert!(dto.into_milestones().is_err());
    }

    #[test]
    fn test_milestone_title_fits_column() {
        let with_title = |len: usize| ReplaceMilestonesDto {
            milestones: vec![MilestoneInputDto {
                title: "w".repeat(len),
                description: None,
                amount: 100.0,
                due_date: None,
            }],
        };
        assert!(with_title(150).validate().is_ok());
        assert!(with_title(151).validate().is_err());
    }

    #[test]
    fn test_into_milestones() {
        let dto = ReplaceMilestonesDto {
            milestones: vec![MilestoneInputDto {
                title: "Wireframes".to_string(),
                description: None,
                amount: 250.5,
                due_date: None,
            }],
        };
        let milestones = dto.into_milestones().unwrap();
        assert_eq!(milestones[0].amount.to_string(), "250.50");
    }
}
