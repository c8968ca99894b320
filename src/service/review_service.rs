// service/review_service.rs
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{
        cache::{user_profile_key, user_reviews_key, CacheHelper, USER_REVIEWS_TTL},
        contractdb::ContractExt,
        reviewdb::ReviewExt,
        DBClient,
    },
    models::{
        contractmodel::{Contract, ContractStatus},
        reviewmodel::{Review, ReviewWithReviewer},
        usermodel::RatingSummary,
    },
    service::{error::ServiceError, notification_service::NotificationService},
};

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

/// Who the reviewer is rating on this contract.
pub fn reviewee_for(contract: &Contract, reviewer_id: Uuid, rating: i32) -> Result<Uuid, ServiceError> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(ServiceError::Validation(format!(
            "Rating must be between {} and {}",
            MIN_RATING, MAX_RATING
        )));
    }

    let reviewee = contract
        .counterparty(reviewer_id)
        .ok_or(ServiceError::NotContractParty(reviewer_id, contract.id))?;

    if contract.status != ContractStatus::Completed {
        return Err(ServiceError::Conflict(
            "Reviews can only be left on completed contracts".to_string(),
        ));
    }
    Ok(reviewee)
}

#[derive(Debug, Serialize)]
pub struct SubmittedReview {
    pub review: Review,
    pub reviewee_rating: RatingSummary,
}

#[derive(Debug, Clone)]
pub struct ReviewService {
    db_client: Arc<DBClient>,
    notifications: Arc<NotificationService>,
}

impl ReviewService {
    pub fn new(db_client: Arc<DBClient>, notifications: Arc<NotificationService>) -> Self {
        Self {
            db_client,
            notifications,
        }
    }

    pub async fn submit_review(
        &self,
        contract_id: Uuid,
        reviewer_id: Uuid,
        rating: i32,
        comment: String,
    ) -> Result<SubmittedReview, ServiceError> {
        let contract = self
            .db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        let reviewee_id = reviewee_for(&contract, reviewer_id, rating)?;

        if self.db_client.has_reviewed(contract_id, reviewer_id).await? {
            return Err(ServiceError::Conflict(
                "You have already reviewed this contract".to_string(),
            ));
        }

        let (review, summary) = self
            .db_client
            .create_review(contract_id, reviewer_id, reviewee_id, rating, comment)
            .await
            .map_err(|e| {
                let duplicate = matches!(
                    &e,
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation()
                );
                if duplicate {
                    ServiceError::Conflict("You have already reviewed this contract".to_string())
                } else {
                    ServiceError::Database(e)
                }
            })?;

        CacheHelper::invalidate(
            self.db_client.redis_client.as_ref(),
            &[user_profile_key(reviewee_id), user_reviews_key(reviewee_id)],
        )
        .await;

        tracing::info!(
            "Review {} left for {} on contract {}; rating now {} over {}",
            review.id,
            reviewee_id,
            contract_id,
            summary.average,
            summary.count
        );
        self.notifications
            .notify_review_received(reviewee_id, &contract, rating)
            .await;

        Ok(SubmittedReview {
            review,
            reviewee_rating: summary,
        })
    }

    pub async fn user_reviews(&self, user_id: Uuid) -> Result<Vec<ReviewWithReviewer>, ServiceError> {
        let redis = self.db_client.redis_client.as_ref();
        let key = user_reviews_key(user_id);

        if let Some(cached) = CacheHelper::get_optional::<Vec<ReviewWithReviewer>>(redis, &key).await {
            return Ok(cached);
        }

        let reviews = self.db_client.get_user_reviews(user_id).await?;
        CacheHelper::set_optional(redis, &key, &reviews, USER_REVIEWS_TTL).await;
        Ok(reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::BigDecimal;

    fn contract(status: ContractStatus) -> Contract {
        let now = Utc::now();
        Contract {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            freelancer_id: Uuid::new_v4(),
            title: "Logo".to_string(),
            total_amount: BigDecimal::from(300),
            currency: "usd".to_string(),
            status,
            signed_by_client: true,
            signed_by_freelancer: true,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reviewee_is_the_other_party() {
        let contract = contract(ContractStatus::Completed);
        assert_eq!(
            reviewee_for(&contract, contract.client_id, 5).unwrap(),
            contract.freelancer_id
        );
        assert_eq!(
            reviewee_for(&contract, contract.freelancer_id, 4).unwrap(),
            contract.client_id
        );
    }

    #[test]
    fn test_rating_range() {
        let contract = contract(ContractStatus::Completed);
        for rating in [0, 6, -1] {
            assert!(matches!(
                reviewee_for(&contract, contract.client_id, rating),
                Err(ServiceError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_only_completed_contracts_and_parties() {
        let active = contract(ContractStatus::Active);
        assert!(matches!(
            reviewee_for(&active, active.client_id, 5),
            Err(ServiceError::Conflict(_))
        ));

        let completed = contract(ContractStatus::Completed);
        assert!(matches!(
            reviewee_for(&completed, Uuid::new_v4(), 5),
            Err(ServiceError::NotContractParty(_, _))
        ));
    }
}
