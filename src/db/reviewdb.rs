// db/reviewdb.rs
use async_trait::async_trait;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::{
    reviewmodel::{Review, ReviewWithReviewer},
    usermodel::RatingSummary,
};

#[async_trait]
pub trait ReviewExt {
    /// Inserts the review and recomputes the reviewee's rating in the same
    /// database transaction.
    async fn create_review(
        &self,
        contract_id: Uuid,
        reviewer_id: Uuid,
        reviewee_id: Uuid,
        rating: i32,
        comment: String,
    ) -> Result<(Review, RatingSummary), sqlx::Error>;

    async fn get_user_reviews(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ReviewWithReviewer>, sqlx::Error>;

    async fn has_reviewed(&self, contract_id: Uuid, reviewer_id: Uuid)
        -> Result<bool, sqlx::Error>;
}

#[async_trait]
impl ReviewExt for DBClient {
    async fn create_review(
        &self,
        contract_id: Uuid,
        reviewer_id: Uuid,
        reviewee_id: Uuid,
        rating: i32,
        comment: String,
    ) -> Result<(Review, RatingSummary), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let review = sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (contract_id, reviewer_id, reviewee_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, contract_id, reviewer_id, reviewee_id, rating, comment, created_at
            "#,
        )
        .bind(contract_id)
        .bind(reviewer_id)
        .bind(reviewee_id)
        .bind(rating)
        .bind(comment)
        .fetch_one(&mut *tx)
        .await?;

        // lock the reviewee so concurrent reviews recompute in turn
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(reviewee_id)
            .execute(&mut *tx)
            .await?;

        let ratings: Vec<i32> =
            sqlx::query_scalar("SELECT rating FROM reviews WHERE reviewee_id = $1")
                .bind(reviewee_id)
                .fetch_all(&mut *tx)
                .await?;

        let summary = RatingSummary::from_ratings(&ratings);

        sqlx::query(
            r#"
            UPDATE users SET rating_average = $2, rating_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(reviewee_id)
        .bind(summary.average)
        .bind(summary.count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((review, summary))
    }

    async fn get_user_reviews(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ReviewWithReviewer>, sqlx::Error> {
        sqlx::query_as::<_, ReviewWithReviewer>(
            r#"
            SELECT r.id, r.contract_id, r.reviewer_id, r.reviewee_id, r.rating, r.comment,
                   r.created_at, u.name AS reviewer_name
            FROM reviews r
            JOIN users u ON u.id = r.reviewer_id
            WHERE r.reviewee_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn has_reviewed(
        &self,
        contract_id: Uuid,
        reviewer_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM reviews WHERE contract_id = $1 AND reviewer_id = $2)",
        )
        .bind(contract_id)
        .bind(reviewer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
