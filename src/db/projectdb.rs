// db/projectdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::{BigDecimal, Json};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::projectmodel::{
    Project, ProjectStatus, Proposal, ProposalStatus, ProposedMilestone,
};

const PROJECT_COLUMNS: &str = r#"
    id, client_id, title, description, category, skills, budget_min, budget_max,
    currency, deadline, status, created_at, updated_at
"#;

const PROPOSAL_COLUMNS: &str = r#"
    id, project_id, freelancer_id, cover_letter, bid_amount, estimated_days,
    milestones, status, created_at, updated_at
"#;

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub skills: Vec<String>,
    pub budget_min: BigDecimal,
    pub budget_max: BigDecimal,
    pub currency: String,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub skills: Option<Vec<String>>,
    pub budget_min: Option<BigDecimal>,
    pub budget_max: Option<BigDecimal>,
    pub deadline: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ProjectExt {
    async fn create_project(&self, project: NewProject) -> Result<Project, sqlx::Error>;

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, sqlx::Error>;

    async fn get_projects(
        &self,
        filter: &ProjectFilter,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Project>, sqlx::Error>;

    async fn count_projects(&self, filter: &ProjectFilter) -> Result<i64, sqlx::Error>;

    async fn get_client_projects(&self, client_id: Uuid) -> Result<Vec<Project>, sqlx::Error>;

    async fn update_project(
        &self,
        project_id: Uuid,
        changes: ProjectChanges,
    ) -> Result<Project, sqlx::Error>;

    async fn update_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<Project, sqlx::Error>;

    async fn create_proposal(
        &self,
        project_id: Uuid,
        freelancer_id: Uuid,
        cover_letter: String,
        bid_amount: BigDecimal,
        estimated_days: i32,
        milestones: Vec<ProposedMilestone>,
    ) -> Result<Proposal, sqlx::Error>;

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<Proposal>, sqlx::Error>;

    async fn get_project_proposals(&self, project_id: Uuid) -> Result<Vec<Proposal>, sqlx::Error>;

    async fn get_freelancer_proposals(
        &self,
        freelancer_id: Uuid,
    ) -> Result<Vec<Proposal>, sqlx::Error>;

    async fn has_pending_proposal(
        &self,
        project_id: Uuid,
        freelancer_id: Uuid,
    ) -> Result<bool, sqlx::Error>;

    /// Moves a pending proposal to `status`. Returns `None` when the proposal
    /// is no longer pending.
    async fn close_pending_proposal(
        &self,
        proposal_id: Uuid,
        status: ProposalStatus,
    ) -> Result<Option<Proposal>, sqlx::Error>;
}

/// Makes user text match literally inside an `ILIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl ProjectExt for DBClient {
    async fn create_project(&self, project: NewProject) -> Result<Project, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            r#"
            INSERT INTO projects
                (client_id, title, description, category, skills, budget_min, budget_max, currency, deadline)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(project.client_id)
        .bind(project.title)
        .bind(project.description)
        .bind(project.category)
        .bind(project.skills)
        .bind(project.budget_min)
        .bind(project.budget_max)
        .bind(project.currency)
        .bind(project.deadline)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {} FROM projects WHERE id = $1",
            PROJECT_COLUMNS
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_projects(
        &self,
        filter: &ProjectFilter,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Project>, sqlx::Error> {
        let offset = (page.max(1) - 1) as i64 * limit as i64;

        sqlx::query_as::<_, Project>(&format!(
            r#"
            SELECT {} FROM projects
            WHERE ($1::project_status IS NULL OR status = $1)
            AND ($2::text IS NULL OR category ILIKE $2 ESCAPE '\')
            AND ($3::text IS NULL OR title ILIKE $3 ESCAPE '\' OR description ILIKE $3 ESCAPE '\')
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            PROJECT_COLUMNS
        ))
        .bind(filter.status)
        .bind(filter.category.as_deref().map(escape_like))
        .bind(filter.search.as_deref().map(|s| format!("%{}%", escape_like(s))))
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn count_projects(&self, filter: &ProjectFilter) -> Result<i64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM projects
            WHERE ($1::project_status IS NULL OR status = $1)
            AND ($2::text IS NULL OR category ILIKE $2 ESCAPE '\')
            AND ($3::text IS NULL OR title ILIKE $3 ESCAPE '\' OR description ILIKE $3 ESCAPE '\')
            "#,
        )
        .bind(filter.status)
        .bind(filter.category.as_deref().map(escape_like))
        .bind(filter.search.as_deref().map(|s| format!("%{}%", escape_like(s))))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_client_projects(&self, client_id: Uuid) -> Result<Vec<Project>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {} FROM projects WHERE client_id = $1 ORDER BY created_at DESC",
            PROJECT_COLUMNS
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn update_project(
        &self,
        project_id: Uuid,
        changes: ProjectChanges,
    ) -> Result<Project, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            r#"
            UPDATE projects SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                category = COALESCE($4, category),
                skills = COALESCE($5, skills),
                budget_min = COALESCE($6, budget_min),
                budget_max = COALESCE($7, budget_max),
                deadline = COALESCE($8, deadline),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(project_id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.category)
        .bind(changes.skills)
        .bind(changes.budget_min)
        .bind(changes.budget_max)
        .bind(changes.deadline)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<Project, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            r#"
            UPDATE projects SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(project_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
    }

    async fn create_proposal(
        &self,
        project_id: Uuid,
        freelancer_id: Uuid,
        cover_letter: String,
        bid_amount: BigDecimal,
        estimated_days: i32,
        milestones: Vec<ProposedMilestone>,
    ) -> Result<Proposal, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(&format!(
            r#"
            INSERT INTO proposals
                (project_id, freelancer_id, cover_letter, bid_amount, estimated_days, milestones)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(project_id)
        .bind(freelancer_id)
        .bind(cover_letter)
        .bind(bid_amount)
        .bind(estimated_days)
        .bind(Json(milestones))
        .fetch_one(&self.pool)
        .await
    }

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(&format!(
            "SELECT {} FROM proposals WHERE id = $1",
            PROPOSAL_COLUMNS
        ))
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_project_proposals(&self, project_id: Uuid) -> Result<Vec<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(&format!(
            "SELECT {} FROM proposals WHERE project_id = $1 ORDER BY created_at ASC",
            PROPOSAL_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_freelancer_proposals(
        &self,
        freelancer_id: Uuid,
    ) -> Result<Vec<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(&format!(
            "SELECT {} FROM proposals WHERE freelancer_id = $1 ORDER BY created_at DESC",
            PROPOSAL_COLUMNS
        ))
        .bind(freelancer_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn has_pending_proposal(
        &self,
        project_id: Uuid,
        freelancer_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM proposals
                WHERE project_id = $1 AND freelancer_id = $2 AND status = 'pending'
            )
            "#,
        )
        .bind(project_id)
        .bind(freelancer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn close_pending_proposal(
        &self,
        proposal_id: Uuid,
        status: ProposalStatus,
    ) -> Result<Option<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(&format!(
            r#"
            UPDATE proposals SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(proposal_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("snake_case"), "snake\\_case");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain words"), "plain words");
    }
}
