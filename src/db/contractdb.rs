// db/contractdb.rs
use async_trait::async_trait;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::{
    contractmodel::{
        Contract, ContractParty, ContractStatus, ContractWithMilestones, Milestone,
        MilestoneStatus, NewMilestone,
    },
    projectmodel::{Project, Proposal},
};

const CONTRACT_COLUMNS: &str = r#"
    id, project_id, proposal_id, client_id, freelancer_id, title, total_amount, currency,
    status, signed_by_client, signed_by_freelancer, started_at, completed_at, created_at, updated_at
"#;

const MILESTONE_COLUMNS: &str = r#"
    id, contract_id, position, title, description, amount, due_date, status,
    submission_note, rejection_reason, submitted_at, approved_at, paid_at, created_at, updated_at
"#;

#[async_trait]
pub trait ContractExt {
    /// Accepts a pending proposal and writes the draft contract in one
    /// database transaction. Returns `None` if the proposal was already closed.
    async fn create_contract_from_proposal(
        &self,
        proposal: &Proposal,
        project: &Project,
        milestones: Vec<NewMilestone>,
    ) -> Result<Option<ContractWithMilestones>, sqlx::Error>;

    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, sqlx::Error>;

    async fn get_contract_with_milestones(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ContractWithMilestones>, sqlx::Error>;

    async fn get_user_contracts(&self, user_id: Uuid) -> Result<Vec<Contract>, sqlx::Error>;

    async fn get_milestones(&self, contract_id: Uuid) -> Result<Vec<Milestone>, sqlx::Error>;

    async fn get_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
    ) -> Result<Option<Milestone>, sqlx::Error>;

    /// Records a signature on a draft contract; the second signature activates it.
    async fn sign_contract(
        &self,
        contract_id: Uuid,
        party: ContractParty,
    ) -> Result<Option<Contract>, sqlx::Error>;

    /// Compare-and-set on the contract status. `None` means the contract was
    /// no longer in `from`.
    async fn update_contract_status(
        &self,
        contract_id: Uuid,
        from: ContractStatus,
        to: ContractStatus,
    ) -> Result<Option<Contract>, sqlx::Error>;

    /// Compare-and-set on the milestone status. `note` is stored as the
    /// submission note or rejection reason depending on `to`.
    async fn update_milestone_status(
        &self,
        milestone_id: Uuid,
        from: MilestoneStatus,
        to: MilestoneStatus,
        note: Option<String>,
    ) -> Result<Option<Milestone>, sqlx::Error>;

    /// Replaces the milestones of an unsigned draft contract and clears both signatures.
    async fn replace_milestones(
        &self,
        contract_id: Uuid,
        milestones: Vec<NewMilestone>,
    ) -> Result<Option<ContractWithMilestones>, sqlx::Error>;

    /// True while any funding transaction for the contract still holds or moves money.
    async fn has_live_funds(&self, contract_id: Uuid) -> Result<bool, sqlx::Error>;
}

async fn insert_milestones(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    contract_id: Uuid,
    milestones: Vec<NewMilestone>,
) -> Result<Vec<Milestone>, sqlx::Error> {
    let mut saved = Vec::with_capacity(milestones.len());
    for (index, milestone) in milestones.into_iter().enumerate() {
        let row = sqlx::query_as::<_, Milestone>(&format!(
            r#"
            INSERT INTO milestones (contract_id, position, title, description, amount, due_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            MILESTONE_COLUMNS
        ))
        .bind(contract_id)
        .bind(index as i32 + 1)
        .bind(milestone.title)
        .bind(milestone.description)
        .bind(milestone.amount)
        .bind(milestone.due_date)
        .fetch_one(&mut **tx)
        .await?;
        saved.push(row);
    }
    Ok(saved)
}

#[async_trait]
impl ContractExt for DBClient {
    async fn create_contract_from_proposal(
        &self,
        proposal: &Proposal,
        project: &Project,
        milestones: Vec<NewMilestone>,
    ) -> Result<Option<ContractWithMilestones>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let accepted = sqlx::query(
            r#"
            UPDATE proposals SET status = 'accepted', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(proposal.id)
        .execute(&mut *tx)
        .await?;

        if accepted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE proposals SET status = 'rejected', updated_at = NOW()
            WHERE project_id = $1 AND id <> $2 AND status = 'pending'
            "#,
        )
        .bind(project.id)
        .bind(proposal.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE projects SET status = 'in_progress', updated_at = NOW() WHERE id = $1",
        )
        .bind(project.id)
        .execute(&mut *tx)
        .await?;

        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            INSERT INTO contracts
                (project_id, proposal_id, client_id, freelancer_id, title, total_amount, currency)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(project.id)
        .bind(proposal.id)
        .bind(project.client_id)
        .bind(proposal.freelancer_id)
        .bind(&project.title)
        .bind(&proposal.bid_amount)
        .bind(&project.currency)
        .fetch_one(&mut *tx)
        .await?;

        let milestones = insert_milestones(&mut tx, contract.id, milestones).await?;

        tx.commit().await?;

        Ok(Some(ContractWithMilestones {
            contract,
            milestones,
        }))
    }

    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, sqlx::Error> {
        sqlx::query_as::<_, Contract>(&format!(
            "SELECT {} FROM contracts WHERE id = $1",
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_contract_with_milestones(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ContractWithMilestones>, sqlx::Error> {
        let contract = match self.get_contract(contract_id).await? {
            Some(contract) => contract,
            None => return Ok(None),
        };
        let milestones = self.get_milestones(contract_id).await?;

        Ok(Some(ContractWithMilestones {
            contract,
            milestones,
        }))
    }

    async fn get_user_contracts(&self, user_id: Uuid) -> Result<Vec<Contract>, sqlx::Error> {
        sqlx::query_as::<_, Contract>(&format!(
            r#"
            SELECT {} FROM contracts
            WHERE client_id = $1 OR freelancer_id = $1
            ORDER BY created_at DESC
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_milestones(&self, contract_id: Uuid) -> Result<Vec<Milestone>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(&format!(
            "SELECT {} FROM milestones WHERE contract_id = $1 ORDER BY position ASC",
            MILESTONE_COLUMNS
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_milestone(
        &self,
        contract_id: Uuid,
        milestone_id: Uuid,
    ) -> Result<Option<Milestone>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(&format!(
            "SELECT {} FROM milestones WHERE id = $1 AND contract_id = $2",
            MILESTONE_COLUMNS
        ))
        .bind(milestone_id)
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn sign_contract(
        &self,
        contract_id: Uuid,
        party: ContractParty,
    ) -> Result<Option<Contract>, sqlx::Error> {
        let (client, freelancer) = match party {
            ContractParty::Client => (true, false),
            ContractParty::Freelancer => (false, true),
        };

        sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts SET
                signed_by_client = signed_by_client OR $2,
                signed_by_freelancer = signed_by_freelancer OR $3,
                status = CASE
                    WHEN (signed_by_client OR $2) AND (signed_by_freelancer OR $3)
                    THEN 'active'::contract_status
                    ELSE status
                END,
                started_at = CASE
                    WHEN (signed_by_client OR $2) AND (signed_by_freelancer OR $3)
                    THEN NOW()
                    ELSE started_at
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .bind(client)
        .bind(freelancer)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_contract_status(
        &self,
        contract_id: Uuid,
        from: ContractStatus,
        to: ContractStatus,
    ) -> Result<Option<Contract>, sqlx::Error> {
        sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts SET
                status = $3,
                completed_at = CASE WHEN $3 = 'completed'::contract_status THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_milestone_status(
        &self,
        milestone_id: Uuid,
        from: MilestoneStatus,
        to: MilestoneStatus,
        note: Option<String>,
    ) -> Result<Option<Milestone>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(&format!(
            r#"
            UPDATE milestones SET
                status = $3,
                submission_note = CASE WHEN $3 = 'submitted'::milestone_status THEN $4::text ELSE submission_note END,
                rejection_reason = CASE WHEN $3 = 'rejected'::milestone_status THEN $4::text ELSE rejection_reason END,
                submitted_at = CASE WHEN $3 = 'submitted'::milestone_status THEN NOW() ELSE submitted_at END,
                approved_at = CASE WHEN $3 = 'approved'::milestone_status THEN NOW() ELSE approved_at END,
                paid_at = CASE WHEN $3 = 'paid'::milestone_status THEN NOW() ELSE paid_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            MILESTONE_COLUMNS
        ))
        .bind(milestone_id)
        .bind(from)
        .bind(to)
        .bind(note)
        .fetch_optional(&self.pool)
        .await
    }

    async fn replace_milestones(
        &self,
        contract_id: Uuid,
        milestones: Vec<NewMilestone>,
    ) -> Result<Option<ContractWithMilestones>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            UPDATE contracts SET
                signed_by_client = FALSE,
                signed_by_freelancer = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            RETURNING {}
            "#,
            CONTRACT_COLUMNS
        ))
        .bind(contract_id)
        .fetch_optional(&mut *tx)
        .await?;

        let contract = match contract {
            Some(contract) => contract,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        sqlx::query("DELETE FROM milestones WHERE contract_id = $1")
            .bind(contract_id)
            .execute(&mut *tx)
            .await?;

        let milestones = insert_milestones(&mut tx, contract_id, milestones).await?;

        tx.commit().await?;

        Ok(Some(ContractWithMilestones {
            contract,
            milestones,
        }))
    }

    async fn has_live_funds(&self, contract_id: Uuid) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE contract_id = $1
                AND status IN ('pending', 'processing', 'held_in_escrow', 'released')
            )
            "#,
        )
        .bind(contract_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
