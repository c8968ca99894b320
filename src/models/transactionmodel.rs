use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    HeldInEscrow,
    Released,
    PaidOut,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn to_str(&self) -> &str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::HeldInEscrow => "held_in_escrow",
            TransactionStatus::Released => "released",
            TransactionStatus::PaidOut => "paid_out",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, HeldInEscrow)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, HeldInEscrow)
                | (Processing, Completed)
                | (Processing, Failed)
                | (HeldInEscrow, Released)
                | (HeldInEscrow, Refunded)
                | (Released, PaidOut)
                // transfer failed, funds go back to escrow
                | (Released, HeldInEscrow)
                | (Released, Failed)
                | (Completed, Refunded)
        )
    }

    /// Status a gateway webhook event implies, if the event concerns a payment.
    pub fn from_gateway_event(event_type: &str) -> Option<TransactionStatus> {
        match event_type {
            "payment_intent.processing" => Some(TransactionStatus::Processing),
            "payment_intent.amount_capturable_updated" => Some(TransactionStatus::Processing),
            "payment_intent.succeeded" => Some(TransactionStatus::HeldInEscrow),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                Some(TransactionStatus::Failed)
            }
            "charge.refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub milestone_id: Option<Uuid>,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub platform_fee: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub description: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_transfer_id: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub refunded_amount: Option<BigDecimal>,
    pub escrow_date: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }

    /// True once the funds have sat in escrow for at least `hold_days`.
    pub fn hold_elapsed(&self, hold_days: i64, now: DateTime<Utc>) -> bool {
        match (self.status, self.escrow_date) {
            (TransactionStatus::HeldInEscrow, Some(escrow_date)) => Duration::try_days(hold_days)
                .and_then(|hold| escrow_date.checked_add_signed(hold))
                .map(|due| due <= now)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Values for a new funding transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub contract_id: Uuid,
    pub milestone_id: Option<Uuid>,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub platform_fee: BigDecimal,
    pub currency: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn held(days_ago: i64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            milestone_id: Some(Uuid::new_v4()),
            client_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("100.00").unwrap(),
            platform_fee: BigDecimal::from_str("10.00").unwrap(),
            currency: "usd".to_string(),
            status: TransactionStatus::HeldInEscrow,
            description: "Milestone 1".to_string(),
            gateway_payment_id: Some("pi_123".to_string()),
            gateway_transfer_id: None,
            gateway_refund_id: None,
            refunded_amount: None,
            escrow_date: Some(now - Duration::days(days_ago)),
            released_at: None,
            release_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        use TransactionStatus::*;
        let all = [
            Pending, Processing, Completed, HeldInEscrow, Released, PaidOut, Failed, Refunded,
        ];
        for terminal in [PaidOut, Failed, Refunded] {
            for to in all {
                assert!(!terminal.can_transition_to(to), "{:?} -> {:?}", terminal, to);
            }
        }
    }

    #[test]
    fn test_escrow_path() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(HeldInEscrow));
        assert!(HeldInEscrow.can_transition_to(Released));
        assert!(Released.can_transition_to(PaidOut));
        assert!(!HeldInEscrow.can_transition_to(PaidOut));
        assert!(!Pending.can_transition_to(Released));
    }

    #[test]
    fn test_gateway_event_mapping() {
        assert_eq!(
            TransactionStatus::from_gateway_event("payment_intent.succeeded"),
            Some(TransactionStatus::HeldInEscrow)
        );
        assert_eq!(
            TransactionStatus::from_gateway_event("payment_intent.canceled"),
            Some(TransactionStatus::Failed)
        );
        assert_eq!(
            TransactionStatus::from_gateway_event("charge.refunded"),
            Some(TransactionStatus::Refunded)
        );
        assert_eq!(TransactionStatus::from_gateway_event("customer.created"), None);
    }

    #[test]
    fn test_hold_elapsed() {
        let now = Utc::now();
        assert!(held(8).hold_elapsed(7, now));
        assert!(!held(3).hold_elapsed(7, now));

        assert!(!held(8).hold_elapsed(i64::MAX, now));

        let mut released = held(8);
        released.status = TransactionStatus::Released;
        assert!(!released.hold_elapsed(7, now));
    }
}
