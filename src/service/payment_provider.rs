// service/payment_provider.rs
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::Config;

/// Webhooks older than this are rejected.
pub const WEBHOOK_TOLERANCE_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway is not configured")]
    NotConfigured,

    #[error("Request to payment gateway failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Payment gateway unavailable (status {0})")]
    Unavailable(u16),

    #[error("Unexpected payment gateway response: {0}")]
    InvalidResponse(String),

    #[error("Could not encode gateway request: {0}")]
    Encoding(#[from] serde_urlencoded::ser::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum WebhookError {
    #[error("Signature header is malformed")]
    MalformedHeader,

    #[error("Webhook timestamp is outside the tolerance window")]
    TimestampOutOfTolerance,

    #[error("Webhook signature does not match")]
    SignatureMismatch,

    #[error("Webhook secret is not configured")]
    MissingSecret,
}

/// An authorised but uncaptured payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentHold {
    pub payment_id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub amount_minor: i64,
}

/// The payment processor as the rest of the service sees it. Amounts are in
/// minor units of `currency`.
#[async_trait]
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    async fn create_hold(
        &self,
        amount_minor: i64,
        currency: &str,
        reference: &str,
    ) -> Result<PaymentHold, GatewayError>;

    async fn capture(&self, payment_id: &str) -> Result<(), GatewayError>;

    /// Pays out to a connected account. Replaying the same idempotency key
    /// returns the original transfer instead of moving money twice.
    async fn transfer(
        &self,
        destination: &str,
        amount_minor: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, GatewayError>;

    /// Refunds a captured payment, fully when `amount_minor` is `None`.
    async fn refund(
        &self,
        payment_id: &str,
        amount_minor: Option<i64>,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    client_secret: Option<String>,
    status: Option<String>,
    amount: Option<i64>,
}

impl StripeGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.stripe_secret_key.clone(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<StripeObject, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }

        let body = serde_urlencoded::to_string(params)?;
        let mut request = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(GatewayError::Unavailable(status.as_u16()));
        }

        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&text)
                .map(|body| {
                    body.error
                        .message
                        .or(body.error.code)
                        .unwrap_or_else(|| status.to_string())
                })
                .unwrap_or_else(|_| status.to_string());
            return Err(GatewayError::Rejected(message));
        }

        serde_json::from_str::<StripeObject>(&text)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_hold(
        &self,
        amount_minor: i64,
        currency: &str,
        reference: &str,
    ) -> Result<PaymentHold, GatewayError> {
        let params = [
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_lowercase()),
            ("capture_method", "manual".to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[reference]", reference.to_string()),
        ];

        let intent = self
            .post_form("/payment_intents", &params, Some(reference))
            .await?;

        Ok(PaymentHold {
            payment_id: intent.id,
            client_secret: intent.client_secret,
            status: intent.status.unwrap_or_default(),
        })
    }

    async fn capture(&self, payment_id: &str) -> Result<(), GatewayError> {
        self.post_form(
            &format!("/payment_intents/{}/capture", payment_id),
            &[],
            Some(&format!("capture-{}", payment_id)),
        )
        .await?;
        Ok(())
    }

    async fn transfer(
        &self,
        destination: &str,
        amount_minor: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, GatewayError> {
        let params = [
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_lowercase()),
            ("destination", destination.to_string()),
            ("transfer_group", idempotency_key.to_string()),
        ];

        let transfer = self
            .post_form("/transfers", &params, Some(idempotency_key))
            .await?;

        Ok(TransferReceipt {
            transfer_id: transfer.id,
        })
    }

    async fn refund(
        &self,
        payment_id: &str,
        amount_minor: Option<i64>,
        idempotency_key: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let mut params = vec![("payment_intent", payment_id.to_string())];
        if let Some(amount) = amount_minor {
            params.push(("amount", amount.to_string()));
        }

        let refund = self
            .post_form("/refunds", &params, Some(idempotency_key))
            .await?;

        Ok(RefundReceipt {
            refund_id: refund.id,
            amount_minor: refund.amount.or(amount_minor).unwrap_or_default(),
        })
    }
}

fn signature_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<String, WebhookError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::MissingSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `t=<unix>,v1=<hex>` signature header against the raw request body.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::MalformedHeader)?;
    if now_unix.abs_diff(sent_at) > WEBHOOK_TOLERANCE_SECS {
        return Err(WebhookError::TimestampOutOfTolerance);
    }

    let expected = signature_for(secret, timestamp, payload)?;
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEventData {
    pub object: serde_json::Value,
}

impl GatewayEvent {
    /// The payment this event concerns. Charge events point at their payment
    /// through `payment_intent`.
    pub fn payment_id(&self) -> Option<&str> {
        if self.event_type.starts_with("charge.") {
            self.data.object["payment_intent"].as_str()
        } else {
            self.data.object["id"].as_str()
        }
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.data.object["last_payment_error"]["message"].as_str()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records calls and fails transfers to chosen destinations.
    #[derive(Debug, Default)]
    pub struct MockGateway {
        pub transfers: Mutex<Vec<(String, i64, String)>>,
        pub refunds: Mutex<Vec<(String, Option<i64>)>>,
        pub captures: Mutex<Vec<String>>,
        failing_destinations: Mutex<HashSet<String>>,
    }

    impl MockGateway {
        pub fn fail_transfers_to(&self, destination: &str) {
            self.failing_destinations
                .lock()
                .unwrap()
                .insert(destination.to_string());
        }

        pub fn transfer_count(&self) -> usize {
            self.transfers.lock().unwrap().len()
        }

        pub fn refund_count(&self) -> usize {
            self.refunds.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_hold(
            &self,
            amount_minor: i64,
            _currency: &str,
            reference: &str,
        ) -> Result<PaymentHold, GatewayError> {
            Ok(PaymentHold {
                payment_id: format!("pi_{}_{}", reference, amount_minor),
                client_secret: Some("secret".to_string()),
                status: "requires_payment_method".to_string(),
            })
        }

        async fn capture(&self, payment_id: &str) -> Result<(), GatewayError> {
            self.captures.lock().unwrap().push(payment_id.to_string());
            Ok(())
        }

        async fn transfer(
            &self,
            destination: &str,
            amount_minor: i64,
            _currency: &str,
            idempotency_key: &str,
        ) -> Result<TransferReceipt, GatewayError> {
            if self.failing_destinations.lock().unwrap().contains(destination) {
                return Err(GatewayError::Rejected("account closed".to_string()));
            }
            self.transfers.lock().unwrap().push((
                destination.to_string(),
                amount_minor,
                idempotency_key.to_string(),
            ));
            Ok(TransferReceipt {
                transfer_id: format!("tr_{}", idempotency_key),
            })
        }

        async fn refund(
            &self,
            payment_id: &str,
            amount_minor: Option<i64>,
            idempotency_key: &str,
        ) -> Result<RefundReceipt, GatewayError> {
            self.refunds
                .lock()
                .unwrap()
                .push((payment_id.to_string(), amount_minor));
            Ok(RefundReceipt {
                refund_id: format!("re_{}", idempotency_key),
                amount_minor: amount_minor.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn header_for(payload: &[u8], timestamp: i64) -> String {
        let signature = signature_for(SECRET, &timestamp.to_string(), payload).unwrap();
        format!("t={},v1={}", timestamp, signature)
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let now = 1_700_000_000;
        let header = header_for(payload, now);
        assert_eq!(verify_webhook_signature(payload, &header, SECRET, now + 10), Ok(()));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let payload = br#"{"amount":100}"#;
        let now = 1_700_000_000;
        let header = header_for(payload, now);
        assert_eq!(
            verify_webhook_signature(br#"{"amount":999}"#, &header, SECRET, now),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_stale_and_malformed_headers() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let header = header_for(payload, now - WEBHOOK_TOLERANCE_SECS as i64 - 1);
        assert_eq!(
            verify_webhook_signature(payload, &header, SECRET, now),
            Err(WebhookError::TimestampOutOfTolerance)
        );
        assert_eq!(
            verify_webhook_signature(payload, "v1=abc", SECRET, now),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verify_webhook_signature(payload, &header_for(payload, now), "", now),
            Err(WebhookError::MissingSecret)
        );
    }

    #[test]
    fn test_extreme_timestamp_is_out_of_tolerance() {
        let payload = b"{}";
        for timestamp in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", timestamp);
            assert_eq!(
                verify_webhook_signature(payload, &header, SECRET, 1_700_000_000),
                Err(WebhookError::TimestampOutOfTolerance)
            );
        }
    }

    #[test]
    fn test_event_payment_id() {
        let intent: GatewayEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_123", "object": "payment_intent" } }
        }))
        .unwrap();
        assert_eq!(intent.payment_id(), Some("pi_123"));

        let charge: GatewayEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1", "payment_intent": "pi_123" } }
        }))
        .unwrap();
        assert_eq!(charge.payment_id(), Some("pi_123"));
    }

    #[tokio::test]
    async fn test_unconfigured_gateway() {
        let gateway = StripeGateway {
            client: reqwest::Client::new(),
            secret_key: String::new(),
            api_base: "http://localhost:1".to_string(),
        };
        let err = gateway.capture("pi_123").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured));
    }
}
