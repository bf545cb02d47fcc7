use crate::app::AppState;
use crate::module::warranty::crud;
use crate::service::evidence_hash_service::hmac_sha256_hex;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "X-Warranty-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarrantyEvent {
    #[serde(rename = "claim.submitted")]
    ClaimSubmitted,
    #[serde(rename = "claim.resolved")]
    ClaimResolved,
    #[serde(rename = "score.changed")]
    ScoreChanged,
}

impl WarrantyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarrantyEvent::ClaimSubmitted => "claim.submitted",
            WarrantyEvent::ClaimResolved => "claim.resolved",
            WarrantyEvent::ScoreChanged => "score.changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: WarrantyEvent,
    pub agent_id: u64,
    pub operator_id: u64,
    pub timestamp: String,
    pub data: Value,
}

/// One event addressed to one operator endpoint. `signing_key` is the
/// operator API key.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub url: String,
    pub signing_key: String,
    pub payload: WebhookPayload,
}

#[async_trait]
pub trait EventNotifier: Send + Sync + Debug {
    async fn deliver(&self, delivery: WebhookDelivery) -> Result<(), String>;
}

/// Posts the payload as JSON with an HMAC-SHA256 signature of the exact body
/// bytes.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout_seconds: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventNotifier for WebhookNotifier {
    async fn deliver(&self, delivery: WebhookDelivery) -> Result<(), String> {
        let body = serde_json::to_string(&delivery.payload)
            .map_err(|e| format!("webhook payload serialization failed: {e}"))?;
        let signature = hmac_sha256_hex(&body, &delivery.signing_key)?;

        let resp = self
            .client
            .post(&delivery.url)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| format!("webhook request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("webhook returned non-success status: {}", resp.status()));
        }
        Ok(())
    }
}

/// Queues an event for the agent's operator when a webhook is configured.
/// Delivery runs detached and failures are only logged.
pub fn notify_operator(state: &AppState, agent_id: u64, event: WarrantyEvent, data: Value) {
    let operator = match crud::operator_for_agent(&state.store, agent_id) {
        Ok(Some(operator)) => operator,
        Ok(None) => return,
        Err(err) => {
            warn!(agent_id, event = event.as_str(), error_code = err.code, "webhook skipped");
            return;
        }
    };
    let Some(url) = operator.webhook_url.clone() else {
        return;
    };

    let delivery = WebhookDelivery {
        url,
        signing_key: operator.api_key,
        payload: WebhookPayload {
            event,
            agent_id,
            operator_id: operator.operator_id,
            timestamp: Utc::now().to_rfc3339(),
            data,
        },
    };
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier.deliver(delivery).await {
            warn!(agent_id, event = event.as_str(), error = %e, "webhook delivery failed");
        }
    });
}
