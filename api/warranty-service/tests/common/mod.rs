#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Request, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;
use warranty_service::app::{build_router, AppState};
use warranty_service::config::environment::AppConfig;
use warranty_service::module::warranty::schema::{
    ExecuteRunResponse, RegisterAgentResponse, RegisterPolicyResponse,
};
use warranty_service::service::executor_service::{
    ExecutionBackend, ExecutionOutcome, ExecutionRequest, ExecutorError, MockExecutor, ProofCheck,
};
use warranty_service::service::notification_service::{EventNotifier, WarrantyEvent, WebhookDelivery};
use warranty_service::service::settlement_service::SettlementLayer;
use warranty_settlement::errors::SettlementError;
use warranty_settlement::handler::SimulatedSettlement;
use warranty_settlement::models::{
    AgentRegistration, ClaimPayout, ClaimResolution, ClaimSubmission, CollateralHealth,
    CollateralQuery, PolicyActivation, PolicyRegistration, RegisteredEntity, ScoreUpdate,
    TxReceipt,
};

pub const OPERATOR_WALLET: &str = "0x1111111111111111111111111111111111111111";
pub const OTHER_WALLET: &str = "0x2222222222222222222222222222222222222222";
pub const CLAIMANT_WALLET: &str = "0x3333333333333333333333333333333333333333";

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<WebhookDelivery>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<WarrantyEvent> {
        self.deliveries
            .lock()
            .expect("notifier lock")
            .iter()
            .map(|d| d.payload.event)
            .collect()
    }

    pub fn deliveries(&self) -> Vec<WebhookDelivery> {
        self.deliveries.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn deliver(&self, delivery: WebhookDelivery) -> Result<(), String> {
        self.deliveries.lock().expect("notifier lock").push(delivery);
        Ok(())
    }
}

/// Executor that is down: every call fails.
#[derive(Debug, Default)]
pub struct UnavailableExecutor;

#[async_trait]
impl ExecutionBackend for UnavailableExecutor {
    async fn execute(&self, _req: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        Err(ExecutorError::Unavailable("connection refused".to_string()))
    }

    async fn verify_proof(&self, _run_id: &str, _settlement_ref: Option<&str>) -> Result<ProofCheck, ExecutorError> {
        Err(ExecutorError::Unavailable("connection refused".to_string()))
    }
}

/// Mock executor that reports a fixed executed model and data sources.
#[derive(Debug)]
pub struct ScriptedExecutor {
    pub executed_model: String,
    pub data_source_age_seconds: f64,
}

#[async_trait]
impl ExecutionBackend for ScriptedExecutor {
    async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        let mut outcome = MockExecutor.execute(req).await?;
        outcome.executed_model = Some(self.executed_model.clone());
        let now = chrono::Utc::now().timestamp() as f64;
        outcome.data_sources = serde_json::from_value(json!([
            {"name": "price_feed", "timestamp": now - self.data_source_age_seconds}
        ]))
        .map_err(|e| ExecutorError::InvalidResponse(e.to_string()))?;
        Ok(outcome)
    }

    async fn verify_proof(&self, run_id: &str, settlement_ref: Option<&str>) -> Result<ProofCheck, ExecutorError> {
        MockExecutor.verify_proof(run_id, settlement_ref).await
    }
}

/// Settlement layer that accepts agent registrations and then loses its RPC
/// endpoint: every later call fails with a retryable chain error.
#[derive(Debug, Default)]
pub struct BrokenSettlement {
    calls: Mutex<Vec<&'static str>>,
}

impl BrokenSettlement {
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().expect("calls lock").iter().filter(|m| **m == method).count()
    }

    fn fail<T>(&self, method: &'static str) -> Result<T, SettlementError> {
        self.calls.lock().expect("calls lock").push(method);
        Err(SettlementError::Onchain("rpc unavailable".to_string()))
    }
}

#[async_trait]
impl SettlementLayer for BrokenSettlement {
    async fn register_agent(&self, _req: &AgentRegistration) -> Result<RegisteredEntity, SettlementError> {
        self.calls.lock().expect("calls lock").push("registerAgent");
        Ok(RegisteredEntity {
            onchain_id: 1,
            tx_hash: format!("0x{}", "ab".repeat(32)),
        })
    }

    async fn register_policy(&self, _req: &PolicyRegistration) -> Result<RegisteredEntity, SettlementError> {
        self.fail("registerPolicy")
    }

    async fn activate_policy(&self, _req: &PolicyActivation) -> Result<TxReceipt, SettlementError> {
        self.fail("activatePolicy")
    }

    async fn submit_claim(&self, _req: &ClaimSubmission) -> Result<RegisteredEntity, SettlementError> {
        self.fail("submitClaim")
    }

    async fn resolve_claim(&self, _req: &ClaimResolution) -> Result<TxReceipt, SettlementError> {
        self.fail("resolveClaim")
    }

    async fn execute_payout(&self, _req: &ClaimPayout) -> Result<TxReceipt, SettlementError> {
        self.fail("executePayout")
    }

    async fn update_score(&self, _req: &ScoreUpdate) -> Result<TxReceipt, SettlementError> {
        self.fail("updateScore")
    }

    async fn collateral_health(&self, _req: &CollateralQuery) -> Result<CollateralHealth, SettlementError> {
        self.fail("collateralHealth")
    }
}

pub struct TestContext {
    pub app: Router,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::local("test");
    config.settlement_max_attempts = 2;
    config.settlement_backoff_base_ms = 1;
    config.settlement_timeout_seconds = 2;
    config.executor_timeout_seconds = 2;
    config
}

pub fn build_test_context() -> TestContext {
    build_with(Arc::new(MockExecutor), None)
}

pub fn build_settled_context() -> TestContext {
    build_with(Arc::new(MockExecutor), Some(Arc::new(SimulatedSettlement::new())))
}

pub fn build_with(
    executor: Arc<dyn ExecutionBackend>,
    settlement: Option<Arc<dyn SettlementLayer>>,
) -> TestContext {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::with_collaborators(test_config(), None, executor, settlement, notifier.clone());
    TestContext {
        app: build_router(state.clone()),
        state,
        notifier,
    }
}

pub async fn send<T: DeserializeOwned>(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    api_key: Option<&str>,
) -> (StatusCode, T) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let parsed = serde_json::from_slice::<T>(&bytes).expect("json body");
    (status, parsed)
}

pub async fn get<T: DeserializeOwned>(app: &Router, uri: &str) -> (StatusCode, T) {
    send(app, "GET", uri, None, None).await
}

pub async fn post<T: DeserializeOwned>(app: &Router, uri: &str, body: Value) -> (StatusCode, T) {
    send(app, "POST", uri, Some(body), None).await
}

pub async fn post_with_key<T: DeserializeOwned>(
    app: &Router,
    uri: &str,
    body: Value,
    api_key: &str,
) -> (StatusCode, T) {
    send(app, "POST", uri, Some(body), Some(api_key)).await
}

/// Registers an agent and returns `(agent_id, api_key)`. The key is only
/// issued for a wallet's first agent.
pub async fn register_agent(app: &Router, wallet: &str) -> (u64, Option<String>) {
    let (status, resp): (_, RegisterAgentResponse) = post(
        app,
        "/api/agents",
        json!({"wallet_address": wallet, "metadata_uri": "ipfs://agent-card"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", resp.reason);
    let agent = resp.agent.expect("agent");
    (agent.agent_id, resp.api_key)
}

pub async fn register_policy(app: &Router, agent_id: u64, api_key: &str, rules: Value) -> u64 {
    let (status, resp): (_, RegisterPolicyResponse) = post_with_key(
        app,
        "/api/policies",
        json!({"agent_id": agent_id, "rules": rules}),
        api_key,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", resp.reason);
    resp.policy.expect("policy").policy_id
}

pub async fn execute_run(app: &Router, agent_id: u64, simulate_tools: Value) -> ExecuteRunResponse {
    let (status, resp): (_, ExecuteRunResponse) = post(
        app,
        "/api/runs",
        json!({
            "agent_id": agent_id,
            "user_input": "check the ETH price",
            "simulate_tools": simulate_tools
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", resp.reason);
    resp
}

/// An agent with the policy from the send_funds scenario, plus one clean and
/// one violating run. Returns `(agent_id, api_key, clean_run_id, bad_run_id)`.
pub async fn seed_agent_with_runs(app: &Router) -> (u64, String, String, String) {
    let (agent_id, api_key) = register_agent(app, OPERATOR_WALLET).await;
    let api_key = api_key.expect("first agent issues a key");
    register_policy(
        app,
        agent_id,
        &api_key,
        json!({
            "allowed_tools": ["get_price"],
            "max_value_per_action": 100,
            "prohibited_targets": ["0xdead"]
        }),
    )
    .await;

    let clean = execute_run(app, agent_id, json!([{"tool": "get_price", "args": {}}])).await;
    let bad = execute_run(
        app,
        agent_id,
        json!([{"tool": "send_funds", "args": {"value": 9999, "target": "0xdead"}}]),
    )
    .await;
    (
        agent_id,
        api_key,
        clean.run.expect("clean run").run_id,
        bad.run.expect("bad run").run_id,
    )
}

/// Polls `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
