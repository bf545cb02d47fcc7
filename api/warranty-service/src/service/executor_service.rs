use crate::module::warranty::model::{DataSource, TranscriptEntry};
use crate::service::evidence_hash_service::sha256_hex;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution backend unavailable: {0}")]
    Unavailable(String),

    #[error("execution backend timed out after {0}s")]
    Timeout(u64),

    #[error("invalid execution backend response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub model_id: String,
    pub user_input: String,
    /// Hint only; the policy engine is the enforcement point.
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub simulate_tools: Vec<SimulatedToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub run_id: String,
    pub input_hash: String,
    pub output_hash: String,
    pub transcript: Vec<TranscriptEntry>,
    pub settlement_ref: Option<String>,
    pub executed_model: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofCheck {
    pub valid: bool,
    pub input_hash_match: bool,
    pub output_hash_match: bool,
}

#[derive(Debug, Serialize)]
struct ProofCheckRequest<'a> {
    run_id: &'a str,
    settlement_ref: Option<&'a str>,
}

/// The agent execution backend. Produces transcripts and confirms that a
/// stored run's settlement reference is genuine.
#[async_trait]
pub trait ExecutionBackend: Send + Sync + Debug {
    async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError>;

    async fn verify_proof(&self, run_id: &str, settlement_ref: Option<&str>) -> Result<ProofCheck, ExecutorError>;
}

/// In-process backend that echoes the prompt. Everything except the run id
/// is a pure function of the request.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor;

#[async_trait]
impl ExecutionBackend for MockExecutor {
    async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        Ok(mock_outcome(req, Uuid::new_v4().simple().to_string()))
    }

    async fn verify_proof(&self, _run_id: &str, _settlement_ref: Option<&str>) -> Result<ProofCheck, ExecutorError> {
        Ok(ProofCheck {
            valid: true,
            input_hash_match: true,
            output_hash_match: true,
        })
    }
}

pub fn mock_outcome(req: &ExecutionRequest, run_id: String) -> ExecutionOutcome {
    let output = format!("[mock] Response to: {}", req.user_input);
    let mut transcript = vec![
        TranscriptEntry::user(req.user_input.clone()),
        TranscriptEntry::assistant(output.clone()),
    ];

    if !req.simulate_tools.is_empty() {
        for sim in &req.simulate_tools {
            let result = sim.result.clone().unwrap_or_else(|| json!({"status": "ok"}));
            transcript.push(TranscriptEntry::tool_call(sim.tool.clone(), sim.args.clone(), Some(result)));
        }
    } else if let Some(allowed) = &req.allowed_tools {
        for tool in allowed.iter().take(2) {
            let mut args = Map::new();
            args.insert("mock".to_string(), Value::Bool(true));
            transcript.push(TranscriptEntry::tool_call(tool.clone(), args, Some(json!({"status": "ok"}))));
        }
    }

    ExecutionOutcome {
        run_id,
        input_hash: sha256_hex(&req.user_input),
        output_hash: sha256_hex(&output),
        transcript,
        settlement_ref: Some("external".to_string()),
        executed_model: Some(req.model_id.clone()),
        data_sources: Vec::new(),
    }
}

/// Remote backend speaking JSON over HTTP: `POST {base}/v1/execute` and
/// `POST {base}/v1/verify`.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
    timeout_seconds: u64,
}

impl HttpExecutor {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ExecutorError::Unavailable(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_seconds,
        })
    }

    async fn post<TReq: Serialize + Sync, TResp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, ExecutorError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout(self.timeout_seconds)
                } else {
                    ExecutorError::Unavailable(format!("request to {path} failed: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(ExecutorError::Unavailable(format!(
                "{path} returned non-success status: {}",
                resp.status()
            )));
        }

        resp.json::<TResp>()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(format!("failed to parse {path} payload: {e}")))
    }
}

#[async_trait]
impl ExecutionBackend for HttpExecutor {
    async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        let outcome: ExecutionOutcome = self.post("/v1/execute", req).await?;
        if outcome.run_id.trim().is_empty() {
            return Err(ExecutorError::InvalidResponse("run_id is empty".to_string()));
        }
        Ok(outcome)
    }

    async fn verify_proof(&self, run_id: &str, settlement_ref: Option<&str>) -> Result<ProofCheck, ExecutorError> {
        self.post("/v1/verify", &ProofCheckRequest { run_id, settlement_ref })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::warranty::model::TranscriptRole;

    fn request(simulate_tools: Vec<SimulatedToolCall>) -> ExecutionRequest {
        ExecutionRequest {
            model_id: "meta-llama/llama-3.1-8b".to_string(),
            user_input: "price of ETH?".to_string(),
            allowed_tools: Some(vec![
                "get_price".to_string(),
                "get_balance".to_string(),
                "swap".to_string(),
            ]),
            simulate_tools,
        }
    }

    #[test]
    fn mock_uses_first_two_allowed_tools_without_simulation() {
        let outcome = mock_outcome(&request(Vec::new()), "r1".to_string());
        let tools = outcome
            .transcript
            .iter()
            .filter(|e| e.role == TranscriptRole::ToolCall)
            .filter_map(|e| e.tool.clone())
            .collect::<Vec<_>>();
        assert_eq!(tools, vec!["get_price", "get_balance"]);
        assert_eq!(outcome.transcript[1].content.as_deref(), Some("[mock] Response to: price of ETH?"));
        assert_eq!(outcome.input_hash, sha256_hex("price of ETH?"));
        assert_eq!(outcome.settlement_ref.as_deref(), Some("external"));
    }

    #[test]
    fn mock_appends_simulated_calls_with_default_result() {
        let mut args = Map::new();
        args.insert("value".to_string(), json!(9999));
        let outcome = mock_outcome(
            &request(vec![SimulatedToolCall {
                tool: "send_funds".to_string(),
                args,
                result: None,
            }]),
            "r2".to_string(),
        );
        assert_eq!(outcome.transcript.len(), 3);
        let call = &outcome.transcript[2];
        assert_eq!(call.tool.as_deref(), Some("send_funds"));
        assert_eq!(call.args.get("value"), Some(&json!(9999)));
        assert_eq!(call.result, Some(json!({"status": "ok"})));
    }
}
