use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Violation codes, in the order the rule checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    ToolWhitelistViolation,
    ValueLimitExceeded,
    ProhibitedTarget,
    FrequencyExceeded,
    StaleData,
    ModelMismatch,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 6] = [
        ReasonCode::ToolWhitelistViolation,
        ReasonCode::ValueLimitExceeded,
        ReasonCode::ProhibitedTarget,
        ReasonCode::FrequencyExceeded,
        ReasonCode::StaleData,
        ReasonCode::ModelMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ToolWhitelistViolation => "TOOL_WHITELIST_VIOLATION",
            ReasonCode::ValueLimitExceeded => "VALUE_LIMIT_EXCEEDED",
            ReasonCode::ProhibitedTarget => "PROHIBITED_TARGET",
            ReasonCode::FrequencyExceeded => "FREQUENCY_EXCEEDED",
            ReasonCode::StaleData => "STALE_DATA",
            ReasonCode::ModelMismatch => "MODEL_MISMATCH",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Paused,
    Retired,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Retired => "retired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [AgentStatus::Active, AgentStatus::Paused, AgentStatus::Retired]
            .into_iter()
            .find(|status| status.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Submitted,
    Approved,
    Rejected,
    Paid,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            ClaimStatus::Submitted,
            ClaimStatus::Approved,
            ClaimStatus::Rejected,
            ClaimStatus::Paid,
        ]
        .into_iter()
        .find(|status| status.as_str() == raw)
    }

    /// Claims only move forward: submitted -> approved|rejected, approved -> paid.
    pub fn can_advance_to(&self, next: ClaimStatus) -> bool {
        matches!(
            (self, next),
            (ClaimStatus::Submitted, ClaimStatus::Approved)
                | (ClaimStatus::Submitted, ClaimStatus::Rejected)
                | (ClaimStatus::Approved, ClaimStatus::Paid)
        )
    }
}

/// Rule parameters of a policy. Every field is optional; an unset field
/// disables the matching check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_per_action: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prohibited_targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actions_per_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_data_freshness_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Assistant,
    ToolCall,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self::message(TranscriptRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::message(TranscriptRole::Assistant, content)
    }

    pub fn tool_call(tool: impl Into<String>, args: Map<String, Value>, result: Option<Value>) -> Self {
        Self {
            role: TranscriptRole::ToolCall,
            content: None,
            tool: Some(tool.into()),
            args,
            result,
        }
    }

    fn message(role: TranscriptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool: None,
            args: Map::new(),
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default)]
    pub name: Option<String>,
    /// Unix seconds; a source without a timestamp counts as epoch.
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRecord {
    pub operator_id: u64,
    pub wallet_address: String,
    pub webhook_url: Option<String>,
    pub api_key: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: u64,
    pub operator_id: u64,
    pub metadata_uri: String,
    pub status: AgentStatus,
    pub trust_score: u32,
    pub total_runs: u64,
    pub violations: u64,
    pub chain_agent_id: Option<u64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy_id: u64,
    pub agent_id: u64,
    pub policy_hash: String,
    pub rules: PolicyRules,
    pub status: PolicyStatus,
    pub chain_policy_id: Option<u64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub agent_id: u64,
    pub user_address: Option<String>,
    pub input_hash: String,
    pub output_hash: String,
    pub transcript: Vec<TranscriptEntry>,
    pub settlement_ref: Option<String>,
    pub verdict: RunVerdict,
    pub reason_codes: Vec<ReasonCode>,
    pub evidence_hash: String,
    pub policy_id: Option<u64>,
    pub run_metadata: RunMetadata,
    pub run_history: Vec<RunHistoryEntry>,
    /// The clock value the verdict was computed at; replay reuses it.
    pub evaluated_at: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimTransition {
    pub from: ClaimStatus,
    pub to: ClaimStatus,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: u64,
    pub run_id: String,
    pub agent_id: u64,
    pub claimant_address: String,
    pub reason_code: String,
    pub evidence_hash: String,
    pub status: ClaimStatus,
    pub payout_amount_wei: Option<String>,
    pub verification_hash: Option<String>,
    pub chain_claim_id: Option<u64>,
    pub resolved_at: Option<i64>,
    pub created_at: i64,
    pub transitions: Vec<ClaimTransition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationSnapshotRecord {
    pub snapshot_id: u64,
    pub agent_id: u64,
    pub score: u32,
    pub total_runs: u64,
    pub violations: u64,
    pub snapshot_hash: String,
    pub created_at: i64,
}
