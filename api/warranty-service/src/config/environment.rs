use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    pub log_format: String,
    pub mongodb_url: Option<String>,
    pub mongodb_database: Option<String>,
    pub executor_base_url: Option<String>,
    pub executor_timeout_seconds: u64,
    pub default_model_id: String,
    pub chain_rpc_url: Option<String>,
    pub chain_private_key: Option<String>,
    pub chain_id: u64,
    pub agent_registry_address: Option<String>,
    pub policy_registry_address: Option<String>,
    pub claim_manager_address: Option<String>,
    pub warranty_pool_address: Option<String>,
    pub settlement_simulate: bool,
    pub settlement_max_attempts: u32,
    pub settlement_backoff_base_ms: u64,
    pub settlement_timeout_seconds: u64,
    pub webhook_timeout_seconds: u64,
    pub claim_payout_wei: String,
    pub recency_window_days: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            log_format: read_optional_string("LOG_FORMAT", "text"),
            mongodb_url: env::var("MONGODB_URL").ok(),
            mongodb_database: env::var("MONGODB_DATABASE").ok(),
            executor_base_url: env::var("EXECUTOR_BASE_URL").ok(),
            executor_timeout_seconds: read_optional_u64("EXECUTOR_TIMEOUT_SECONDS", 30)?,
            default_model_id: read_optional_string("DEFAULT_MODEL_ID", "meta-llama/llama-3.1-8b"),
            chain_rpc_url: env::var("CHAIN_RPC_URL").ok(),
            chain_private_key: env::var("CHAIN_PRIVATE_KEY").ok(),
            chain_id: read_optional_u64("CHAIN_ID", 131072)?,
            agent_registry_address: env::var("AGENT_REGISTRY_ADDRESS").ok(),
            policy_registry_address: env::var("POLICY_REGISTRY_ADDRESS").ok(),
            claim_manager_address: env::var("CLAIM_MANAGER_ADDRESS").ok(),
            warranty_pool_address: env::var("WARRANTY_POOL_ADDRESS").ok(),
            settlement_simulate: read_optional_bool("SETTLEMENT_SIMULATE", false),
            settlement_max_attempts: read_optional_u32("SETTLEMENT_MAX_ATTEMPTS", 3)?,
            settlement_backoff_base_ms: read_optional_u64("SETTLEMENT_BACKOFF_BASE_MS", 250)?,
            settlement_timeout_seconds: read_optional_u64("SETTLEMENT_TIMEOUT_SECONDS", 20)?,
            webhook_timeout_seconds: read_optional_u64("WEBHOOK_TIMEOUT_SECONDS", 5)?,
            claim_payout_wei: read_optional_string("CLAIM_PAYOUT_WEI", "10000000000000000"),
            recency_window_days: read_optional_u64("RECENCY_WINDOW_DAYS", 7)?,
        })
    }

    /// Settings for running the service in-process with no external
    /// collaborators: mock executor, no chain, no database.
    pub fn local(rust_env: &str) -> Self {
        Self {
            rust_env: rust_env.to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 0,
            log_format: "text".to_string(),
            mongodb_url: None,
            mongodb_database: None,
            executor_base_url: None,
            executor_timeout_seconds: 30,
            default_model_id: "meta-llama/llama-3.1-8b".to_string(),
            chain_rpc_url: None,
            chain_private_key: None,
            chain_id: 131072,
            agent_registry_address: None,
            policy_registry_address: None,
            claim_manager_address: None,
            warranty_pool_address: None,
            settlement_simulate: false,
            settlement_max_attempts: 3,
            settlement_backoff_base_ms: 250,
            settlement_timeout_seconds: 20,
            webhook_timeout_seconds: 5,
            claim_payout_wei: "10000000000000000".to_string(),
            recency_window_days: 7,
        }
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_u32(key: &str, default: u32) -> Result<u32, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u32>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_dotenv_layers() {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
