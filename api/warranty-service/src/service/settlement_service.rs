use crate::config::environment::AppConfig;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use warranty_settlement::chain::{ChainConfig, ChainSettlement, ContractAddresses};
use warranty_settlement::errors::SettlementError;
use warranty_settlement::handler::SimulatedSettlement;
use warranty_settlement::models::{
    AgentRegistration, ClaimPayout, ClaimResolution, ClaimSubmission, CollateralHealth,
    CollateralQuery, PolicyActivation, PolicyRegistration, RegisteredEntity, ScoreUpdate,
    TxReceipt,
};

/// Optional notarization layer. Callers treat every method as best-effort:
/// core state is committed before any of these run.
#[async_trait]
pub trait SettlementLayer: Send + Sync + Debug {
    async fn register_agent(&self, req: &AgentRegistration) -> Result<RegisteredEntity, SettlementError>;
    async fn register_policy(&self, req: &PolicyRegistration) -> Result<RegisteredEntity, SettlementError>;
    async fn activate_policy(&self, req: &PolicyActivation) -> Result<TxReceipt, SettlementError>;
    async fn submit_claim(&self, req: &ClaimSubmission) -> Result<RegisteredEntity, SettlementError>;
    async fn resolve_claim(&self, req: &ClaimResolution) -> Result<TxReceipt, SettlementError>;
    async fn execute_payout(&self, req: &ClaimPayout) -> Result<TxReceipt, SettlementError>;
    async fn update_score(&self, req: &ScoreUpdate) -> Result<TxReceipt, SettlementError>;
    async fn collateral_health(&self, req: &CollateralQuery) -> Result<CollateralHealth, SettlementError>;
}

#[async_trait]
impl SettlementLayer for ChainSettlement {
    async fn register_agent(&self, req: &AgentRegistration) -> Result<RegisteredEntity, SettlementError> {
        ChainSettlement::register_agent(self, req).await
    }

    async fn register_policy(&self, req: &PolicyRegistration) -> Result<RegisteredEntity, SettlementError> {
        ChainSettlement::register_policy(self, req).await
    }

    async fn activate_policy(&self, req: &PolicyActivation) -> Result<TxReceipt, SettlementError> {
        ChainSettlement::activate_policy(self, req).await
    }

    async fn submit_claim(&self, req: &ClaimSubmission) -> Result<RegisteredEntity, SettlementError> {
        ChainSettlement::submit_claim(self, req).await
    }

    async fn resolve_claim(&self, req: &ClaimResolution) -> Result<TxReceipt, SettlementError> {
        ChainSettlement::resolve_claim(self, req).await
    }

    async fn execute_payout(&self, req: &ClaimPayout) -> Result<TxReceipt, SettlementError> {
        ChainSettlement::execute_payout(self, req).await
    }

    async fn update_score(&self, req: &ScoreUpdate) -> Result<TxReceipt, SettlementError> {
        ChainSettlement::update_score(self, req).await
    }

    async fn collateral_health(&self, req: &CollateralQuery) -> Result<CollateralHealth, SettlementError> {
        ChainSettlement::collateral_health(self, req).await
    }
}

#[async_trait]
impl SettlementLayer for SimulatedSettlement {
    async fn register_agent(&self, req: &AgentRegistration) -> Result<RegisteredEntity, SettlementError> {
        SimulatedSettlement::register_agent(self, req)
    }

    async fn register_policy(&self, req: &PolicyRegistration) -> Result<RegisteredEntity, SettlementError> {
        SimulatedSettlement::register_policy(self, req)
    }

    async fn activate_policy(&self, req: &PolicyActivation) -> Result<TxReceipt, SettlementError> {
        SimulatedSettlement::activate_policy(self, req)
    }

    async fn submit_claim(&self, req: &ClaimSubmission) -> Result<RegisteredEntity, SettlementError> {
        SimulatedSettlement::submit_claim(self, req)
    }

    async fn resolve_claim(&self, req: &ClaimResolution) -> Result<TxReceipt, SettlementError> {
        SimulatedSettlement::resolve_claim(self, req)
    }

    async fn execute_payout(&self, req: &ClaimPayout) -> Result<TxReceipt, SettlementError> {
        SimulatedSettlement::execute_payout(self, req)
    }

    async fn update_score(&self, req: &ScoreUpdate) -> Result<TxReceipt, SettlementError> {
        SimulatedSettlement::update_score(self, req)
    }

    async fn collateral_health(&self, req: &CollateralQuery) -> Result<CollateralHealth, SettlementError> {
        SimulatedSettlement::collateral_health(self, req)
    }
}

/// Picks the settlement layer from configuration: the chain client when RPC
/// and key are both set, the offline simulation when requested, otherwise
/// none.
pub fn settlement_from_config(config: &AppConfig) -> Result<Option<std::sync::Arc<dyn SettlementLayer>>, String> {
    match (&config.chain_rpc_url, &config.chain_private_key) {
        (Some(rpc_url), Some(private_key)) => {
            let client = ChainSettlement::connect(
                ChainConfig {
                    rpc_url: rpc_url.clone(),
                    private_key: private_key.clone(),
                    chain_id: config.chain_id,
                },
                ContractAddresses {
                    agent_registry: config.agent_registry_address.clone(),
                    policy_registry: config.policy_registry_address.clone(),
                    claim_manager: config.claim_manager_address.clone(),
                    warranty_pool: config.warranty_pool_address.clone(),
                },
            )
            .map_err(|e| format!("settlement client init failed: {e}"))?;
            info!(chain_id = config.chain_id, "settlement layer: chain");
            Ok(Some(std::sync::Arc::new(client)))
        }
        (None, None) if config.settlement_simulate => {
            info!("settlement layer: offline simulation");
            Ok(Some(std::sync::Arc::new(SimulatedSettlement::new())))
        }
        (None, None) => Ok(None),
        _ => Err("set both CHAIN_RPC_URL and CHAIN_PRIVATE_KEY, or neither".to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.settlement_max_attempts.max(1),
            backoff_base: Duration::from_millis(config.settlement_backoff_base_ms),
            attempt_timeout: Duration::from_secs(config.settlement_timeout_seconds),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Runs one settlement call with a per-attempt timeout and exponential
/// backoff between retryable failures. The caller always gets a typed result
/// and decides what a failure means for it.
pub async fn with_retry<T, F, Fut>(action: &'static str, policy: RetryPolicy, mut call: F) -> Result<T, SettlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match timeout(policy.attempt_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(SettlementError::Timeout(policy.attempt_timeout.as_secs())),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(action, attempt, error = %err, delay_ms = delay.as_millis() as u64, "settlement call failed; retrying");
                sleep(delay).await;
            }
            Err(err) => {
                warn!(action, attempt, error = %err, "settlement call failed; giving up");
                return Err(err);
            }
        }
    }
}
