use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ethers::contract::{abigen, parse_log, ContractCall, EthLogDecode};
use ethers::core::abi::Detokenize;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use sha2::{Digest, Sha256};

use crate::errors::SettlementError;
use crate::handler::{
    validate_agent_id, validate_agent_registration, validate_claim_id, validate_claim_submission,
    validate_policy_activation, validate_policy_registration, validate_score_update,
};
use crate::models::{
    AgentRegistration, ClaimPayout, ClaimResolution, ClaimSubmission, CollateralHealth,
    CollateralQuery, PolicyActivation, PolicyRegistration, RegisteredEntity, ScoreUpdate,
    SettlementAction, SettlementOutput, TxReceipt,
};

abigen!(
    AgentRegistry,
    r#"[
        {"inputs":[{"name":"metadataURI","type":"string"}],"name":"registerAgent","outputs":[{"name":"","type":"uint256"}],"stateMutability":"nonpayable","type":"function"},
        {"inputs":[{"name":"agentId","type":"uint256"},{"name":"newScore","type":"uint256"},{"name":"totalRuns","type":"uint256"},{"name":"violationCount","type":"uint256"}],"name":"updateScore","outputs":[],"stateMutability":"nonpayable","type":"function"},
        {"anonymous":false,"inputs":[{"indexed":true,"name":"agentId","type":"uint256"},{"indexed":true,"name":"operator","type":"address"}],"name":"AgentRegistered","type":"event"}
    ]"#
);

abigen!(
    PolicyRegistry,
    r#"[
        {"inputs":[{"name":"agentId","type":"uint256"},{"name":"policyHash","type":"bytes32"},{"name":"rulesURI","type":"string"}],"name":"registerPolicy","outputs":[{"name":"","type":"uint256"}],"stateMutability":"nonpayable","type":"function"},
        {"inputs":[{"name":"agentId","type":"uint256"},{"name":"policyId","type":"uint256"}],"name":"activatePolicy","outputs":[],"stateMutability":"nonpayable","type":"function"},
        {"anonymous":false,"inputs":[{"indexed":true,"name":"policyId","type":"uint256"},{"indexed":true,"name":"agentId","type":"uint256"}],"name":"PolicyRegistered","type":"event"}
    ]"#
);

abigen!(
    ClaimManager,
    r#"[
        {"inputs":[{"name":"runId","type":"bytes32"},{"name":"agentId","type":"uint256"},{"name":"reasonCode","type":"string"},{"name":"evidenceHash","type":"bytes32"}],"name":"submitClaim","outputs":[{"name":"","type":"uint256"}],"stateMutability":"nonpayable","type":"function"},
        {"inputs":[{"name":"claimId","type":"uint256"},{"name":"approved","type":"bool"}],"name":"verifyClaim","outputs":[],"stateMutability":"nonpayable","type":"function"},
        {"inputs":[{"name":"claimId","type":"uint256"}],"name":"executePayout","outputs":[],"stateMutability":"nonpayable","type":"function"},
        {"anonymous":false,"inputs":[{"indexed":true,"name":"claimId","type":"uint256"},{"indexed":true,"name":"runId","type":"bytes32"},{"indexed":true,"name":"claimant","type":"address"}],"name":"ClaimSubmitted","type":"event"}
    ]"#
);

abigen!(
    WarrantyPool,
    r#"[
        {"inputs":[{"name":"agentId","type":"uint256"}],"name":"getCollateralHealth","outputs":[{"name":"staked","type":"uint256"},{"name":"reserved","type":"uint256"},{"name":"free","type":"uint256"},{"name":"ratioBps","type":"uint256"}],"stateMutability":"view","type":"function"}
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct ChainConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ContractAddresses {
    pub agent_registry: Option<String>,
    pub policy_registry: Option<String>,
    pub claim_manager: Option<String>,
    pub warranty_pool: Option<String>,
}

/// Signed client for the four warranty contracts. A contract whose address is
/// not configured reports `NotConfigured` instead of sending anything.
#[derive(Clone)]
pub struct ChainSettlement {
    client: Arc<SignerClient>,
    addresses: ContractAddresses,
}

impl fmt::Debug for ChainSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSettlement")
            .field("signer", &self.client.address())
            .field("addresses", &self.addresses)
            .finish()
    }
}

impl ChainSettlement {
    pub fn connect(cfg: ChainConfig, addresses: ContractAddresses) -> Result<Self, SettlementError> {
        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| SettlementError::Onchain(format!("provider init failed: {e}")))?;

        let wallet: LocalWallet = cfg
            .private_key
            .parse::<LocalWallet>()
            .map_err(|e| SettlementError::Onchain(format!("invalid private key: {e}")))?
            .with_chain_id(cfg.chain_id);

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            addresses,
        })
    }

    pub async fn register_agent(&self, req: &AgentRegistration) -> Result<RegisteredEntity, SettlementError> {
        validate_agent_registration(req)?;
        let address = contract_address("agent_registry", &self.addresses.agent_registry)?;
        let contract = AgentRegistry::new(address, self.client.clone());

        let receipt = confirm(contract.register_agent(req.metadata_uri.clone()), "registerAgent").await?;
        let event: AgentRegisteredFilter = first_event(&receipt, "AgentRegistered")?;
        Ok(RegisteredEntity {
            onchain_id: to_u64(event.agent_id, "agentId")?,
            tx_hash: format!("{:#x}", receipt.transaction_hash),
        })
    }

    pub async fn register_policy(&self, req: &PolicyRegistration) -> Result<RegisteredEntity, SettlementError> {
        validate_policy_registration(req)?;
        let address = contract_address("policy_registry", &self.addresses.policy_registry)?;
        let contract = PolicyRegistry::new(address, self.client.clone());

        let call = contract.register_policy(
            U256::from(req.chain_agent_id),
            to_h256(&req.policy_hash).to_fixed_bytes(),
            req.rules_uri.clone(),
        );
        let receipt = confirm(call, "registerPolicy").await?;
        let event: PolicyRegisteredFilter = first_event(&receipt, "PolicyRegistered")?;
        Ok(RegisteredEntity {
            onchain_id: to_u64(event.policy_id, "policyId")?,
            tx_hash: format!("{:#x}", receipt.transaction_hash),
        })
    }

    pub async fn activate_policy(&self, req: &PolicyActivation) -> Result<TxReceipt, SettlementError> {
        validate_policy_activation(req)?;
        let address = contract_address("policy_registry", &self.addresses.policy_registry)?;
        let contract = PolicyRegistry::new(address, self.client.clone());

        let call = contract.activate_policy(U256::from(req.chain_agent_id), U256::from(req.chain_policy_id));
        let receipt = confirm(call, "activatePolicy").await?;
        Ok(tx_receipt(&receipt))
    }

    pub async fn submit_claim(&self, req: &ClaimSubmission) -> Result<RegisteredEntity, SettlementError> {
        validate_claim_submission(req)?;
        let address = contract_address("claim_manager", &self.addresses.claim_manager)?;
        let contract = ClaimManager::new(address, self.client.clone());

        let call = contract.submit_claim(
            to_h256(&req.run_id).to_fixed_bytes(),
            U256::from(req.chain_agent_id),
            req.reason_code.clone(),
            to_h256(&req.evidence_hash).to_fixed_bytes(),
        );
        let receipt = confirm(call, "submitClaim").await?;
        let event: ClaimSubmittedFilter = first_event(&receipt, "ClaimSubmitted")?;
        Ok(RegisteredEntity {
            onchain_id: to_u64(event.claim_id, "claimId")?,
            tx_hash: format!("{:#x}", receipt.transaction_hash),
        })
    }

    pub async fn resolve_claim(&self, req: &ClaimResolution) -> Result<TxReceipt, SettlementError> {
        validate_claim_id(req.chain_claim_id)?;
        let address = contract_address("claim_manager", &self.addresses.claim_manager)?;
        let contract = ClaimManager::new(address, self.client.clone());

        let call = contract.verify_claim(U256::from(req.chain_claim_id), req.approved);
        let receipt = confirm(call, "verifyClaim").await?;
        Ok(tx_receipt(&receipt))
    }

    pub async fn execute_payout(&self, req: &ClaimPayout) -> Result<TxReceipt, SettlementError> {
        validate_claim_id(req.chain_claim_id)?;
        let address = contract_address("claim_manager", &self.addresses.claim_manager)?;
        let contract = ClaimManager::new(address, self.client.clone());

        let receipt = confirm(contract.execute_payout(U256::from(req.chain_claim_id)), "executePayout").await?;
        Ok(tx_receipt(&receipt))
    }

    pub async fn update_score(&self, req: &ScoreUpdate) -> Result<TxReceipt, SettlementError> {
        validate_score_update(req)?;
        let address = contract_address("agent_registry", &self.addresses.agent_registry)?;
        let contract = AgentRegistry::new(address, self.client.clone());

        let call = contract.update_score(
            U256::from(req.chain_agent_id),
            U256::from(req.score),
            U256::from(req.total_runs),
            U256::from(req.violations),
        );
        let receipt = confirm(call, "updateScore").await?;
        Ok(tx_receipt(&receipt))
    }

    pub async fn collateral_health(&self, req: &CollateralQuery) -> Result<CollateralHealth, SettlementError> {
        validate_agent_id(req.chain_agent_id)?;
        let address = contract_address("warranty_pool", &self.addresses.warranty_pool)?;
        let contract = WarrantyPool::new(address, self.client.clone());

        let (staked, reserved, free, ratio_bps) = contract
            .get_collateral_health(U256::from(req.chain_agent_id))
            .call()
            .await
            .map_err(|e| SettlementError::Onchain(format!("getCollateralHealth call failed: {e}")))?;

        Ok(CollateralHealth {
            staked: staked.to_string(),
            reserved: reserved.to_string(),
            free: free.to_string(),
            ratio_bps: to_u64(ratio_bps, "ratioBps")?,
        })
    }

    pub async fn dispatch(&self, action: &SettlementAction) -> Result<SettlementOutput, SettlementError> {
        let out = match action {
            SettlementAction::RegisterAgent(req) => SettlementOutput::Registered(self.register_agent(req).await?),
            SettlementAction::RegisterPolicy(req) => {
                SettlementOutput::Registered(self.register_policy(req).await?)
            }
            SettlementAction::ActivatePolicy(req) => SettlementOutput::Tx(self.activate_policy(req).await?),
            SettlementAction::SubmitClaim(req) => SettlementOutput::Registered(self.submit_claim(req).await?),
            SettlementAction::ResolveClaim(req) => SettlementOutput::Tx(self.resolve_claim(req).await?),
            SettlementAction::ExecutePayout(req) => SettlementOutput::Tx(self.execute_payout(req).await?),
            SettlementAction::UpdateScore(req) => SettlementOutput::Tx(self.update_score(req).await?),
            SettlementAction::CollateralHealth(req) => {
                SettlementOutput::Collateral(self.collateral_health(req).await?)
            }
        };
        Ok(out)
    }
}

async fn confirm<D: Detokenize>(
    call: ContractCall<SignerClient, D>,
    method: &str,
) -> Result<TransactionReceipt, SettlementError> {
    let pending = call
        .send()
        .await
        .map_err(|e| SettlementError::Onchain(format!("{method} call failed: {e}")))?;

    let tx_hash = pending.tx_hash();
    let receipt = pending
        .await
        .map_err(|e| SettlementError::Onchain(format!("tx confirmation failed: {e}")))?
        .ok_or_else(|| SettlementError::Onchain("missing transaction receipt".to_string()))?;

    if receipt.status != Some(U64::from(1u64)) {
        return Err(SettlementError::Onchain(format!(
            "{method} reverted onchain: tx={tx_hash:#x}"
        )));
    }
    Ok(receipt)
}

fn first_event<E: EthLogDecode>(receipt: &TransactionReceipt, name: &str) -> Result<E, SettlementError> {
    receipt
        .logs
        .iter()
        .find_map(|log| parse_log::<E>(log.clone()).ok())
        .ok_or_else(|| {
            SettlementError::Onchain(format!(
                "{name} event missing from tx={:#x}",
                receipt.transaction_hash
            ))
        })
}

fn tx_receipt(receipt: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        tx_hash: format!("{:#x}", receipt.transaction_hash),
    }
}

fn contract_address(name: &str, configured: &Option<String>) -> Result<Address, SettlementError> {
    let raw = configured
        .as_deref()
        .ok_or_else(|| SettlementError::NotConfigured(format!("{name} address is not set")))?;
    Address::from_str(raw).map_err(|e| SettlementError::Onchain(format!("invalid {name} address: {e}")))
}

fn to_u64(value: U256, field: &str) -> Result<u64, SettlementError> {
    u64::try_from(value).map_err(|_| SettlementError::Onchain(format!("{field} does not fit in u64: {value}")))
}

/// Values that are not already 32-byte hex (uuid run ids, free text) are
/// folded through SHA-256.
fn to_h256(input: &str) -> H256 {
    if let Ok(parsed) = H256::from_str(input) {
        return parsed;
    }

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    H256::from_slice(&hasher.finalize())
}
