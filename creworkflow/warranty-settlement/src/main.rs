use std::io::{self, Read};

use tokio::runtime::Runtime;
use warranty_settlement::chain::{ChainConfig, ChainSettlement, ContractAddresses};
use warranty_settlement::errors::SettlementError;
use warranty_settlement::handler::SimulatedSettlement;
use warranty_settlement::models::SettlementAction;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), SettlementError> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| SettlementError::InvalidRequest(format!("failed reading stdin: {e}")))?;

    let action: SettlementAction = serde_json::from_str(&input)
        .map_err(|e| SettlementError::InvalidRequest(format!("invalid json input: {e}")))?;

    let response = if let Some(cfg) = read_chain_config()? {
        let client = ChainSettlement::connect(cfg, read_contract_addresses())?;
        let rt = Runtime::new().map_err(|e| SettlementError::Onchain(format!("runtime init failed: {e}")))?;
        rt.block_on(client.dispatch(&action))?
    } else {
        SimulatedSettlement::new().dispatch(&action)?
    };

    let output = serde_json::to_string_pretty(&response)
        .map_err(|e| SettlementError::InvalidRequest(format!("failed serializing output: {e}")))?;
    println!("{output}");
    Ok(())
}

fn read_chain_config() -> Result<Option<ChainConfig>, SettlementError> {
    let rpc = std::env::var("CHAIN_RPC_URL").ok();
    let pk = std::env::var("CHAIN_PRIVATE_KEY").ok();

    match (rpc, pk) {
        (Some(rpc_url), Some(private_key)) => {
            let chain_id = std::env::var("CHAIN_ID")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(131072);
            Ok(Some(ChainConfig {
                rpc_url,
                private_key,
                chain_id,
            }))
        }
        (None, None) => Ok(None),
        _ => Err(SettlementError::MissingEnv(
            "set both CHAIN_RPC_URL and CHAIN_PRIVATE_KEY, or set neither for simulation mode".to_string(),
        )),
    }
}

fn read_contract_addresses() -> ContractAddresses {
    ContractAddresses {
        agent_registry: std::env::var("AGENT_REGISTRY_ADDRESS").ok(),
        policy_registry: std::env::var("POLICY_REGISTRY_ADDRESS").ok(),
        claim_manager: std::env::var("CLAIM_MANAGER_ADDRESS").ok(),
        warranty_pool: std::env::var("WARRANTY_POOL_ADDRESS").ok(),
    }
}
