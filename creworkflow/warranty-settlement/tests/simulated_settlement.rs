use warranty_settlement::errors::SettlementError;
use warranty_settlement::handler::SimulatedSettlement;
use warranty_settlement::models::{
    AgentRegistration, ClaimPayout, ClaimResolution, ClaimSubmission, CollateralQuery,
    PolicyRegistration, ScoreUpdate, SettlementAction, SettlementOutput,
};

fn claim_template() -> ClaimSubmission {
    ClaimSubmission {
        run_id: "4f3c2a1b9d8e7f6a5b4c3d2e1f0a9b8c".to_string(),
        chain_agent_id: 7,
        reason_code: "TOOL_WHITELIST_VIOLATION".to_string(),
        evidence_hash: "b3f1".repeat(16),
    }
}

#[test]
fn registrations_allocate_sequential_ids() {
    let sim = SimulatedSettlement::new();
    let first = sim
        .register_agent(&AgentRegistration {
            metadata_uri: "ipfs://agent-a".to_string(),
        })
        .expect("register agent");
    let second = sim
        .register_agent(&AgentRegistration {
            metadata_uri: "ipfs://agent-b".to_string(),
        })
        .expect("register agent");

    assert_eq!(first.onchain_id, 1);
    assert_eq!(second.onchain_id, 2);
    assert!(first.tx_hash.starts_with("0x"));
    assert_ne!(first.tx_hash, second.tx_hash);

    let policy = sim
        .register_policy(&PolicyRegistration {
            chain_agent_id: first.onchain_id,
            policy_hash: "ab".repeat(32),
            rules_uri: String::new(),
        })
        .expect("register policy");
    assert_eq!(policy.onchain_id, 1);
}

#[test]
fn claim_receipts_are_deterministic_across_instances() {
    let a = SimulatedSettlement::new().submit_claim(&claim_template()).expect("submit");
    let b = SimulatedSettlement::new().submit_claim(&claim_template()).expect("submit");
    assert_eq!(a, b);

    let sim = SimulatedSettlement::new();
    let approve = sim
        .resolve_claim(&ClaimResolution {
            chain_claim_id: a.onchain_id,
            approved: true,
        })
        .expect("resolve");
    let reject = sim
        .resolve_claim(&ClaimResolution {
            chain_claim_id: a.onchain_id,
            approved: false,
        })
        .expect("resolve");
    assert_ne!(approve.tx_hash, reject.tx_hash);

    let payout = sim
        .execute_payout(&ClaimPayout {
            chain_claim_id: a.onchain_id,
        })
        .expect("payout");
    assert!(payout.tx_hash.starts_with("0x"));
}

#[test]
fn submit_claim_requires_evidence_hash() {
    let mut req = claim_template();
    req.evidence_hash = " ".to_string();

    let err = SimulatedSettlement::new().submit_claim(&req).expect_err("must fail");
    assert!(matches!(err, SettlementError::InvalidRequest(_)));
    assert!(!err.is_retryable());
}

#[test]
fn score_update_rejects_out_of_range_values() {
    let sim = SimulatedSettlement::new();
    let err = sim
        .update_score(&ScoreUpdate {
            chain_agent_id: 3,
            score: 101,
            total_runs: 10,
            violations: 1,
        })
        .expect_err("must fail");
    assert!(matches!(err, SettlementError::InvalidRequest(_)));

    let err = sim
        .update_score(&ScoreUpdate {
            chain_agent_id: 3,
            score: 50,
            total_runs: 1,
            violations: 2,
        })
        .expect_err("must fail");
    assert!(matches!(err, SettlementError::InvalidRequest(_)));
}

#[test]
fn unregistered_agent_id_is_rejected() {
    let err = SimulatedSettlement::new()
        .collateral_health(&CollateralQuery { chain_agent_id: 0 })
        .expect_err("must fail");
    assert!(matches!(err, SettlementError::InvalidRequest(_)));
}

#[test]
fn dispatch_reads_tagged_actions() {
    let action: SettlementAction = serde_json::from_str(
        r#"{"action":"collateral_health","chain_agent_id":4}"#,
    )
    .expect("parse action");

    let out = SimulatedSettlement::new().dispatch(&action).expect("dispatch");
    match out {
        SettlementOutput::Collateral(health) => {
            assert_eq!(health.staked, "0");
            assert_eq!(health.ratio_bps, 0);
        }
        other => panic!("unexpected output: {other:?}"),
    }
}
