mod common;

use common::{
    build_settled_context, build_test_context, eventually, execute_run, get, post, register_agent,
    register_policy, seed_agent_with_runs, CLAIMANT_WALLET, OPERATOR_WALLET,
};
use http::StatusCode;
use serde_json::json;
use warranty_service::module::warranty::schema::{
    AgentLookupResponse, CollateralResponse, DashboardStatsResponse, HealthResponse, RegisterAgentResponse,
    ScoreHistoryResponse, ScoreResponse, SubmitClaimResponse,
};

#[tokio::test]
async fn health_reports_enabled_layers() {
    let ctx = build_test_context();
    let (status, health): (_, HealthResponse) = get(&ctx.app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.status, "ok");
    assert!(!health.persistence_enabled);
    assert!(!health.settlement_enabled);

    let ctx = build_settled_context();
    let (_, health): (_, HealthResponse) = get(&ctx.app, "/api/health").await;
    assert!(health.settlement_enabled);
}

#[tokio::test]
async fn fresh_agent_scores_full_marks() {
    let ctx = build_test_context();
    let (agent_id, _) = register_agent(&ctx.app, OPERATOR_WALLET).await;

    let (status, resp): (_, ScoreResponse) = get(&ctx.app, &format!("/api/scores/{agent_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let score = resp.score.expect("score");
    assert_eq!(score.score, 100);
    assert_eq!(score.total_runs, 0);
    assert_eq!(score.breakdown.violation_penalty, 0.0);
}

#[tokio::test]
async fn live_score_reflects_violations_and_recent_clean_runs() {
    let ctx = build_test_context();
    let (agent_id, _, _, _) = seed_agent_with_runs(&ctx.app).await;

    let (_, resp): (_, ScoreResponse) = get(&ctx.app, &format!("/api/scores/{agent_id}")).await;
    let score = resp.score.expect("score");
    assert_eq!(score.total_runs, 2);
    assert_eq!(score.violations, 1);
    assert_eq!(score.breakdown.violation_penalty, 30.0);
    assert_eq!(score.breakdown.recency_bonus, 0.5);
    assert_eq!(score.score, 70, "70.5 rounds half to even");

    let (_, agent): (_, AgentLookupResponse) = get(&ctx.app, &format!("/api/agents/{agent_id}")).await;
    assert_eq!(agent.agent.expect("agent").trust_score, 100, "only snapshots move the trust score");
}

#[tokio::test]
async fn approved_claim_records_a_snapshot() {
    let ctx = build_test_context();
    let (agent_id, _, _, bad_run_id) = seed_agent_with_runs(&ctx.app).await;

    let (_, history): (_, ScoreHistoryResponse) =
        get(&ctx.app, &format!("/api/scores/{agent_id}/history")).await;
    assert!(history.snapshots.is_empty());

    let (status, _): (_, SubmitClaimResponse) = post(
        &ctx.app,
        "/api/claims",
        json!({
            "run_id": bad_run_id,
            "claimant_address": CLAIMANT_WALLET,
            "reason_code": "PROHIBITED_TARGET"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history): (_, ScoreHistoryResponse) =
        get(&ctx.app, &format!("/api/scores/{agent_id}/history?limit=5")).await;
    assert_eq!(history.snapshots.len(), 1);
    let snapshot = &history.snapshots[0];
    assert_eq!(snapshot.score, 70);
    assert_eq!(snapshot.total_runs, 2);
    assert_eq!(snapshot.snapshot_hash.len(), 64);

    let (_, agent): (_, AgentLookupResponse) = get(&ctx.app, &format!("/api/agents/{agent_id}")).await;
    assert_eq!(agent.agent.expect("agent").trust_score, 70);
}

#[tokio::test]
async fn paid_claim_lowers_the_score_again() {
    let ctx = build_settled_context();
    let (agent_id, key) = register_agent(&ctx.app, OPERATOR_WALLET).await;
    register_policy(&ctx.app, agent_id, &key.expect("key"), json!({"prohibited_targets": ["0xdead"]})).await;
    let run = execute_run(&ctx.app, agent_id, json!([{"tool": "transfer", "args": {"to": "0xDEAD"}}]))
        .await
        .run
        .expect("run");

    let (status, _): (_, SubmitClaimResponse) = post(
        &ctx.app,
        "/api/claims",
        json!({"run_id": run.run_id, "claimant_address": CLAIMANT_WALLET, "reason_code": "PROHIBITED_TARGET"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let app = ctx.app.clone();
    let settled = eventually(|| {
        let app = app.clone();
        async move {
            let (_, history): (_, ScoreHistoryResponse) =
                get(&app, &format!("/api/scores/{agent_id}/history")).await;
            history.snapshots.len() == 2
        }
    })
    .await;
    assert!(settled, "payout never produced a second snapshot");

    let (_, history): (_, ScoreHistoryResponse) = get(&ctx.app, &format!("/api/scores/{agent_id}/history")).await;
    let scores: Vec<u32> = history.snapshots.iter().map(|s| s.score).collect();
    assert_eq!(scores, vec![10, 40], "newest first: paid claim adds the claim penalty");

    let (_, stats): (_, DashboardStatsResponse) = get(&ctx.app, "/api/scores").await;
    assert_eq!(stats.total_agents, 1);
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.total_claims, 1);
    assert_eq!(stats.paid_claims, 1);
    assert_eq!(stats.total_violations, 1);
}

#[tokio::test]
async fn unknown_agent_has_no_score() {
    let ctx = build_test_context();
    let (status, resp): (_, ScoreResponse) = get(&ctx.app, "/api/scores/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!resp.found);
    assert_eq!(resp.error_code.as_deref(), Some("AGENT_NOT_FOUND"));

    let (status, _): (_, ScoreHistoryResponse) = get(&ctx.app, "/api/scores/77/history").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn collateral_needs_a_settlement_layer() {
    let ctx = build_test_context();
    let (agent_id, _) = register_agent(&ctx.app, OPERATOR_WALLET).await;
    let (status, resp): (_, CollateralResponse) = get(&ctx.app, &format!("/api/agents/{agent_id}/collateral")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!resp.available);
    assert!(resp.collateral.is_none());

    let ctx = build_settled_context();
    let (status, registered): (_, RegisterAgentResponse) = post(
        &ctx.app,
        "/api/agents",
        json!({"wallet_address": OPERATOR_WALLET, "metadata_uri": "ipfs://agent-card"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(registered.chain_tx.is_some());
    let agent = registered.agent.expect("agent");
    assert!(agent.chain_agent_id.is_some());

    let (_, resp): (_, CollateralResponse) =
        get(&ctx.app, &format!("/api/agents/{}/collateral", agent.agent_id)).await;
    assert!(resp.available);
    assert!(resp.collateral.is_some());
}
