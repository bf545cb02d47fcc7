use crate::app::AppState;
use crate::module::warranty::crud;
use crate::module::warranty::error::AppError;
use crate::module::warranty::model::{AgentStatus, RunMetadata, RunRecord, RunVerdict};
use crate::module::warranty::schema::{ExecuteRunRequest, ReplayRunResponse};
use crate::service::executor_service::{ExecutionRequest, ProofCheck};
use crate::service::policy_engine_service::{evaluate_policy, EvaluationInput};
use crate::service::validation_service::normalize_wallet_address;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Executes one run for an active agent and commits it with its verdict.
/// Nothing is persisted unless the executor returns a transcript.
pub async fn execute_run(state: &AppState, req: ExecuteRunRequest) -> Result<RunRecord, AppError> {
    if req.user_input.trim().is_empty() {
        return Err(AppError::bad_request("INVALID_USER_INPUT", "user_input is required"));
    }
    let user_address = req
        .user_address
        .as_deref()
        .map(normalize_wallet_address)
        .transpose()?;

    let agent = crud::agent_by_id(&state.store, req.agent_id)?
        .ok_or_else(|| AppError::not_found("AGENT_NOT_FOUND", format!("agent {} not found", req.agent_id)))?;
    if agent.status != AgentStatus::Active {
        return Err(AppError::bad_request(
            "AGENT_NOT_ACTIVE",
            format!("agent {} is {}", agent.agent_id, agent.status.as_str()),
        ));
    }

    let policy = crud::active_policy_for_agent(&state.store, agent.agent_id)?;
    let rules = policy.as_ref().map(|p| p.rules.clone()).unwrap_or_default();

    let exec_req = ExecutionRequest {
        model_id: req
            .model_id
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| state.config.default_model_id.clone()),
        user_input: req.user_input,
        allowed_tools: rules.allowed_tools.clone(),
        simulate_tools: req.simulate_tools,
    };
    let limit = state.config.executor_timeout_seconds;
    let outcome = match timeout(Duration::from_secs(limit), state.executor.execute(&exec_req)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            return Err(AppError::bad_gateway("EXECUTION_FAILED", err.to_string()));
        }
        Err(_) => {
            return Err(AppError::bad_gateway(
                "EXECUTION_FAILED",
                format!("execution backend timed out after {limit}s"),
            ));
        }
    };

    let run_metadata = RunMetadata {
        data_sources: outcome.data_sources,
        declared_model: Some(exec_req.model_id),
        executed_model: outcome.executed_model,
    };
    let policy_id = policy.map(|p| p.policy_id);

    // History is read and the run committed under one lock, so concurrent
    // runs of an agent see each other in commit order.
    let (run, agent) = crud::commit_evaluated_run(&state.store, agent.agent_id, |run_history| {
        let evaluated_at = crud::now_unix_f64();
        let verdict = evaluate_policy(EvaluationInput {
            transcript: &outcome.transcript,
            rules: &rules,
            run_history: &run_history,
            run_metadata: &run_metadata,
            now: evaluated_at,
        })
        .map_err(|e| AppError::internal("EVALUATION_ERROR", e))?;

        Ok(RunRecord {
            run_id: outcome.run_id,
            agent_id: agent.agent_id,
            user_address,
            input_hash: outcome.input_hash,
            output_hash: outcome.output_hash,
            transcript: outcome.transcript,
            settlement_ref: outcome.settlement_ref,
            verdict: if verdict.passed { RunVerdict::Pass } else { RunVerdict::Fail },
            reason_codes: verdict.failed_codes,
            evidence_hash: verdict.evidence_hash,
            policy_id,
            run_metadata,
            run_history,
            evaluated_at,
            created_at: crud::now_unix(),
        })
    })?;

    crud::mirror_run(state, &run).await;
    crud::mirror_agent(state, &agent).await;
    info!(
        run_id = %run.run_id,
        agent_id = run.agent_id,
        passed = run.verdict == RunVerdict::Pass,
        violations = run.reason_codes.len(),
        "run evaluated"
    );
    Ok(run)
}

/// Re-checks a stored run: the executor confirms the settlement reference,
/// then the stored transcript and evaluation context are judged against the
/// agent's current active policy at the original evaluation instant.
pub async fn replay_run(state: &AppState, run_id: &str) -> Result<ReplayRunResponse, AppError> {
    let run = crud::run_by_id(&state.store, run_id)?
        .ok_or_else(|| AppError::not_found("RUN_NOT_FOUND", format!("run {run_id} not found")))?;

    let limit = state.config.executor_timeout_seconds;
    let proof = match timeout(
        Duration::from_secs(limit),
        state.executor.verify_proof(&run.run_id, run.settlement_ref.as_deref()),
    )
    .await
    {
        Ok(Ok(proof)) => proof,
        Ok(Err(err)) => {
            warn!(run_id = %run.run_id, error = %err, "proof check failed");
            ProofCheck {
                valid: false,
                input_hash_match: false,
                output_hash_match: false,
            }
        }
        Err(_) => {
            warn!(run_id = %run.run_id, timeout_seconds = limit, "proof check timed out");
            ProofCheck {
                valid: false,
                input_hash_match: false,
                output_hash_match: false,
            }
        }
    };

    let policy = crud::active_policy_for_agent(&state.store, run.agent_id)?;
    let rules = policy.as_ref().map(|p| p.rules.clone()).unwrap_or_default();
    let verdict = evaluate_policy(EvaluationInput {
        transcript: &run.transcript,
        rules: &rules,
        run_history: &run.run_history,
        run_metadata: &run.run_metadata,
        now: run.evaluated_at,
    })
    .map_err(|e| AppError::internal("EVALUATION_ERROR", e))?;

    let fresh_verdict = if verdict.passed { RunVerdict::Pass } else { RunVerdict::Fail };
    let verdict_matches = fresh_verdict == run.verdict && verdict.failed_codes == run.reason_codes;
    info!(run_id = %run.run_id, proof_valid = proof.valid, verdict_matches, "run replayed");

    Ok(ReplayRunResponse {
        found: true,
        run_id: run.run_id,
        proof_valid: proof.valid,
        input_hash_match: proof.input_hash_match,
        output_hash_match: proof.output_hash_match,
        policy_id: policy.map(|p| p.policy_id),
        policy_verdict: Some(fresh_verdict),
        reason_codes: verdict.failed_codes,
        evidence_hash: verdict.evidence_hash,
        original_verdict: Some(run.verdict),
        original_reason_codes: run.reason_codes,
        original_evidence_hash: run.evidence_hash,
        verdict_matches,
        error_code: None,
        reason: if verdict_matches {
            "replay reproduces the original verdict".to_string()
        } else {
            "replay verdict differs from the original".to_string()
        },
    })
}
