use super::crud;
use super::error::AppError;
use super::schema::{
    ActivatePolicyRequest, ActivatePolicyResponse, AgentListResponse, AgentLookupResponse,
    AgentStatusResponse, ClaimListResponse, ClaimLookupResponse, CollateralResponse,
    ConfigureWebhookRequest, DashboardStatsResponse, ExecuteRunRequest, ExecuteRunResponse,
    HealthResponse, HistoryQuery, ListClaimsQuery, ListPoliciesQuery, ListRunsQuery,
    PolicyListResponse, PolicyLookupResponse, RegisterAgentRequest, RegisterAgentResponse,
    RegisterPolicyRequest, RegisterPolicyResponse, ReplayRunResponse, RunListResponse,
    RunLookupResponse, ScoreHistoryResponse, ScoreResponse, SetAgentStatusRequest,
    SubmitClaimRequest, SubmitClaimResponse, WebhookConfigResponse,
};
use crate::app::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{response::IntoResponse, Json};
use tracing::{error, info};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            service: "warranty-service".to_string(),
            persistence_enabled: state.infra.is_some(),
            settlement_enabled: state.settlement.is_some(),
        }),
    )
}

pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> impl IntoResponse {
    match crud::register_agent(&state, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "agent registration rejected");
            (
                err.status,
                Json(RegisterAgentResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    match crud::list_agents(&state).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "agent listing failed");
            (
                err.status,
                Json(AgentListResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_agent(State(state): State<AppState>, Path(agent_id): Path<u64>) -> impl IntoResponse {
    match crud::get_agent(&state, agent_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => error_agent_lookup(err),
    }
}

pub async fn set_agent_status(
    State(state): State<AppState>,
    Path(agent_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<SetAgentStatusRequest>,
) -> impl IntoResponse {
    match crud::set_agent_status(&state, &headers, agent_id, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(agent_id, error_code = err.code, reason = %err.message, "agent status change rejected");
            (
                err.status,
                Json(AgentStatusResponse {
                    agent_id,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn configure_webhook(
    State(state): State<AppState>,
    Path(agent_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<ConfigureWebhookRequest>,
) -> impl IntoResponse {
    match crud::configure_webhook(&state, &headers, agent_id, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(agent_id, error_code = err.code, reason = %err.message, "webhook configuration rejected");
            (
                err.status,
                Json(WebhookConfigResponse {
                    agent_id,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_collateral(State(state): State<AppState>, Path(agent_id): Path<u64>) -> impl IntoResponse {
    match crud::get_collateral(&state, agent_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(agent_id, error_code = err.code, reason = %err.message, "collateral lookup rejected");
            (
                err.status,
                Json(CollateralResponse {
                    agent_id,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn register_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterPolicyRequest>,
) -> impl IntoResponse {
    match crud::register_policy(&state, &headers, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "policy registration rejected");
            (
                err.status,
                Json(RegisterPolicyResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn activate_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<ActivatePolicyRequest>,
) -> impl IntoResponse {
    match crud::activate_policy(&state, &headers, policy_id, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(policy_id, error_code = err.code, reason = %err.message, "policy activation rejected");
            (
                err.status,
                Json(ActivatePolicyResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_policy(State(state): State<AppState>, Path(policy_id): Path<u64>) -> impl IntoResponse {
    match crud::get_policy(&state, policy_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(policy_id, error_code = err.code, reason = %err.message, "policy lookup rejected");
            (
                err.status,
                Json(PolicyLookupResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<ListPoliciesQuery>,
) -> impl IntoResponse {
    match crud::list_policies(&state, query).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "policy listing failed");
            (
                err.status,
                Json(PolicyListResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn execute_run(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRunRequest>,
) -> impl IntoResponse {
    let agent_id = req.agent_id;
    match crud::execute_run(&state, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(agent_id, error_code = err.code, reason = %err.message, "run rejected");
            (
                err.status,
                Json(ExecuteRunResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn list_runs(State(state): State<AppState>, Query(query): Query<ListRunsQuery>) -> impl IntoResponse {
    match crud::list_runs(&state, query).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "run listing failed");
            (
                err.status,
                Json(RunListResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    match crud::get_run(&state, &run_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(run_id = %run_id, error_code = err.code, reason = %err.message, "run lookup rejected");
            (
                err.status,
                Json(RunLookupResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn replay_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    match crud::replay_run(&state, &run_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(run_id = %run_id, error_code = err.code, reason = %err.message, "replay rejected");
            (
                err.status,
                Json(ReplayRunResponse {
                    run_id,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn submit_claim(
    State(state): State<AppState>,
    Json(req): Json<SubmitClaimRequest>,
) -> impl IntoResponse {
    match crud::submit_claim(&state, req).await {
        Ok(resp) => {
            if let Some(claim) = &resp.claim {
                info!(claim_id = claim.claim_id, status = claim.status.as_str(), "claim processed");
            }
            (StatusCode::OK, Json(resp))
        }
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "claim rejected");
            (
                err.status,
                Json(SubmitClaimResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_claim(State(state): State<AppState>, Path(claim_id): Path<u64>) -> impl IntoResponse {
    match crud::get_claim(&state, claim_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(claim_id, error_code = err.code, reason = %err.message, "claim lookup rejected");
            (
                err.status,
                Json(ClaimLookupResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn list_claims(
    State(state): State<AppState>,
    Query(query): Query<ListClaimsQuery>,
) -> impl IntoResponse {
    match crud::list_claims(&state, query).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "claim listing rejected");
            (
                err.status,
                Json(ClaimListResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_dashboard_stats(State(state): State<AppState>) -> impl IntoResponse {
    match crud::get_dashboard_stats(&state).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "dashboard stats failed");
            (
                err.status,
                Json(DashboardStatsResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_score(State(state): State<AppState>, Path(agent_id): Path<u64>) -> impl IntoResponse {
    match crud::get_score(&state, agent_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(agent_id, error_code = err.code, reason = %err.message, "score lookup rejected");
            (
                err.status,
                Json(ScoreResponse {
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

pub async fn get_score_history(
    State(state): State<AppState>,
    Path(agent_id): Path<u64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match crud::get_score_history(&state, agent_id, query).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            error!(agent_id, error_code = err.code, reason = %err.message, "score history rejected");
            (
                err.status,
                Json(ScoreHistoryResponse {
                    agent_id,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                    ..Default::default()
                }),
            )
        }
    }
}

fn error_agent_lookup(err: AppError) -> (StatusCode, Json<AgentLookupResponse>) {
    error!(error_code = err.code, reason = %err.message, "agent lookup rejected");
    (
        err.status,
        Json(AgentLookupResponse {
            found: false,
            agent: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
