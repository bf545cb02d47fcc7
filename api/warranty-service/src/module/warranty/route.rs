use super::controller;
use crate::app::AppState;
use axum::routing::{get, post};
use axum::Router;

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(controller::health))
        .route(
            "/api/agents",
            get(controller::list_agents).post(controller::register_agent),
        )
        .route("/api/agents/:agent_id", get(controller::get_agent))
        .route(
            "/api/agents/:agent_id/status",
            post(controller::set_agent_status),
        )
        .route(
            "/api/agents/:agent_id/webhook",
            post(controller::configure_webhook),
        )
        .route(
            "/api/agents/:agent_id/collateral",
            get(controller::get_collateral),
        )
        .route(
            "/api/policies",
            get(controller::list_policies).post(controller::register_policy),
        )
        .route("/api/policies/:policy_id", get(controller::get_policy))
        .route(
            "/api/policies/:policy_id/activate",
            post(controller::activate_policy),
        )
        .route(
            "/api/runs",
            get(controller::list_runs).post(controller::execute_run),
        )
        .route("/api/runs/:run_id", get(controller::get_run))
        .route("/api/runs/:run_id/replay", get(controller::replay_run))
        .route(
            "/api/claims",
            get(controller::list_claims).post(controller::submit_claim),
        )
        .route("/api/claims/:claim_id", get(controller::get_claim))
        .route("/api/scores", get(controller::get_dashboard_stats))
        .route("/api/scores/:agent_id", get(controller::get_score))
        .route(
            "/api/scores/:agent_id/history",
            get(controller::get_score_history),
        )
        .with_state(state)
}
