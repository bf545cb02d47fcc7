use crate::config::environment::AppConfig;
use crate::infra::InfraClients;
use crate::module::warranty::crud::WarrantyStore;
use crate::module::warranty::route::register_routes;
use crate::service::executor_service::{ExecutionBackend, HttpExecutor, MockExecutor};
use crate::service::notification_service::{EventNotifier, WebhookNotifier};
use crate::service::settlement_service::{settlement_from_config, SettlementLayer};
use axum::http::Method;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<WarrantyStore>,
    pub infra: Option<InfraClients>,
    pub executor: Arc<dyn ExecutionBackend>,
    pub settlement: Option<Arc<dyn SettlementLayer>>,
    pub notifier: Arc<dyn EventNotifier>,
}

impl AppState {
    /// Wires the collaborators named by the configuration: the HTTP executor
    /// when `EXECUTOR_BASE_URL` is set (the in-process mock otherwise), the
    /// settlement layer if any, and webhook delivery.
    pub fn new(config: AppConfig, infra: Option<InfraClients>) -> Result<Self, String> {
        let executor: Arc<dyn ExecutionBackend> = match &config.executor_base_url {
            Some(base_url) => {
                info!(base_url = %base_url, "execution backend: http");
                Arc::new(
                    HttpExecutor::new(base_url, config.executor_timeout_seconds)
                        .map_err(|e| e.to_string())?,
                )
            }
            None => {
                info!("execution backend: mock");
                Arc::new(MockExecutor)
            }
        };
        let settlement = settlement_from_config(&config)?;
        let notifier = Arc::new(WebhookNotifier::new(config.webhook_timeout_seconds)?);
        Ok(Self::with_collaborators(config, infra, executor, settlement, notifier))
    }

    pub fn with_collaborators(
        config: AppConfig,
        infra: Option<InfraClients>,
        executor: Arc<dyn ExecutionBackend>,
        settlement: Option<Arc<dyn SettlementLayer>>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            config,
            store: Arc::new(WarrantyStore::default()),
            infra,
            executor,
            settlement,
            notifier,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:3000".parse().expect("valid origin"),
            "http://127.0.0.1:3000".parse().expect("valid origin"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    register_routes(state).layer(cors)
}
