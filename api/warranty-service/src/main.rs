use tokio::net::TcpListener;
use tracing::{error, info, warn};
use warranty_service::app::{build_router, AppState};
use warranty_service::config::environment::AppConfig;
use warranty_service::infra::init_infra;

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            init_logging("text");
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };
    init_logging(&config.log_format);

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr = %bind_addr, "server bind error");
            std::process::exit(1);
        }
    };

    info!(
        env = %config.rust_env,
        host = %config.api_host,
        port = config.api_port,
        default_model_id = %config.default_model_id,
        "warranty-service started"
    );

    let infra = match init_infra(&config).await {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "infra init failed; running without persistence");
            None
        }
    };
    let state = match AppState::new(config, infra) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "app state init error");
            std::process::exit(1);
        }
    };

    let app = build_router(state);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server runtime error");
        std::process::exit(1);
    }
}

fn init_logging(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
