use anyhow::Context;
use clinic_scheduler::config::AppConfig;
use clinic_scheduler::state::AppState;
use clinic_scheduler::{build_info, routes, telemetry};
use common_db::init_db_pool;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    telemetry::init(config.log_format)?;

    info!(
        version = build_info::PKG_VERSION,
        db_path = %config.database.db_path,
        "Iniciando clinic-scheduler"
    );

    let pool = init_db_pool(&config.database)
        .await
        .context("Falha ao inicializar o banco de dados")?;
    let state = AppState::build(pool.clone(), &config)?;
    let app = routes::router(state, config.server.max_concurrent_requests);

    info!(addr = %config.server.bind_addr, "Servidor escutando");
    axum::Server::try_bind(&config.server.bind_addr)
        .with_context(|| format!("Falha ao abrir {}", config.server.bind_addr))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Erro no servidor HTTP")?;

    pool.close().await;
    info!("Servidor encerrado");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Falha ao escutar sinal de encerramento");
    }
}
