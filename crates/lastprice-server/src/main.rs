use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use lastprice_server::state::AppState;

/// `lastprice health`: liveness probe for container health checks.
///
/// Calls `GET http://localhost:$LASTPRICE_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("LASTPRICE_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lastprice=info".parse()?),
        )
        .json()
        .init();

    let cfg = lastprice_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/lastprice.db", cfg.data_dir);
    let db = lastprice_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    if cfg.paid_api_key.is_none() && cfg.stripe_secret_key.is_none() {
        tracing::warn!("No platform provider credentials configured; managed tenants use the manual adapter");
    }

    let state = Arc::new(AppState::new(db, cfg.clone()).map_err(|e| anyhow::anyhow!(e))?);

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = lastprice_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        environment = %cfg.environment,
        "LastPrice listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    info!("LastPrice stopped");
    Ok(())
}
