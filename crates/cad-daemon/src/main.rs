//! cad-daemon entry point.
//!
//! Thin by design: tracing, config, pool, startup resumption, middleware,
//! serve.  Route handlers live in `routes.rs`, shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::Method;
use cad_daemon::{routes, state::AppState};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = cad_config::AppConfig::from_env()?;
    if config.http_secret.is_none() {
        warn!("CAD_HTTP_SECRET is not set; every authenticated endpoint will refuse");
    }

    let pool = cad_db::connect_from_env().await?;
    cad_db::migrate(&pool).await?;

    let shared = Arc::new(AppState::new(pool, config.clone()));

    // A ledger row still marked running means the previous process died
    // mid-run; re-enter it before accepting new run requests.
    if let Some(key) = shared.pipeline.resume_interrupted().await? {
        info!(unique_key = %key, "resumed interrupted pipeline run");
    }

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
        );

    let addr: SocketAddr = config
        .daemon_addr
        .parse()
        .with_context(|| format!("invalid CAD_DAEMON_ADDR: {}", config.daemon_addr))?;
    info!("cad-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
