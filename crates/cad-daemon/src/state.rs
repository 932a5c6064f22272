//! Shared runtime state for the daemon.

use std::sync::Arc;

use sqlx::PgPool;

use cad_config::AppConfig;
use cad_pipeline::Pipeline;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub pipeline: Pipeline,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let pipeline = Pipeline::new(pool.clone(), config.clone());
        Self {
            pool,
            config: Arc::new(config),
            pipeline,
            build: BuildInfo {
                service: "cad-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
