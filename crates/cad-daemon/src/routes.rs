//! Axum router and all HTTP handlers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use cad_db::boundaries::{
    boundaries_by_ids_or_area, boundaries_by_proprietor, boundaries_in_envelope, OwnerTypeFilter,
};
use cad_pipeline::StartOutcome;
use cad_schemas::parse_bool_literal;

use crate::api_types::{
    BoundariesParams, BoundariesResponse, BusyResponse, ErrorResponse, HealthResponse,
    PolygonsBody, RunPipelineParams, RunStartedResponse, SearchParams, SecretParam,
};
use crate::state::AppState;

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/boundaries", get(boundaries))
        .route("/polygons", post(polygons))
        .route("/search", get(search))
        .route("/run-pipeline", get(run_pipeline))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Every endpoint except `/health` requires `?secret=` matching the shared
/// secret.  A daemon without a configured secret refuses everything rather
/// than serving openly.
fn check_secret(state: &AppState, supplied: Option<&str>) -> Result<(), Response> {
    let expected = state.config.http_secret.as_deref();
    match (expected, supplied) {
        (Some(want), Some(got)) if want == got => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "unauthorised".to_string(),
            }),
        )
            .into_response()),
    }
}

fn bad_request(msg: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
        .into_response()
}

fn internal_error(err: anyhow::Error) -> Response {
    tracing::error!(error = ?err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = cad_db::status(&st.pool).await.map(|s| s.ok).unwrap_or(false);
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            db_ok,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /boundaries
// ---------------------------------------------------------------------------

pub(crate) async fn boundaries(
    State(st): State<Arc<AppState>>,
    Query(params): Query<BoundariesParams>,
) -> Response {
    if let Err(resp) = check_secret(&st, params.secret.as_deref()) {
        return resp;
    }

    let owner_filter = match params.owner_type.as_deref() {
        None => OwnerTypeFilter::All,
        Some(s) => match OwnerTypeFilter::parse(s) {
            Some(f) => f,
            None => return bad_request("type must be one of all|uk|overseas"),
        },
    };

    // Pending rows are visible only under the privileged flag.
    let include_pending = match params.accepted_only.as_deref() {
        None => false,
        Some(s) => match parse_bool_literal(s) {
            Some(accepted_only) => !accepted_only,
            None => return bad_request("acceptedOnly must be the literal \"true\" or \"false\""),
        },
    };

    match boundaries_in_envelope(
        &st.pool,
        params.sw_lng,
        params.sw_lat,
        params.ne_lng,
        params.ne_lat,
        owner_filter,
        include_pending,
    )
    .await
    {
        Ok(list) => (StatusCode::OK, Json(BoundariesResponse { boundaries: list })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /polygons
// ---------------------------------------------------------------------------

pub(crate) async fn polygons(
    State(st): State<Arc<AppState>>,
    Query(secret): Query<SecretParam>,
    Json(body): Json<PolygonsBody>,
) -> Response {
    if let Err(resp) = check_secret(&st, secret.secret.as_deref()) {
        return resp;
    }

    if body.poly_ids.is_none() && body.search_area.is_none() {
        return bad_request("provide poly_ids and/or searchArea");
    }

    match boundaries_by_ids_or_area(
        &st.pool,
        body.poly_ids.as_deref(),
        body.search_area.as_ref(),
        body.include_leaseholds.unwrap_or(true),
    )
    .await
    {
        Ok(list) => (StatusCode::OK, Json(BoundariesResponse { boundaries: list })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /search
// ---------------------------------------------------------------------------

pub(crate) async fn search(
    State(st): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    if let Err(resp) = check_secret(&st, params.secret.as_deref()) {
        return resp;
    }

    match boundaries_by_proprietor(&st.pool, &params.proprietor_name).await {
        Ok(list) => (StatusCode::OK, Json(BoundariesResponse { boundaries: list })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /run-pipeline
// ---------------------------------------------------------------------------

pub(crate) async fn run_pipeline(
    State(st): State<Arc<AppState>>,
    Query(params): Query<RunPipelineParams>,
) -> Response {
    if let Err(resp) = check_secret(&st, params.secret.as_deref()) {
        return resp;
    }

    let options = match params.to_options() {
        Ok(o) => o,
        Err(msg) => return bad_request(msg),
    };

    match st.pipeline.launch(options).await {
        Ok(StartOutcome::Started { unique_key }) => {
            info!(unique_key, "pipeline run launched");
            (
                StatusCode::ACCEPTED,
                Json(RunStartedResponse {
                    started: true,
                    unique_key,
                }),
            )
                .into_response()
        }
        Ok(StartOutcome::Busy { unique_key }) => (
            StatusCode::CONFLICT,
            Json(BusyResponse {
                busy: true,
                unique_key,
            }),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}
