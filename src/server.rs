use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::post};
use log::{error, info};
use serde::Deserialize;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;

use crate::checker::{ConflictChecker, ConflictMap};
use crate::config::ServerConfig;
use crate::data::{Individual, ReferenceData, SchedulerInput, TimetableGrid};
use crate::diagnostics::{DiagnosticIssue, run_preflight_diagnostics};
use crate::oracle::Oracle;
use crate::solver;

#[derive(Clone)]
pub struct AppState {
    pub oracle: Arc<dyn Oracle>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub reference: ReferenceData,
    pub timetable: TimetableGrid,
}

async fn solve_handler(
    State(state): State<AppState>,
    Json(input): Json<SchedulerInput>,
) -> Result<Json<Vec<Individual>>, (StatusCode, String)> {
    // The generations are CPU bound; keep them off the async workers.
    let handle = tokio::runtime::Handle::current();
    let oracle = Arc::clone(&state.oracle);
    let search = tokio::task::spawn_blocking(move || {
        handle.block_on(solver::solve(&input, oracle.as_ref()))
    });
    match search.await {
        Ok(Ok(candidates)) => Ok(Json(candidates)),
        Ok(Err(e)) => {
            error!("Solve request rejected: {}", e);
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => {
            error!("Solve task failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "search task failed".to_string()))
        }
    }
}

async fn check_handler(Json(request): Json<CheckRequest>) -> Json<ConflictMap> {
    Json(ConflictChecker::new(&request.reference).check(&request.timetable))
}

async fn diagnostics_handler(Json(reference): Json<ReferenceData>) -> Json<Vec<DiagnosticIssue>> {
    Json(run_preflight_diagnostics(&reference))
}

/// Routes for solving, checking and diagnosing; at most `max_concurrent_solves`
/// searches run at once.
pub fn router(oracle: Arc<dyn Oracle>, max_concurrent_solves: usize) -> Router {
    Router::new()
        .route(
            "/v1/timetable/solve",
            post(solve_handler).layer(ConcurrencyLimitLayer::new(max_concurrent_solves.max(1))),
        )
        .route("/v1/timetable/check", post(check_handler))
        .route("/v1/timetable/diagnostics", post(diagnostics_handler))
        .with_state(AppState { oracle })
}

pub async fn run_server(config: &ServerConfig, oracle: Arc<dyn Oracle>) -> std::io::Result<()> {
    let app = router(oracle, config.max_concurrent_solves);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server running at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}
