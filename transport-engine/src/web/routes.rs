//! HTTP route handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tracing::{debug, warn};

use crate::domain::{BoardMode, Crs};
use crate::engine::{ConfiguredView, SourceHealthReport, StopArrivals, ViewError};
use crate::projection::StopDepartures;
use crate::source::SourceError;

use super::dto::*;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/views", get(configured_views))
        .route("/stations/:crs/departures", get(departures))
        .route("/stations/:crs/arrivals", get(arrivals))
        .route("/stations/:crs/source", get(source_health))
        .route("/lines/status", get(line_status))
        .route("/buses", get(bus_stops))
        .route("/buses/:stop_id", get(bus_arrivals))
        .route("/dlr", get(dlr_departures))
        .with_state(state)
}

/// Health check endpoint, with the poll state of every board.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let boards = state
        .engine
        .monitored()
        .into_iter()
        .filter_map(|key| Some(BoardSummary::new(key, state.engine.poll_status(key)?)))
        .collect();

    Json(HealthResponse {
        status: "ok",
        boards,
    })
}

/// Every configured station and destination pair.
async fn configured_views(State(state): State<AppState>) -> Json<Vec<ConfiguredView>> {
    Json(state.engine.configured_views().await)
}

async fn departures(
    State(state): State<AppState>,
    Path(crs): Path<String>,
    Query(req): Query<ViewRequest>,
) -> Result<Json<ViewResponse>, AppError> {
    board_view(&state, &crs, req, BoardMode::Departures).await
}

async fn arrivals(
    State(state): State<AppState>,
    Path(crs): Path<String>,
    Query(req): Query<ViewRequest>,
) -> Result<Json<ViewResponse>, AppError> {
    board_view(&state, &crs, req, BoardMode::Arrivals).await
}

async fn board_view(
    state: &AppState,
    crs: &str,
    req: ViewRequest,
    mode: BoardMode,
) -> Result<Json<ViewResponse>, AppError> {
    let station = parse_station(crs)?;
    let view = state
        .engine
        .current_view(station, req.destination.as_deref(), mode)
        .await?;
    Ok(Json(view.into()))
}

/// Rail source health as seen from one station.
async fn source_health(
    State(state): State<AppState>,
    Path(crs): Path<String>,
) -> Result<Json<SourceHealthReport>, AppError> {
    let station = parse_station(&crs)?;
    Ok(Json(state.engine.source_health(station)?))
}

/// Status of the requested lines, or the configured ones.
async fn line_status(
    State(state): State<AppState>,
    Query(req): Query<LinesRequest>,
) -> Result<Json<LineStatusResponse>, AppError> {
    let lines: Vec<String> = match req.lines {
        Some(lines) => lines
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => state.engine.config().lines.clone(),
    };
    if lines.is_empty() {
        return Err(AppError::BadRequest {
            message: "No lines requested".to_string(),
        });
    }

    let records = state.engine.line_status(&lines).await?;
    Ok(Json(LineStatusResponse::new(records.as_ref().clone())))
}

async fn bus_arrivals(
    State(state): State<AppState>,
    Path(stop_id): Path<String>,
) -> Result<Json<BusArrivalsResponse>, AppError> {
    let stop_id = stop_id.trim();
    if stop_id.is_empty() {
        return Err(AppError::BadRequest {
            message: "Missing stop id".to_string(),
        });
    }

    let arrivals = state.engine.bus_arrivals(stop_id).await?;
    Ok(Json(BusArrivalsResponse {
        stop_id: stop_id.to_string(),
        arrivals: arrivals.as_ref().clone(),
    }))
}

/// Arrivals at every configured bus stop.
async fn bus_stops(State(state): State<AppState>) -> Json<Vec<StopArrivals>> {
    Json(state.engine.bus_stops().await)
}

async fn dlr_departures(State(state): State<AppState>) -> Result<Json<StopDepartures>, AppError> {
    match state.engine.dlr_departures().await? {
        Some(view) => Ok(Json(view)),
        None => Err(AppError::NotFound {
            message: "DLR view is disabled".to_string(),
        }),
    }
}

fn parse_station(raw: &str) -> Result<Crs, AppError> {
    Crs::parse_normalized(raw).map_err(|e| AppError::BadRequest {
        message: format!("Invalid station code {raw:?}: {e}"),
    })
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest { message: String },
    NotFound { message: String },
    /// Monitored, but no servable data.
    Unavailable { message: String },
    /// A TfL call failed.
    Upstream { message: String },
    Internal { message: String },
}

impl From<ViewError> for AppError {
    fn from(e: ViewError) -> Self {
        let message = e.to_string();
        match e {
            ViewError::UnknownStation(_) | ViewError::NotMonitored { .. } => {
                AppError::NotFound { message }
            }
            ViewError::Unavailable { .. } => AppError::Unavailable { message },
            ViewError::Projection(_) => AppError::Internal { message },
        }
    }
}

impl From<SourceError> for AppError {
    fn from(e: SourceError) -> Self {
        AppError::Upstream {
            message: e.to_string(),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest { message }
            | AppError::NotFound { message }
            | AppError::Unavailable { message }
            | AppError::Upstream { message }
            | AppError::Internal { message } => message,
        };

        if status.is_server_error() {
            warn!(%status, error = %message, "request failed");
        } else {
            debug!(%status, error = %message, "request rejected");
        }

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
