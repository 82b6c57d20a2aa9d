//! HTTP request handlers
//!
//! Start-path failures (locator, pipeline spawn) surface here as error
//! responses; anything that goes wrong after a session is streaming arrives
//! on the transport's event plane instead.

use crate::api::server::AppContext;
use crate::error::Error;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info};
use weir_common::api::{
    HealthResponse, PlayRequest, SessionListResponse, SessionResponse, SessionStatusResponse,
};
use weir_common::OutputProfile;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    status: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: Error) -> HandlerError {
    let code = match &e {
        Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
        Error::UnsupportedSource(_) | Error::InvalidState(_) => StatusCode::BAD_REQUEST,
        Error::ExtractionFailed(_) => StatusCode::BAD_GATEWAY,
        Error::ExtractionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(ErrorResponse {
            status: format!("error: {}", e),
        }),
    )
}

fn bad_request(message: String) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            status: format!("error: {}", message),
        }),
    )
}

/// GET /health - liveness probe
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "weir-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /session/:id/play - start or restart a session
pub async fn play(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<PlayRequest>,
) -> Result<Json<SessionResponse>, HandlerError> {
    let profile: OutputProfile = req.format.parse().map_err(bad_request)?;
    let offset = req.offset_secs.unwrap_or(0.0);
    if !(0.0..=86_400.0).contains(&offset) {
        return Err(bad_request(format!("offset out of range: {}", offset)));
    }

    info!(session = %id, url = %req.url, %profile, "play request");

    match ctx.manager.start(&id, &req.url, profile, offset).await {
        Ok(()) => Ok(Json(SessionResponse {
            status: "streaming".to_string(),
            session_id: id,
        })),
        Err(e) => {
            error!(session = %id, "play failed: {}", e);
            Err(error_response(e))
        }
    }
}

/// POST /session/:id/stop
pub async fn stop(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, HandlerError> {
    ctx.manager.stop(&id).await.map_err(error_response)?;
    Ok(Json(SessionResponse {
        status: "stopped".to_string(),
        session_id: id,
    }))
}

/// POST /session/:id/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, HandlerError> {
    ctx.manager.pause(&id).await.map_err(error_response)?;
    Ok(Json(SessionResponse {
        status: "paused".to_string(),
        session_id: id,
    }))
}

/// POST /session/:id/resume
pub async fn resume(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, HandlerError> {
    ctx.manager.resume(&id).await.map_err(error_response)?;
    Ok(Json(SessionResponse {
        status: "streaming".to_string(),
        session_id: id,
    }))
}

/// GET /session/:id/status
pub async fn status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>, HandlerError> {
    let snapshot = ctx.manager.status(&id).await.map_err(error_response)?;
    Ok(Json(SessionStatusResponse {
        session_id: snapshot.session_id,
        status: snapshot.state.as_str().to_string(),
        bytes_sent: snapshot.bytes_sent,
        playback_ms: snapshot.playback_ms,
    }))
}

/// GET /sessions - all live sessions
pub async fn sessions(State(ctx): State<AppContext>) -> Json<SessionListResponse> {
    let sessions = ctx
        .manager
        .list()
        .await
        .into_iter()
        .map(|s| SessionStatusResponse {
            session_id: s.session_id,
            status: s.state.as_str().to_string(),
            bytes_sent: s.bytes_sent,
            playback_ms: s.playback_ms,
        })
        .collect();
    Json(SessionListResponse { sessions })
}
