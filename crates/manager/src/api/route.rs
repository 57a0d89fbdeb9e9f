//! Route handlers — thin translation between HTTP and the pool facade.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::pool::slot::{SessionInfo, Slot, SlotState, Viewport};
use crate::pool::BrowserPool;

use super::error::ApiError;
use super::map::{
    BrowsersResponse, DebugRequest, ExtendRequest, HealthResponse, ReserveRequest,
    ResolutionRequest, ViewportRequest, VncPasswordRequest,
};

pub async fn health(State(pool): State<BrowserPool>) -> Json<HealthResponse> {
    let summary = pool.summary().await;
    Json(HealthResponse {
        status: "ok",
        mode: pool.mode(),
        capacity: summary.capacity,
        used: summary.used,
    })
}

pub async fn list_browsers(State(pool): State<BrowserPool>) -> Json<BrowsersResponse> {
    let browsers = pool.browsers().await;
    let used = browsers
        .iter()
        .filter(|slot| matches!(slot.state, SlotState::Leased | SlotState::Expiring))
        .count();
    Json(BrowsersResponse {
        capacity: browsers.len(),
        used,
        browsers,
    })
}

pub async fn list_from_runtime(
    State(pool): State<BrowserPool>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let slots = pool.browsers_from_runtime().await?;
    Ok(Json(slots))
}

pub async fn find_by_id(
    State(pool): State<BrowserPool>,
    Path(id): Path<String>,
) -> Result<Json<Slot>, ApiError> {
    pool.find_by_id(&id)
        .await
        .map(Json)
        .ok_or(ApiError::BrowserNotFound)
}

pub async fn find_by_session(
    State(pool): State<BrowserPool>,
    Path(session_id): Path<String>,
) -> Result<Json<Slot>, ApiError> {
    pool.find_by_session(&session_id)
        .await
        .map(Json)
        .ok_or(ApiError::BrowserNotFound)
}

pub async fn reserve(
    State(pool): State<BrowserPool>,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<Slot>, ApiError> {
    let Some(slot) = pool.reserve(request.lease_minutes).await else {
        return Err(ApiError::NoCapacity);
    };
    let slot = match request.session {
        Some(session) => pool.set_internals(&slot.name, session).await?,
        None => slot,
    };
    Ok(Json(slot))
}

pub async fn release(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    pool.release(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn extend(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
    Json(request): Json<ExtendRequest>,
) -> Result<Json<Slot>, ApiError> {
    let slot = pool.extend(&name, request.lease_minutes).await?;
    Ok(Json(slot))
}

pub async fn set_internals(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
    Json(session): Json<SessionInfo>,
) -> Result<Json<Slot>, ApiError> {
    let slot = pool.set_internals(&name, session).await?;
    Ok(Json(slot))
}

pub async fn set_vnc_password(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
    Json(request): Json<VncPasswordRequest>,
) -> Result<Json<Slot>, ApiError> {
    let slot = pool.set_vnc_password(&name, request.password).await?;
    Ok(Json(slot))
}

pub async fn set_debug(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
    Json(request): Json<DebugRequest>,
) -> Result<Json<Slot>, ApiError> {
    let slot = pool.set_debug(&name, request.debug).await?;
    Ok(Json(slot))
}

pub async fn set_viewport(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
    Json(request): Json<ViewportRequest>,
) -> Result<Json<Slot>, ApiError> {
    let viewport = Viewport {
        width: request.width,
        height: request.height,
    };
    let slot = pool.set_viewport(&name, viewport).await?;
    Ok(Json(slot))
}

pub async fn set_resolution(
    State(pool): State<BrowserPool>,
    Path(name): Path<String>,
    Json(request): Json<ResolutionRequest>,
) -> Result<Json<Slot>, ApiError> {
    let slot = pool
        .reinit_with_resolution(&name, &request.resolution)
        .await?;
    Ok(Json(slot))
}

pub async fn set_default_viewport(
    State(pool): State<BrowserPool>,
    Json(request): Json<ViewportRequest>,
) -> StatusCode {
    pool.set_default_viewport(Viewport {
        width: request.width,
        height: request.height,
    })
    .await;
    StatusCode::NO_CONTENT
}
