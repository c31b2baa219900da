use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::config::Permission;
use crate::tracking::{AccuracyTier, PositionSample, TrackingStatus};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ConfigUpdate {
    pub capture_interval_secs: Option<u64>,
    pub dispatch_interval_secs: Option<u64>,
    pub accuracy: Option<AccuracyTier>,
}

#[utoipa::path(
    post,
    path = "/api/tracking/start",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Tracking started", body = TrackingStatus),
        (status = 409, description = "Location disabled or permission missing", body = ErrorResponse),
        (status = 503, description = "Position source or scheduler unavailable", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn start(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<TrackingStatus>> {
    require_permission(&user, Permission::ControlTracking)?;
    log::info!("Tracking start requested by {}", user.name);

    state.controller.start_tracking().await?;
    Ok(Json(state.controller.status()))
}

#[utoipa::path(
    post,
    path = "/api/tracking/stop",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Tracking stopped", body = TrackingStatus),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn stop(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<TrackingStatus>> {
    require_permission(&user, Permission::ControlTracking)?;
    log::info!("Tracking stop requested by {}", user.name);

    state.controller.stop_tracking().await?;
    Ok(Json(state.controller.status()))
}

#[utoipa::path(
    get,
    path = "/api/tracking/status",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Tracking status", body = TrackingStatus),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<TrackingStatus>> {
    require_permission(&user, Permission::ReadStatus)?;
    Ok(Json(state.controller.status()))
}

#[utoipa::path(
    put,
    path = "/api/tracking/config",
    request_body = ConfigUpdate,
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Configuration applied", body = TrackingStatus),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn update_config(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<Json<TrackingStatus>> {
    require_permission(&user, Permission::Configure)?;

    if update.capture_interval_secs.is_none()
        && update.dispatch_interval_secs.is_none()
        && update.accuracy.is_none()
    {
        return Err(ApiError::Validation("no settings given".into()));
    }
    if update.capture_interval_secs == Some(0) || update.dispatch_interval_secs == Some(0) {
        return Err(ApiError::Validation(
            "intervals must be at least one second".into(),
        ));
    }

    let controller = &state.controller;
    if let Some(seconds) = update.capture_interval_secs {
        controller.set_capture_interval(seconds).await?;
    }
    if let Some(seconds) = update.dispatch_interval_secs {
        controller.set_dispatch_interval(seconds).await?;
    }
    if let Some(tier) = update.accuracy {
        controller.set_accuracy(tier).await?;
    }

    Ok(Json(controller.status()))
}

#[utoipa::path(
    get,
    path = "/api/location/current",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Current location", body = PositionSample),
        (status = 404, description = "No location available", body = ErrorResponse),
        (status = 409, description = "Location disabled or permission missing", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "tracking"
)]
pub async fn current_location(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<PositionSample>> {
    require_permission(&user, Permission::ReadStatus)?;
    Ok(Json(state.controller.get_current_location().await?))
}
