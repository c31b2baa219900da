use axum::{extract::State, Json};

use crate::config::Permission;
use crate::dispatch::{FireReport, SchedulerJob, DISPATCH_TAG};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};

#[utoipa::path(
    get,
    path = "/api/dispatch/jobs",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Installed dispatch jobs", body = Vec<SchedulerJob>),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "dispatch"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<Vec<SchedulerJob>>> {
    require_permission(&user, Permission::ReadStatus)?;
    Ok(Json(state.controller.scheduler().jobs()))
}

/// Runs the dispatch job immediately instead of waiting for its period.
#[utoipa::path(
    post,
    path = "/api/dispatch/run",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Dispatch executed", body = FireReport),
        (status = 404, description = "No dispatch job installed", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "dispatch"
)]
pub async fn run_now(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<FireReport>> {
    require_permission(&user, Permission::ControlTracking)?;

    let report = state
        .controller
        .scheduler()
        .fire(DISPATCH_TAG)
        .await
        .ok_or(ApiError::NotFound("no_dispatch_job"))?;
    Ok(Json(report))
}
