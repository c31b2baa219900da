use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use super::api::error::ErrorResponse;
use super::api::tracking::ConfigUpdate;

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::tracking::start,
        super::api::tracking::stop,
        super::api::tracking::status,
        super::api::tracking::update_config,
        super::api::tracking::current_location,
        super::api::dispatch::list_jobs,
        super::api::dispatch::run_now,
    ),
    components(
        schemas(
            ConfigUpdate,
            ErrorResponse,
            crate::tracking::TrackingStatus,
            crate::tracking::TrackingState,
            crate::tracking::TrackingSession,
            crate::tracking::AccuracyTier,
            crate::tracking::PositionSample,
            crate::dispatch::SchedulerJob,
            crate::dispatch::FireReport,
            crate::dispatch::EndpointDescriptor,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Locatrack Control API",
        description = "API for controlling location tracking and dispatch",
        version = "0.1.0"
    ),
    tags(
        (name = "tracking", description = "Tracking lifecycle and settings"),
        (name = "dispatch", description = "Dispatch jobs")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
