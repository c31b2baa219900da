mod endpoint;
mod error;
mod http;
mod job_table;
mod scheduler;

use async_trait::async_trait;

use crate::tracking::PositionSample;

pub use endpoint::{
    endpoints_from_json, endpoints_to_json, EndpointBuilder, EndpointDescriptor, Header,
};
pub use error::DispatchError;
pub use http::HttpDispatcher;
pub use job_table::JobTable;
pub use scheduler::{DispatchScheduler, FireReport, SchedulerJob, DISPATCH_TAG};

/// Uploads one batch to one endpoint.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn upload(
        &self,
        endpoint: &EndpointDescriptor,
        batch: &[PositionSample],
    ) -> Result<(), DispatchError>;
}
