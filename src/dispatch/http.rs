use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{DispatchError, Dispatcher, EndpointDescriptor};
use crate::tracking::PositionSample;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct UploadBody<'a> {
    locations: &'a [PositionSample],
}

/// POSTs `{"locations": [...]}` to the endpoint URL with its headers.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .user_agent(concat!("locatrack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn upload(
        &self,
        endpoint: &EndpointDescriptor,
        batch: &[PositionSample],
    ) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .post(endpoint.url())
            .json(&UploadBody { locations: batch });
        for header in endpoint.headers() {
            request = request.header(header.key.as_str(), header.value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                url: endpoint.url().to_string(),
                status: status.as_u16(),
            });
        }

        log::debug!("Uploaded {} samples to {}", batch.len(), endpoint.url());
        Ok(())
    }
}
