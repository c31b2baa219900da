use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch job rejected: {0}")]
    Scheduling(String),
    #[error("job table error: {0}")]
    JobTable(#[from] std::io::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("location store error: {0}")]
    Store(#[from] StoreError),
    #[error("upload failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },
}
