use thiserror::Error;

use crate::source::SourceError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("location is switched off in the settings, enable it before continuing")]
    LocationDisabled,
    #[error("location permission is denied")]
    LocationPermission,
    #[error("could not connect to the position source: {0}")]
    ConnectionFailure(String),
    #[error("dispatch could not be scheduled: {0}")]
    DispatchScheduling(String),
    #[error("location cannot be fetched right now")]
    NoLocation,
    #[error("position source error: {0}")]
    Source(String),
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl From<SourceError> for TrackingError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::PermissionDenied => TrackingError::LocationPermission,
            SourceError::ConnectionRefused(msg) => TrackingError::ConnectionFailure(msg),
            SourceError::Unavailable(msg) => TrackingError::Source(msg),
        }
    }
}
