mod stationary;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::tracking::{AccuracyTier, LocationProvider};

pub use stationary::StationarySource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("location permission not granted")]
    PermissionDenied,
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("position source unavailable: {0}")]
    Unavailable(String),
}

/// A raw fix as reported by the positioning subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub altitude_m: Option<f64>,
    pub course_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub provider: LocationProvider,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, provider: LocationProvider) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            altitude_m: None,
            course_deg: None,
            speed_mps: None,
            timestamp: Utc::now(),
            provider,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub accuracy: AccuracyTier,
    pub interval: Duration,
    pub fastest_interval: Duration,
}

/// The positioning subsystem.
///
/// At most one update subscription is live at a time: `request_updates`
/// replaces any earlier one and `remove_updates` ends it. Fixes arrive on the
/// returned channel until the subscription is removed or replaced.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Whether location services are switched on for the device.
    fn location_enabled(&self) -> bool;

    /// Whether the process currently holds the location grant.
    fn permission_granted(&self) -> bool;

    async fn connect(&self) -> Result<(), SourceError>;

    fn request_updates(&self, request: UpdateRequest) -> Result<mpsc::Receiver<Fix>, SourceError>;

    fn remove_updates(&self);

    /// Most recent fix known to the subsystem, if any.
    async fn last_location(&self) -> Result<Option<Fix>, SourceError>;
}
