use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use super::types::{AccuracyTier, FASTEST_CAPTURE_INTERVAL_SECS};
use crate::device::DeviceSnapshot;
use crate::dispatch::EndpointDescriptor;
use crate::source::UpdateRequest;
use crate::state::PersistedState;

/// Parameters of the capture currently running. Exists only while the
/// controller is tracking.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrackingSession {
    pub accuracy: AccuracyTier,
    pub capture_interval_secs: u64,
    pub dispatch_interval_secs: u64,
    pub endpoints: Vec<EndpointDescriptor>,
    #[serde(skip)]
    pub device: DeviceSnapshot,
}

impl TrackingSession {
    pub fn from_state(state: &PersistedState, device: DeviceSnapshot) -> Self {
        Self {
            accuracy: state.accuracy,
            capture_interval_secs: state.capture_interval_secs,
            dispatch_interval_secs: state.dispatch_interval_secs,
            endpoints: state.endpoints.clone(),
            device,
        }
    }

    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            accuracy: self.accuracy,
            interval: Duration::from_secs(self.capture_interval_secs),
            fastest_interval: Duration::from_secs(
                FASTEST_CAPTURE_INTERVAL_SECS.min(self.capture_interval_secs),
            ),
        }
    }

    pub(crate) fn capture_differs(&self, state: &PersistedState) -> bool {
        self.accuracy != state.accuracy || self.capture_interval_secs != state.capture_interval_secs
    }

    pub(crate) fn dispatch_differs(&self, state: &PersistedState) -> bool {
        self.dispatch_interval_secs != state.dispatch_interval_secs
            || self.endpoints != state.endpoints
    }
}
