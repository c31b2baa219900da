use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::device::{DeviceMetadata, DeviceSnapshot};
use crate::source::Fix;

pub const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 6 * 60 * 60;
/// Lower bound handed to the position source as the fastest acceptable rate.
pub const FASTEST_CAPTURE_INTERVAL_SECS: u64 = 60;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    #[default]
    High,
    Balanced,
    Low,
    NoPower,
}

impl AccuracyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyTier::High => "high",
            AccuracyTier::Balanced => "balanced",
            AccuracyTier::Low => "low",
            AccuracyTier::NoPower => "no_power",
        }
    }
}

impl std::fmt::Display for AccuracyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LocationProvider {
    Gps,
    Network,
    Passive,
    Fused,
}

impl LocationProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationProvider::Gps => "gps",
            LocationProvider::Network => "network",
            LocationProvider::Passive => "passive",
            LocationProvider::Fused => "fused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Stopped,
    AwaitingPermission,
    Connecting,
    Tracking,
}

/// A captured position together with the identifiers and device metadata
/// that were current when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub provider: LocationProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertising_id: Option<String>,
    #[serde(default)]
    pub limited_ad_tracking: bool,
    #[serde(default)]
    pub device: DeviceMetadata,
}

impl PositionSample {
    pub fn from_fix(fix: Fix, snapshot: &DeviceSnapshot) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            horizontal_accuracy_m: fix.accuracy_m,
            altitude_m: fix.altitude_m,
            course_deg: fix.course_deg,
            speed_mps: fix.speed_mps,
            timestamp: fix.timestamp,
            provider: fix.provider,
            advertising_id: snapshot.advertising_id.clone(),
            limited_ad_tracking: snapshot.limited_ad_tracking,
            device: snapshot.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tags() {
        assert_eq!(LocationProvider::Gps.as_str(), "gps");
        assert_eq!(LocationProvider::Network.as_str(), "network");
        assert_eq!(LocationProvider::Passive.as_str(), "passive");
        assert_eq!(
            serde_json::to_string(&LocationProvider::Passive).unwrap(),
            "\"passive\""
        );
    }

    #[test]
    fn accuracy_parses_snake_case() {
        let tier: AccuracyTier = serde_yaml::from_str("no_power").unwrap();
        assert_eq!(tier, AccuracyTier::NoPower);
        assert_eq!(AccuracyTier::default(), AccuracyTier::High);
    }

    #[test]
    fn sample_carries_snapshot() {
        let snapshot = DeviceSnapshot {
            advertising_id: Some("ad-1".into()),
            limited_ad_tracking: true,
            metadata: DeviceMetadata {
                device_model: Some("pixel".into()),
                ..Default::default()
            },
        };
        let fix = Fix::new(52.0, 4.0, 12.5, LocationProvider::Gps);
        let sample = PositionSample::from_fix(fix, &snapshot);

        assert_eq!(sample.advertising_id.as_deref(), Some("ad-1"));
        assert!(sample.limited_ad_tracking);
        assert_eq!(sample.device.device_model.as_deref(), Some("pixel"));
        assert_eq!(sample.horizontal_accuracy_m, 12.5);
    }
}
