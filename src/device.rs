//! Device and network metadata attached to every captured sample.
//!
//! Collecting the values is up to the host; this module only carries them
//! and applies the per-field collection switches.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_charging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_bssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_context: Option<String>,
}

/// Fields the host is allowed to attach. Everything is collected unless
/// switched off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    pub without_wifi: bool,
    pub without_device_model: bool,
    pub without_device_manufacturer: bool,
    pub without_operating_system: bool,
    pub without_charging_info: bool,
    pub without_carrier_name: bool,
    pub without_connection_type: bool,
    pub without_location_method: bool,
    pub without_location_context: bool,
}

impl CollectionOptions {
    pub fn apply(&self, mut metadata: DeviceMetadata) -> DeviceMetadata {
        if self.without_wifi {
            metadata.wifi_ssid = None;
            metadata.wifi_bssid = None;
        }
        if self.without_device_model {
            metadata.device_model = None;
        }
        if self.without_device_manufacturer {
            metadata.device_manufacturer = None;
        }
        if self.without_operating_system {
            metadata.operating_system = None;
        }
        if self.without_charging_info {
            metadata.is_charging = None;
        }
        if self.without_carrier_name {
            metadata.carrier_name = None;
        }
        if self.without_connection_type {
            metadata.connection_type = None;
        }
        if self.without_location_method {
            metadata.location_method = None;
        }
        if self.without_location_context {
            metadata.location_context = None;
        }
        metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub advertising_id: Option<String>,
    pub limited_ad_tracking: bool,
    pub metadata: DeviceMetadata,
}

pub trait DeviceInfo: Send + Sync {
    fn snapshot(&self) -> DeviceSnapshot;
}

/// Serves the same snapshot every time.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceInfo {
    snapshot: DeviceSnapshot,
}

impl StaticDeviceInfo {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_config(config: &crate::config::DeviceConfig) -> Self {
        let metadata = DeviceMetadata {
            device_model: config.model.clone(),
            device_manufacturer: config.manufacturer.clone(),
            operating_system: Some(
                config
                    .operating_system
                    .clone()
                    .unwrap_or_else(|| std::env::consts::OS.to_string()),
            ),
            connection_type: config.connection_type.clone(),
            carrier_name: config.carrier_name.clone(),
            ..Default::default()
        };

        Self {
            snapshot: DeviceSnapshot {
                advertising_id: config.advertising_id.clone(),
                limited_ad_tracking: config.limited_ad_tracking,
                metadata: config.collection.apply(metadata),
            },
        }
    }
}

impl DeviceInfo for StaticDeviceInfo {
    fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> DeviceMetadata {
        DeviceMetadata {
            device_model: Some("m".into()),
            device_manufacturer: Some("acme".into()),
            operating_system: Some("linux".into()),
            is_charging: Some(true),
            carrier_name: Some("carrier".into()),
            connection_type: Some("wifi".into()),
            wifi_ssid: Some("home".into()),
            wifi_bssid: Some("aa:bb".into()),
            location_method: Some("gps".into()),
            location_context: Some("regular".into()),
        }
    }

    #[test]
    fn default_options_keep_everything() {
        assert_eq!(CollectionOptions::default().apply(full()), full());
    }

    #[test]
    fn switches_strip_fields() {
        let options = CollectionOptions {
            without_wifi: true,
            without_charging_info: true,
            ..Default::default()
        };
        let filtered = options.apply(full());

        assert!(filtered.wifi_ssid.is_none());
        assert!(filtered.wifi_bssid.is_none());
        assert!(filtered.is_charging.is_none());
        assert_eq!(filtered.device_model.as_deref(), Some("m"));
    }
}
