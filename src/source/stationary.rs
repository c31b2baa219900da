use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{Fix, PositionSource, SourceError, UpdateRequest};
use crate::tracking::LocationProvider;

const CHANNEL_CAPACITY: usize = 64;

/// Reports a fixed coordinate, for hosts without a positioning subsystem
/// (base stations, gateways, bench setups).
pub struct StationarySource {
    latitude_deg: f64,
    longitude_deg: f64,
    altitude_m: Option<f64>,
    accuracy_m: f64,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl StationarySource {
    pub fn new(latitude_deg: f64, longitude_deg: f64, accuracy_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m: None,
            accuracy_m,
            worker: StdMutex::new(None),
        }
    }

    /// Parses `"lat, lon"`.
    pub fn from_coordinates(
        coordinates: &str,
        altitude_m: Option<f64>,
        accuracy_m: f64,
    ) -> Option<Self> {
        let parts: Vec<_> = coordinates.split(',').map(|s| s.trim()).collect();
        if parts.len() < 2 {
            return None;
        }
        let lat: f64 = parts[0].parse().ok()?;
        let lon: f64 = parts[1].parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        let mut source = Self::new(lat, lon, accuracy_m);
        source.altitude_m = altitude_m;
        Some(source)
    }

    fn fix(&self) -> Fix {
        Fix {
            latitude: self.latitude_deg,
            longitude: self.longitude_deg,
            accuracy_m: self.accuracy_m,
            altitude_m: self.altitude_m,
            course_deg: None,
            speed_mps: Some(0.0),
            timestamp: Utc::now(),
            provider: LocationProvider::Passive,
        }
    }
}

#[async_trait]
impl PositionSource for StationarySource {
    fn location_enabled(&self) -> bool {
        true
    }

    fn permission_granted(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn request_updates(&self, request: UpdateRequest) -> Result<mpsc::Receiver<Fix>, SourceError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let template = self.fix();
        let period = request.interval.max(request.fastest_interval);

        let join = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut fix = template.clone();
                fix.timestamp = Utc::now();
                if tx.send(fix).await.is_err() {
                    return;
                }
            }
        });

        if let Some(previous) = self.worker.lock().unwrap().replace(join) {
            previous.abort();
        }
        log::debug!(
            "stationary source emitting every {:?} ({})",
            period,
            request.accuracy
        );
        Ok(rx)
    }

    fn remove_updates(&self) {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.abort();
        }
    }

    async fn last_location(&self) -> Result<Option<Fix>, SourceError> {
        Ok(Some(self.fix()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::AccuracyTier;
    use std::time::Duration;

    #[test]
    fn parses_coordinates() {
        let source = StationarySource::from_coordinates("52.37, 4.89", Some(2.0), 10.0).unwrap();
        let fix = source.fix();
        assert_eq!(fix.latitude, 52.37);
        assert_eq!(fix.longitude, 4.89);
        assert_eq!(fix.altitude_m, Some(2.0));

        assert!(StationarySource::from_coordinates("52.37", None, 10.0).is_none());
        assert!(StationarySource::from_coordinates("91.0, 0.0", None, 10.0).is_none());
        assert!(StationarySource::from_coordinates("north, east", None, 10.0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_at_requested_interval() {
        let source = StationarySource::new(1.0, 2.0, 5.0);
        let mut rx = source
            .request_updates(UpdateRequest {
                accuracy: AccuracyTier::High,
                interval: Duration::from_secs(30),
                fastest_interval: Duration::from_secs(10),
            })
            .unwrap();

        let fix = rx.recv().await.unwrap();
        assert_eq!(fix.latitude, 1.0);

        source.remove_updates();
        assert!(rx.recv().await.is_none());
    }
}
