mod controller;
mod error;
mod restart;
mod session;
mod types;

pub use controller::{
    Capabilities, ControllerBuilder, TrackingController, TrackingOptions, TrackingStatus,
    PERMISSION_POLL_INTERVAL,
};
pub use error::TrackingError;
pub use restart::{RestartGuard, WAKEUP_DELAY};
pub use session::TrackingSession;
pub use types::{
    AccuracyTier, LocationProvider, PositionSample, TrackingState,
    DEFAULT_CAPTURE_INTERVAL_SECS, DEFAULT_DISPATCH_INTERVAL_SECS, FASTEST_CAPTURE_INTERVAL_SECS,
};
