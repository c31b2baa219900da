pub mod bus;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod source;
pub mod state;
pub mod store;
pub mod tracking;
pub mod web;

pub use bus::{ConfigEvent, ConfigurationBus, EventKind, Subscription};
pub use dispatch::{DispatchScheduler, Dispatcher, EndpointDescriptor, SchedulerJob};
pub use source::{Fix, PositionSource, SourceError};
pub use state::{PersistedState, StateStore};
pub use store::{LocationStore, MemoryStore};
pub use tracking::{
    AccuracyTier, PositionSample, RestartGuard, TrackingController, TrackingError, TrackingState,
    TrackingStatus,
};
