#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use locatrack::device::{DeviceSnapshot, StaticDeviceInfo};
use locatrack::dispatch::{
    DispatchError, DispatchScheduler, Dispatcher, EndpointDescriptor, JobTable,
};
use locatrack::source::{Fix, PositionSource, SourceError, UpdateRequest};
use locatrack::store::{LocationStore, MemoryStore};
use locatrack::tracking::{Capabilities, LocationProvider, PositionSample, TrackingController};
use locatrack::{PersistedState, StateStore};

/// Scripted position source. Every switch starts in the permissive position.
pub struct MockSource {
    pub location_on: AtomicBool,
    pub permission: AtomicBool,
    pub refuse_connect: AtomicBool,
    pub connects: AtomicUsize,
    pub removals: AtomicUsize,
    pub requests: Mutex<Vec<UpdateRequest>>,
    pub last: Mutex<Option<Fix>>,
    sender: Mutex<Option<mpsc::Sender<Fix>>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            location_on: AtomicBool::new(true),
            permission: AtomicBool::new(true),
            refuse_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            last: Mutex::new(None),
            sender: Mutex::new(None),
            connect_gate: Mutex::new(None),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    /// Makes the next connects wait until the returned gate is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn set_location_on(&self, on: bool) {
        self.location_on.store(on, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<UpdateRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Sender of the live subscription, if any.
    pub fn sender(&self) -> Option<mpsc::Sender<Fix>> {
        self.sender.lock().unwrap().clone()
    }

    pub async fn push(&self, latitude: f64) -> bool {
        match self.sender() {
            Some(tx) => tx.send(fix(latitude)).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PositionSource for MockSource {
    fn location_enabled(&self) -> bool {
        self.location_on.load(Ordering::SeqCst)
    }

    fn permission_granted(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.connect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(SourceError::ConnectionRefused("scripted refusal".into()));
        }
        Ok(())
    }

    fn request_updates(&self, request: UpdateRequest) -> Result<mpsc::Receiver<Fix>, SourceError> {
        if !self.permission_granted() {
            return Err(SourceError::PermissionDenied);
        }
        let (tx, rx) = mpsc::channel(16);
        self.requests.lock().unwrap().push(request);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn remove_updates(&self) {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }

    async fn last_location(&self) -> Result<Option<Fix>, SourceError> {
        if !self.permission_granted() {
            return Err(SourceError::PermissionDenied);
        }
        Ok(self.last.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub uploads: Mutex<Vec<(String, usize)>>,
}

impl RecordingDispatcher {
    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn upload(
        &self,
        endpoint: &EndpointDescriptor,
        batch: &[PositionSample],
    ) -> Result<(), DispatchError> {
        self.uploads
            .lock()
            .unwrap()
            .push((endpoint.url().to_string(), batch.len()));
        Ok(())
    }
}

pub struct Harness {
    pub source: Arc<MockSource>,
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub state: Arc<StateStore>,
    pub scheduler: Arc<DispatchScheduler>,
    pub controller: Arc<TrackingController>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_state(PersistedState::default())
    }

    pub fn with_state(persisted: PersistedState) -> Self {
        let source = MockSource::new();
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let state = Arc::new(StateStore::in_memory(persisted));
        let scheduler = Arc::new(DispatchScheduler::new(
            store.clone(),
            dispatcher.clone(),
            JobTable::in_memory(),
        ));

        let capabilities = Capabilities {
            source: source.clone(),
            store: store.clone(),
            device: Arc::new(StaticDeviceInfo::new(DeviceSnapshot {
                advertising_id: Some("ad-1".into()),
                ..Default::default()
            })),
        };
        let controller =
            TrackingController::builder(capabilities, scheduler.clone(), state.clone()).build();

        Self {
            source,
            store,
            dispatcher,
            state,
            scheduler,
            controller,
        }
    }

    pub fn buffered(&self) -> usize {
        self.store.len().unwrap()
    }
}

pub fn endpoints(urls: &[&str]) -> Vec<EndpointDescriptor> {
    urls.iter().map(|u| EndpointDescriptor::new(*u)).collect()
}

pub fn fix(latitude: f64) -> Fix {
    Fix::new(latitude, 4.89, 10.0, LocationProvider::Gps)
}

/// Lets spawned tasks run. Tests use a paused clock, so this returns as soon
/// as every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
