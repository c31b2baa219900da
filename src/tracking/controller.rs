//! Lifecycle state machine for continuous capture.
//!
//! Transitions and session changes happen while holding `inner`. The fix
//! pump and the dispatch jobs run on their own tasks and only meet the
//! controller at the location store. Every capture subscription is tagged
//! with a generation number; fixes from an older generation, or arriving
//! after tracking was disabled, are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use utoipa::ToSchema;

use super::error::TrackingError;
use super::session::TrackingSession;
use super::types::{AccuracyTier, PositionSample, TrackingState};
use crate::bus::{ConfigEvent, ConfigurationBus, EventKind, Subscription};
use crate::device::{DeviceInfo, DeviceSnapshot};
use crate::dispatch::{DispatchError, DispatchScheduler, EndpointDescriptor};
use crate::source::{Fix, PositionSource, SourceError};
use crate::state::StateStore;
use crate::store::LocationStore;

pub const PERMISSION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The external capabilities the controller drives.
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn PositionSource>,
    pub store: Arc<dyn LocationStore>,
    pub device: Arc<dyn DeviceInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingOptions {
    pub endpoints: Vec<EndpointDescriptor>,
    pub capture_interval_secs: Option<u64>,
    pub dispatch_interval_secs: Option<u64>,
    pub accuracy: Option<AccuracyTier>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackingStatus {
    pub state: TrackingState,
    pub tracking_enabled: bool,
    pub service_running: bool,
    pub session: Option<TrackingSession>,
    pub samples_captured: u64,
    pub last_sample: Option<PositionSample>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Start,
    Resume,
    PermissionGranted,
    Reconfigure,
    Wakeup,
}

impl Trigger {
    fn polls_for_permission(self) -> bool {
        !matches!(self, Trigger::Wakeup)
    }
}

/// Work for the reconcile task, handled in arrival order.
#[derive(Debug)]
enum Reconcile {
    Event(EventKind),
    /// Acknowledged once every earlier event has been reconciled.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug)]
struct Shared {
    state: TrackingState,
    session: Option<TrackingSession>,
    samples_captured: u64,
    last_sample: Option<PositionSample>,
    last_error: Option<String>,
}

#[derive(Debug)]
struct CaptureWorker {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Inner {
    capture: Option<CaptureWorker>,
    permission_poll: Option<JoinHandle<()>>,
}

pub struct ControllerBuilder {
    capabilities: Capabilities,
    scheduler: Arc<DispatchScheduler>,
    state: Arc<StateStore>,
    bus: ConfigurationBus,
    permission_poll_interval: Duration,
}

impl ControllerBuilder {
    pub fn bus(mut self, bus: ConfigurationBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn permission_poll_interval(mut self, interval: Duration) -> Self {
        self.permission_poll_interval = interval;
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<TrackingController> {
        let (reconcile_tx, reconcile_rx) = mpsc::unbounded_channel();
        let controller = Arc::new_cyclic(|this| TrackingController {
            this: this.clone(),
            capabilities: self.capabilities,
            scheduler: self.scheduler,
            state: self.state,
            bus: self.bus,
            permission_poll_interval: self.permission_poll_interval,
            inner: Mutex::new(Inner::default()),
            shared: Arc::new(StdMutex::new(Shared {
                state: TrackingState::Stopped,
                session: None,
                samples_captured: 0,
                last_sample: None,
                last_error: None,
            })),
            generation: Arc::new(AtomicU64::new(0)),
            reconcile_tx,
            subscription: StdMutex::new(None),
        });
        controller.subscribe(reconcile_rx);
        controller
    }
}

pub struct TrackingController {
    this: Weak<TrackingController>,
    capabilities: Capabilities,
    scheduler: Arc<DispatchScheduler>,
    state: Arc<StateStore>,
    bus: ConfigurationBus,
    permission_poll_interval: Duration,
    inner: Mutex<Inner>,
    shared: Arc<StdMutex<Shared>>,
    generation: Arc<AtomicU64>,
    reconcile_tx: mpsc::UnboundedSender<Reconcile>,
    subscription: StdMutex<Option<Subscription>>,
}

impl TrackingController {
    pub fn builder(
        capabilities: Capabilities,
        scheduler: Arc<DispatchScheduler>,
        state: Arc<StateStore>,
    ) -> ControllerBuilder {
        ControllerBuilder {
            capabilities,
            scheduler,
            state,
            bus: ConfigurationBus::new(),
            permission_poll_interval: PERMISSION_POLL_INTERVAL,
        }
    }

    pub fn bus(&self) -> &ConfigurationBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<DispatchScheduler> {
        &self.scheduler
    }

    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Records the endpoint list, then resumes tracking if it was left
    /// enabled by an earlier run.
    ///
    /// Intervals and accuracy in `options` only seed a fresh record. Once
    /// seeded, values changed at runtime through the `set_*` calls survive
    /// relaunches.
    pub async fn initialize(&self, options: TrackingOptions) -> Result<(), TrackingError> {
        if options.endpoints.is_empty() {
            log::error!("Invalid configuration: no endpoints configured");
            return Err(TrackingError::InvalidConfiguration(
                "no endpoints configured".into(),
            ));
        }
        for seconds in [options.capture_interval_secs, options.dispatch_interval_secs]
            .into_iter()
            .flatten()
        {
            validate_interval(seconds)?;
        }

        let persisted = self.state.update(|s| {
            s.endpoints = options.endpoints;
            if s.seeded {
                return;
            }
            s.seeded = true;
            if let Some(seconds) = options.capture_interval_secs {
                s.capture_interval_secs = seconds;
            }
            if let Some(seconds) = options.dispatch_interval_secs {
                s.dispatch_interval_secs = seconds;
            }
            if let Some(tier) = options.accuracy {
                s.accuracy = tier;
            }
        })?;

        if !persisted.tracking_enabled {
            return Ok(());
        }
        let source = &self.capabilities.source;
        if !source.permission_granted() || !source.location_enabled() {
            log::info!("Tracking was left enabled but location is unavailable, waiting for start");
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        if let Err(e) = self.connect_and_track(&mut inner, Trigger::Resume).await {
            log::warn!("Could not resume tracking: {}", e);
            self.record_error(&e);
        }
        Ok(())
    }

    pub async fn start_tracking(&self) -> Result<(), TrackingError> {
        let source = self.capabilities.source.clone();
        if !source.location_enabled() {
            log::error!("Location is switched off, tracking not started");
            return Err(TrackingError::LocationDisabled);
        }
        self.state.update(|s| s.tracking_enabled = true)?;

        let mut inner = self.inner.lock().await;
        if self.state() == TrackingState::Tracking {
            log::debug!("Already tracking");
            return Ok(());
        }
        if !source.permission_granted() {
            log::warn!(
                "Location permission has not been granted, checking every {:?}",
                self.permission_poll_interval
            );
            self.await_permission(&mut inner);
            return Err(TrackingError::LocationPermission);
        }

        self.connect_and_track(&mut inner, Trigger::Start).await
    }

    /// Disables tracking. The persisted flag is cleared before anything
    /// else, so fixes still in flight are discarded.
    pub async fn stop_tracking(&self) -> Result<(), TrackingError> {
        let disabled = self.state.update(|s| s.tracking_enabled = false);
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        if let Some(poll) = inner.permission_poll.take() {
            poll.abort();
        }
        self.stop_capture(&mut inner).await;
        self.scheduler.disarm();
        self.set_session(None);
        self.set_state(TrackingState::Stopped);
        let stopped = self.state.update(|s| s.service_running = false);
        log::info!("Tracking stopped");

        disabled?;
        stopped?;
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.state.tracking_enabled()
    }

    pub fn state(&self) -> TrackingState {
        self.shared.lock().unwrap().state
    }

    pub fn status(&self) -> TrackingStatus {
        let persisted = self.state.snapshot();
        let shared = self.shared.lock().unwrap();
        TrackingStatus {
            state: shared.state,
            tracking_enabled: persisted.tracking_enabled,
            service_running: persisted.service_running,
            session: shared.session.clone(),
            samples_captured: shared.samples_captured,
            last_sample: shared.last_sample.clone(),
            last_error: shared.last_error.clone(),
        }
    }

    pub async fn set_capture_interval(&self, seconds: u64) -> Result<(), TrackingError> {
        validate_interval(seconds)?;
        self.publish(ConfigEvent::IntervalChanged { seconds }).await;
        Ok(())
    }

    pub async fn set_dispatch_interval(&self, seconds: u64) -> Result<(), TrackingError> {
        validate_interval(seconds)?;
        self.publish(ConfigEvent::DispatchIntervalChanged { seconds })
            .await;
        Ok(())
    }

    pub async fn set_accuracy(&self, tier: AccuracyTier) -> Result<(), TrackingError> {
        self.publish(ConfigEvent::AccuracyChanged { tier }).await;
        Ok(())
    }

    /// One-shot fetch, independent of whether tracking is running.
    pub async fn get_current_location(&self) -> Result<PositionSample, TrackingError> {
        let source = &self.capabilities.source;
        if !source.location_enabled() {
            log::error!("Location is switched off, cannot fetch the current location");
            return Err(TrackingError::LocationDisabled);
        }

        match source.last_location().await? {
            Some(fix) => Ok(PositionSample::from_fix(
                fix,
                &self.capabilities.device.snapshot(),
            )),
            None => Err(TrackingError::NoLocation),
        }
    }

    /// Self-heal entry used by the restart guard. Reconnects from scratch if
    /// tracking is still enabled; failures are logged and left for the next
    /// wake-up or explicit start.
    pub async fn wake(&self) {
        if !self.state.tracking_enabled() {
            log::debug!("Wake-up ignored, tracking is disabled");
            return;
        }

        let mut inner = self.inner.lock().await;
        if !self.state.tracking_enabled() {
            return;
        }

        let source = &self.capabilities.source;
        if !source.location_enabled() || !source.permission_granted() {
            log::info!("Wake-up: location unavailable, giving up until the next wake-up");
            self.stop_capture(&mut inner).await;
            self.scheduler.disarm();
            self.set_session(None);
            self.set_state(TrackingState::Stopped);
            return;
        }

        if let Err(e) = self.connect_and_track(&mut inner, Trigger::Wakeup).await {
            log::warn!("Wake-up could not resume tracking: {}", e);
            self.record_error(&e);
        }
    }

    /// Publishes `event` and returns once the controller's own subscriber
    /// has reconciled it.
    async fn publish(&self, event: ConfigEvent) {
        self.bus.publish(event);
        let (done_tx, done_rx) = oneshot::channel();
        if self.reconcile_tx.send(Reconcile::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn subscribe(&self, mut rx: mpsc::UnboundedReceiver<Reconcile>) {
        let tx = self.reconcile_tx.clone();
        let state = self.state.clone();
        let subscription = self.bus.subscribe(&EventKind::ALL, move |event| {
            stage_event(&state, event);
            let _ = tx.send(Reconcile::Event(event.kind()));
        });
        *self.subscription.lock().unwrap() = Some(subscription);

        let this = self.this.clone();
        tokio::spawn(async move {
            while let Some(work) = rx.recv().await {
                match work {
                    Reconcile::Event(kind) => {
                        let Some(controller) = this.upgrade() else {
                            break;
                        };
                        controller.reconcile(kind).await;
                    }
                    Reconcile::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
    }

    /// Brings a running session in line with the staged settings. Values
    /// staged while not tracking are picked up by the next start instead.
    async fn reconcile(&self, kind: EventKind) {
        let mut inner = self.inner.lock().await;
        if self.state() != TrackingState::Tracking {
            log::debug!("{:?} staged until tracking starts", kind);
            return;
        }
        let Some(mut session) = self.shared.lock().unwrap().session.clone() else {
            return;
        };
        let persisted = self.state.snapshot();

        if session.capture_differs(&persisted) {
            session.accuracy = persisted.accuracy;
            session.capture_interval_secs = persisted.capture_interval_secs;
            log::info!(
                "Resetting location request: every {}s at {} accuracy",
                session.capture_interval_secs,
                session.accuracy
            );

            self.stop_capture(&mut inner).await;
            if let Err(e) = self.start_capture(&mut inner, &session) {
                let err = self.capture_refused(&mut inner, e, Trigger::Reconfigure);
                self.scheduler.disarm();
                self.set_session(None);
                self.record_error(&err);
                return;
            }
        }

        if session.dispatch_differs(&persisted) {
            session.dispatch_interval_secs = persisted.dispatch_interval_secs;
            session.endpoints = persisted.endpoints.clone();
            match self.scheduler.arm(&session) {
                Ok(_) => log::info!(
                    "Dispatch rescheduled every {}s",
                    session.dispatch_interval_secs
                ),
                Err(e) => {
                    let err = self.dispatch_rejected(&mut inner, e).await;
                    self.record_error(&err);
                    return;
                }
            }
        }

        self.set_session(Some(session));
    }

    async fn connect_and_track(
        &self,
        inner: &mut Inner,
        trigger: Trigger,
    ) -> Result<(), TrackingError> {
        if let Some(poll) = inner.permission_poll.take() {
            poll.abort();
        }
        self.stop_capture(inner).await;
        self.set_session(None);
        self.set_state(TrackingState::Connecting);
        log::info!("Connecting to position source ({:?})", trigger);

        if let Err(e) = self.capabilities.source.connect().await {
            return Err(match e {
                SourceError::PermissionDenied => self.permission_refused(inner, trigger),
                other => {
                    log::warn!("Position source refused the connection: {}", other);
                    self.set_state(TrackingState::Stopped);
                    TrackingError::ConnectionFailure(other.to_string())
                }
            });
        }

        if !self.state.tracking_enabled() {
            log::info!("Tracking was stopped while connecting");
            self.set_state(TrackingState::Stopped);
            return Ok(());
        }

        let session = TrackingSession::from_state(
            &self.state.snapshot(),
            self.capabilities.device.snapshot(),
        );
        if let Err(e) = self.start_capture(inner, &session) {
            return Err(self.capture_refused(inner, e, trigger));
        }
        self.set_state(TrackingState::Tracking);
        if let Err(e) = self.state.update(|s| s.service_running = true) {
            log::warn!("Could not record running service: {}", e);
        }

        match self.scheduler.arm(&session) {
            Ok(Some(_)) => log::info!(
                "Tracking every {}s, dispatching every {}s to {} endpoint(s)",
                session.capture_interval_secs,
                session.dispatch_interval_secs,
                session.endpoints.len()
            ),
            Ok(None) => log::warn!("Tracking without dispatch: no endpoints configured"),
            Err(e) => return Err(self.dispatch_rejected(inner, e).await),
        }

        self.set_session(Some(session));
        self.shared.lock().unwrap().last_error = None;
        Ok(())
    }

    fn start_capture(
        &self,
        inner: &mut Inner,
        session: &TrackingSession,
    ) -> Result<(), SourceError> {
        let fixes = self
            .capabilities
            .source
            .request_updates(session.update_request())?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let pump = CapturePump {
            generation,
            active: self.generation.clone(),
            state: self.state.clone(),
            store: self.capabilities.store.clone(),
            device: self.capabilities.device.clone(),
            identifiers: session.device.clone(),
            shared: self.shared.clone(),
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(pump.run(fixes, stop_rx));
        inner.capture = Some(CaptureWorker { stop_tx, join });
        Ok(())
    }

    async fn stop_capture(&self, inner: &mut Inner) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(worker) = inner.capture.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
        }
        self.capabilities.source.remove_updates();
    }

    fn capture_refused(
        &self,
        inner: &mut Inner,
        err: SourceError,
        trigger: Trigger,
    ) -> TrackingError {
        match err {
            SourceError::PermissionDenied => self.permission_refused(inner, trigger),
            other => {
                log::error!("Position source rejected the update request: {}", other);
                self.set_state(TrackingState::Stopped);
                other.into()
            }
        }
    }

    fn permission_refused(&self, inner: &mut Inner, trigger: Trigger) -> TrackingError {
        if trigger.polls_for_permission() {
            log::warn!("Position source refused the request, waiting for permission");
            self.await_permission(inner);
        } else {
            self.set_state(TrackingState::Stopped);
        }
        TrackingError::LocationPermission
    }

    /// Dispatch without capture is pointless, so a rejected job also ends
    /// the capture.
    async fn dispatch_rejected(&self, inner: &mut Inner, err: DispatchError) -> TrackingError {
        log::error!("Dispatch scheduling rejected ({}), removing location updates", err);
        self.stop_capture(inner).await;
        self.set_session(None);
        self.set_state(TrackingState::Stopped);
        if let Err(e) = self.state.update(|s| s.service_running = false) {
            log::warn!("Could not record stopped service: {}", e);
        }
        TrackingError::DispatchScheduling(err.to_string())
    }

    /// Polls for the grant until it shows up or the poll is cancelled by a
    /// stop. There is no retry limit.
    fn await_permission(&self, inner: &mut Inner) {
        self.set_state(TrackingState::AwaitingPermission);
        if inner.permission_poll.is_some() {
            return;
        }

        let source = self.capabilities.source.clone();
        let this = self.this.clone();
        let period = self.permission_poll_interval;
        inner.permission_poll = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if source.permission_granted() {
                    break;
                }
            }
            if let Some(controller) = this.upgrade() {
                controller.on_permission_granted().await;
            }
        }));
    }

    async fn on_permission_granted(&self) {
        let mut inner = self.inner.lock().await;
        // Runs on the poll task itself; detach rather than abort it.
        inner.permission_poll = None;
        if !self.state.tracking_enabled() {
            return;
        }
        if !self.capabilities.source.location_enabled() {
            let err = TrackingError::LocationDisabled;
            log::warn!("Permission granted but {}", err);
            self.set_state(TrackingState::Stopped);
            self.record_error(&err);
            return;
        }

        log::info!("Location permission granted");
        if let Err(e) = self
            .connect_and_track(&mut inner, Trigger::PermissionGranted)
            .await
        {
            log::warn!("Could not start tracking after permission grant: {}", e);
            self.record_error(&e);
        }
    }

    fn set_state(&self, state: TrackingState) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state != state {
            log::debug!("Tracking state {:?} -> {:?}", shared.state, state);
            shared.state = state;
        }
    }

    fn set_session(&self, session: Option<TrackingSession>) {
        self.shared.lock().unwrap().session = session;
    }

    fn record_error(&self, err: &TrackingError) {
        self.shared.lock().unwrap().last_error = Some(err.to_string());
    }
}

impl Drop for TrackingController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(poll) = inner.permission_poll.take() {
            poll.abort();
        }
        if let Some(worker) = inner.capture.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

fn validate_interval(seconds: u64) -> Result<(), TrackingError> {
    if seconds == 0 {
        return Err(TrackingError::InvalidConfiguration(
            "intervals must be at least one second".into(),
        ));
    }
    Ok(())
}

fn stage_event(state: &StateStore, event: &ConfigEvent) {
    let result = state.update(|s| match *event {
        ConfigEvent::IntervalChanged { seconds } => s.capture_interval_secs = seconds,
        ConfigEvent::DispatchIntervalChanged { seconds } => s.dispatch_interval_secs = seconds,
        ConfigEvent::AccuracyChanged { tier } => s.accuracy = tier,
    });
    if let Err(e) = result {
        log::warn!("{:?} kept in memory only: {}", event, e);
    }
}

struct CapturePump {
    generation: u64,
    active: Arc<AtomicU64>,
    state: Arc<StateStore>,
    store: Arc<dyn LocationStore>,
    device: Arc<dyn DeviceInfo>,
    identifiers: DeviceSnapshot,
    shared: Arc<StdMutex<Shared>>,
}

impl CapturePump {
    async fn run(self, mut fixes: mpsc::Receiver<Fix>, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            let fix = tokio::select! {
                biased;
                _ = &mut stop_rx => return,
                fix = fixes.recv() => fix,
            };
            let Some(fix) = fix else {
                log::debug!("Fix stream {} closed", self.generation);
                return;
            };
            if !self.is_current() {
                log::debug!("Discarding fix from superseded subscription {}", self.generation);
                continue;
            }

            let snapshot = DeviceSnapshot {
                metadata: self.device.snapshot().metadata,
                ..self.identifiers.clone()
            };
            let sample = PositionSample::from_fix(fix, &snapshot);
            if let Err(e) = self.store.append(sample.clone()) {
                log::error!("Failed to buffer sample: {}", e);
                continue;
            }

            let mut shared = self.shared.lock().unwrap();
            shared.samples_captured += 1;
            shared.last_sample = Some(sample);
        }
    }

    fn is_current(&self) -> bool {
        self.active.load(Ordering::SeqCst) == self.generation && self.state.tracking_enabled()
    }
}
