use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::controller::TrackingController;
use super::types::TrackingState;

pub const WAKEUP_DELAY: Duration = Duration::from_secs(1);

/// Keeps tracking alive across the host tearing the process down.
///
/// When the host task is removed the dispatch job is cancelled and a
/// one-shot wake-up is recorded. The wake-up is kept in the state file so a
/// fresh process can honour it through [`RestartGuard::recover`].
pub struct RestartGuard {
    controller: Arc<TrackingController>,
    delay: Duration,
    pending: StdMutex<Option<JoinHandle<()>>>,
}

impl RestartGuard {
    pub fn new(controller: Arc<TrackingController>) -> Self {
        Self::with_delay(controller, WAKEUP_DELAY)
    }

    pub fn with_delay(controller: Arc<TrackingController>, delay: Duration) -> Self {
        Self {
            controller,
            delay,
            pending: StdMutex::new(None),
        }
    }

    pub fn on_task_removed(&self) {
        self.controller.scheduler().disarm();

        let delay = chrono::Duration::from_std(self.delay).unwrap_or_else(|_| chrono::Duration::zero());
        let due = Utc::now() + delay;
        if let Err(e) = self
            .controller
            .state_store()
            .update(|s| s.pending_wakeup = Some(due))
        {
            log::warn!("Could not persist pending wake-up: {}", e);
        }

        log::info!("Task removed, waking tracking in {:?}", self.delay);
        self.schedule(self.delay);
    }

    /// Honours a wake-up left behind by an earlier process. A process that
    /// went away while the service was marked running is treated as a task
    /// removal. Returns whether a wake-up was scheduled.
    ///
    /// Call after [`TrackingController::initialize`]. If that already resumed
    /// tracking, the leftover marker is cleared instead, so a cold start
    /// connects once.
    pub fn recover(&self) -> bool {
        if self.controller.state() == TrackingState::Tracking {
            log::debug!("Tracking already resumed, no wake-up needed");
            self.cancel();
            return false;
        }

        let persisted = self.controller.state_store().snapshot();
        if let Some(due) = persisted.pending_wakeup {
            let remaining = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            log::info!("Recovering pending wake-up in {:?}", remaining);
            self.schedule(remaining);
            return true;
        }
        if persisted.service_running && persisted.tracking_enabled {
            log::info!("Previous process ended while tracking, scheduling wake-up");
            self.on_task_removed();
            return true;
        }
        false
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().unwrap().take() {
            handle.abort();
        }
        if let Err(e) = self
            .controller
            .state_store()
            .update(|s| s.pending_wakeup = None)
        {
            log::warn!("Could not clear pending wake-up: {}", e);
        }
    }

    fn schedule(&self, delay: Duration) {
        let controller = self.controller.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = controller
                .state_store()
                .update(|s| s.pending_wakeup = None)
            {
                log::warn!("Could not clear pending wake-up: {}", e);
            }
            controller.wake().await;
        });

        if let Some(previous) = self.pending.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for RestartGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().ok().and_then(|p| p.take()) {
            handle.abort();
        }
    }
}
