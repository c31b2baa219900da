use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use utoipa::ToSchema;

use super::endpoint::{endpoints_from_json, endpoints_to_json};
use super::{DispatchError, Dispatcher, JobTable};
use crate::store::LocationStore;
use crate::tracking::TrackingSession;

pub const DISPATCH_TAG: &str = "locatrack.location_dispatch";

/// One installed recurring dispatch. Re-arming installs a new instance
/// under the same tag instead of editing this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SchedulerJob {
    pub id: String,
    pub tag: String,
    pub period_secs: u64,
    /// Endpoint list in its JSON wire form.
    pub payload: String,
    pub persisted: bool,
    pub created_at: DateTime<Utc>,
}

impl SchedulerJob {
    pub fn new(tag: &str, period_secs: u64, payload: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tag: tag.to_string(),
            period_secs,
            payload,
            persisted: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct FireReport {
    pub tag: String,
    pub drained: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug)]
struct ActiveJob {
    job: SchedulerJob,
    stop_tx: oneshot::Sender<()>,
}

#[derive(Clone)]
struct JobContext {
    store: Arc<dyn LocationStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

pub struct DispatchScheduler {
    context: JobContext,
    table: JobTable,
    jobs: StdMutex<HashMap<String, ActiveJob>>,
}

impl DispatchScheduler {
    pub fn new(
        store: Arc<dyn LocationStore>,
        dispatcher: Arc<dyn Dispatcher>,
        table: JobTable,
    ) -> Self {
        Self {
            context: JobContext { store, dispatcher },
            table,
            jobs: StdMutex::new(HashMap::new()),
        }
    }

    /// Installs the dispatch job for `session`, replacing whatever was armed
    /// before. Returns `None` when the session has no endpoints.
    pub fn arm(&self, session: &TrackingSession) -> Result<Option<SchedulerJob>, DispatchError> {
        if session.endpoints.is_empty() {
            log::debug!("No endpoints configured, dispatch job not installed");
            return Ok(None);
        }

        let payload = endpoints_to_json(&session.endpoints)?;
        let job = SchedulerJob::new(DISPATCH_TAG, session.dispatch_interval_secs, payload);
        self.install(job.clone())?;
        Ok(Some(job))
    }

    pub fn install(&self, job: SchedulerJob) -> Result<(), DispatchError> {
        if job.period_secs == 0 {
            return Err(DispatchError::Scheduling(format!(
                "job {} has a zero period",
                job.tag
            )));
        }

        let mut jobs = self.jobs.lock().unwrap();

        let mut table: Vec<SchedulerJob> = jobs
            .values()
            .filter(|a| a.job.tag != job.tag)
            .map(|a| a.job.clone())
            .collect();
        table.push(job.clone());
        self.table.save(&table).map_err(|e| {
            DispatchError::Scheduling(format!("could not persist job {}: {}", job.tag, e))
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(run_job_loop(self.context.clone(), job.clone(), stop_rx));
        let tag = job.tag.clone();
        let period = job.period_secs;

        if let Some(previous) = jobs.insert(tag.clone(), ActiveJob { job, stop_tx }) {
            let _ = previous.stop_tx.send(());
            log::info!(
                "Replaced dispatch job {} ({}s -> {}s)",
                tag,
                previous.job.period_secs,
                period
            );
        } else {
            log::info!("Installed dispatch job {} every {}s", tag, period);
        }
        Ok(())
    }

    pub fn disarm(&self) -> usize {
        self.cancel_tag(DISPATCH_TAG)
    }

    /// Cancels every job under `tag`. Returns how many were cancelled.
    pub fn cancel_tag(&self, tag: &str) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(active) = jobs.remove(tag) else {
            return 0;
        };
        let _ = active.stop_tx.send(());

        let remaining: Vec<SchedulerJob> = jobs.values().map(|a| a.job.clone()).collect();
        if let Err(e) = self.table.save(&remaining) {
            log::warn!("Failed to update job table after cancelling {}: {}", tag, e);
        }
        log::info!("Cancelled dispatch job {}", tag);
        1
    }

    /// Re-installs the jobs persisted by an earlier process.
    pub fn restore(&self) -> Result<usize, DispatchError> {
        let persisted = self.table.load()?;
        let count = persisted.len();
        for job in persisted {
            self.install(job)?;
        }
        if count > 0 {
            log::info!("Restored {} persisted dispatch job(s)", count);
        }
        Ok(count)
    }

    pub fn jobs(&self) -> Vec<SchedulerJob> {
        let mut jobs: Vec<SchedulerJob> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .map(|a| a.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.tag.cmp(&b.tag));
        jobs
    }

    pub fn job(&self, tag: &str) -> Option<SchedulerJob> {
        self.jobs.lock().unwrap().get(tag).map(|a| a.job.clone())
    }

    /// Runs the body of the job under `tag` right now, outside its period.
    pub async fn fire(&self, tag: &str) -> Option<FireReport> {
        let job = self.job(tag)?;
        Some(execute(&self.context, &job).await)
    }
}

async fn run_job_loop(context: JobContext, job: SchedulerJob, mut stop_rx: oneshot::Receiver<()>) {
    let period = Duration::from_secs(job.period_secs);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut stop_rx => {
                log::debug!("Dispatch job {} ({}) stopped", job.tag, job.id);
                return;
            }
        }
        execute(&context, &job).await;
    }
}

/// Drains the store once and fans the batch out to every endpoint. A failed
/// upload does not affect the others.
async fn execute(context: &JobContext, job: &SchedulerJob) -> FireReport {
    let mut report = FireReport {
        tag: job.tag.clone(),
        ..Default::default()
    };

    let endpoints = match endpoints_from_json(&job.payload) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            log::error!("Job {} has an unreadable endpoint payload: {}", job.tag, e);
            return report;
        }
    };

    let batch = match context.store.drain_all() {
        Ok(batch) => batch,
        Err(e) => {
            log::error!("Failed to drain location store: {}", e);
            return report;
        }
    };
    report.drained = batch.len();
    if batch.is_empty() {
        log::debug!("Nothing buffered, skipping dispatch");
        return report;
    }

    let dispatcher = &context.dispatcher;
    let batch = &batch;
    let uploads = endpoints.iter().map(|endpoint| async move {
        (
            endpoint.url().to_string(),
            dispatcher.upload(endpoint, batch).await,
        )
    });

    for (url, result) in join_all(uploads).await {
        match result {
            Ok(()) => report.delivered.push(url),
            Err(e) => {
                log::warn!("Dispatch of {} samples to {} failed: {}", batch.len(), url, e);
                report.failed.push(url);
            }
        }
    }

    log::info!(
        "Dispatched {} samples to {}/{} endpoints",
        report.drained,
        report.delivered.len(),
        endpoints.len()
    );
    report
}
