use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use verdict_core::config::JobsConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::event::ProgressBus;
use verdict_core::types::{
    EventDraft, EventKind, JobId, JobPhase, JobReceipt, ProgressEvent, TicketPayload,
};

use crate::router::DelegationRouter;

/// One evaluation job: identity, payload, mutable state and its event log.
///
/// State is written only by the job's own task; everyone else reads
/// snapshots.
pub struct JobRecord {
    id: JobId,
    payload: TicketPayload,
    created_at: DateTime<Utc>,
    bus: Arc<ProgressBus>,
    state: RwLock<JobState>,
    cancel: CancellationToken,
    observers: AtomicUsize,
}

#[derive(Debug, Clone)]
struct JobState {
    phase: JobPhase,
    current_agent: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub phase: JobPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sequence: u64,
    pub observers: usize,
}

impl JobRecord {
    pub fn new(id: JobId, payload: TicketPayload, retained_events: Option<usize>) -> Self {
        let now = Utc::now();
        Self {
            bus: Arc::new(ProgressBus::new(id.clone(), retained_events)),
            id,
            payload,
            created_at: now,
            state: RwLock::new(JobState {
                phase: JobPhase::Pending,
                current_agent: None,
                result: None,
                error: None,
                updated_at: now,
            }),
            cancel: CancellationToken::new(),
            observers: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn payload(&self) -> &TicketPayload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn observers(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> JobPhase {
        self.read().phase
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read().clone();
        JobSnapshot {
            id: self.id.clone(),
            title: self.payload.title.clone(),
            description: self.payload.description.clone(),
            acceptance_criteria: self.payload.acceptance_criteria.clone(),
            phase: state.phase,
            current_agent: state.current_agent,
            result: state.result,
            error: state.error,
            created_at: self.created_at,
            updated_at: state.updated_at,
            last_sequence: self.bus.last_sequence(),
            observers: self.observers(),
        }
    }

    pub(crate) fn publish(&self, draft: EventDraft) -> Option<ProgressEvent> {
        self.bus.publish(draft)
    }

    pub(crate) fn mark_running(&self, agent: &str) {
        let mut state = self.write();
        state.phase = JobPhase::Running;
        state.current_agent = Some(agent.to_string());
        state.updated_at = Utc::now();
    }

    pub(crate) fn set_current_agent(&self, agent: &str) {
        let mut state = self.write();
        state.current_agent = Some(agent.to_string());
        state.updated_at = Utc::now();
    }

    /// Terminate successfully. State is updated before the terminal event
    /// is published, so an observer that saw the event reads a terminal phase.
    pub(crate) fn complete(&self, result: serde_json::Value) {
        {
            let mut state = self.write();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = JobPhase::Completed;
            state.current_agent = None;
            state.result = Some(result.clone());
            state.updated_at = Utc::now();
        }
        self.publish(
            EventDraft::new(EventKind::Completed, "Evaluation completed")
                .with_progress(100)
                .with_payload(serde_json::json!({ "result": result })),
        );
    }

    /// Terminate with an error. A no-op on a job that is already terminal.
    pub(crate) fn fail(&self, error: &VerdictError) {
        {
            let mut state = self.write();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = JobPhase::Failed;
            state.current_agent = None;
            state.error = Some(error.to_string());
            state.updated_at = Utc::now();
        }
        self.publish(
            EventDraft::new(EventKind::Failed, format!("Evaluation failed: {}", error))
                .with_payload(serde_json::json!({
                    "cause": error.code(),
                    "error": error.to_string(),
                })),
        );
    }

    /// Stream of this job's events; the job counts as observed while the
    /// stream is alive.
    pub fn observe(self: &Arc<Self>, from_sequence: u64) -> BoxStream<'static, ProgressEvent> {
        let guard = ObserverGuard::new(self.clone());
        self.bus
            .subscribe(from_sequence)
            .map(move |event| {
                let _attached = &guard;
                event
            })
            .boxed()
    }
}

struct ObserverGuard(Arc<JobRecord>);

impl ObserverGuard {
    fn new(job: Arc<JobRecord>) -> Self {
        job.observers.fetch_add(1, Ordering::SeqCst);
        Self(job)
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.0.observers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns every evaluation job in the process.
///
/// Submission validates the ticket, registers a `Pending` job and spawns
/// one task that runs it through the `DelegationRouter`. Terminal jobs
/// without observers are evicted by the reaper after the retention window.
pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Arc<JobRecord>>>,
    router: Arc<DelegationRouter>,
    config: JobsConfig,
    permits: Option<Arc<Semaphore>>,
}

impl JobManager {
    pub fn new(router: Arc<DelegationRouter>, config: JobsConfig) -> Self {
        let permits = config
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            jobs: RwLock::new(HashMap::new()),
            router,
            config,
            permits,
        }
    }

    fn jobs_read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Arc<JobRecord>>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs_write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Arc<JobRecord>>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate and enqueue a ticket. Returns before evaluation starts.
    pub fn submit(&self, payload: TicketPayload) -> Result<JobReceipt> {
        payload.validate()?;

        let id = JobId::new();
        let job = Arc::new(JobRecord::new(
            id.clone(),
            payload,
            self.config.max_retained_events,
        ));
        let receipt = JobReceipt {
            job_id: id.clone(),
            created_at: job.created_at(),
        };
        self.jobs_write().insert(id.clone(), job.clone());
        info!(job_id = %id, title = %job.payload().title, "Job submitted");

        let router = self.router.clone();
        let permits = self.permits.clone();
        tokio::spawn(
            async move {
                let _permit = match permits {
                    Some(sem) => {
                        tokio::select! {
                            _ = job.cancel_token().cancelled() => {
                                job.fail(&VerdictError::Cancelled);
                                return;
                            }
                            permit = sem.acquire_owned() => permit.ok(),
                        }
                    }
                    None => None,
                };
                router.run(&job).await;
            }
            .instrument(info_span!("job", job_id = %id)),
        );

        Ok(receipt)
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<JobRecord>> {
        self.jobs_read().get(id).cloned()
    }

    fn require(&self, id: &JobId) -> Result<Arc<JobRecord>> {
        self.get(id)
            .ok_or_else(|| VerdictError::JobNotFound(id.to_string()))
    }

    pub fn status(&self, id: &JobId) -> Result<JobSnapshot> {
        Ok(self.require(id)?.snapshot())
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.jobs_read().values().map(|j| j.snapshot()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs_read().is_empty()
    }

    /// Subscribe to a job's events from `from_sequence` (replay, then live).
    pub fn subscribe(
        &self,
        id: &JobId,
        from_sequence: u64,
    ) -> Result<BoxStream<'static, ProgressEvent>> {
        let job = self.require(id)?;
        debug!(job_id = %id, from_sequence, "Observer attached");
        Ok(job.observe(from_sequence))
    }

    /// Retained events with `sequence >= from_sequence`.
    pub fn events(&self, id: &JobId, from_sequence: u64) -> Result<Vec<ProgressEvent>> {
        Ok(self.require(id)?.bus().events_from(from_sequence))
    }

    /// Request cancellation. The job's own task emits the terminal event.
    /// Cancelling a terminal job is a no-op.
    pub fn cancel(&self, id: &JobId) -> Result<JobPhase> {
        let job = self.require(id)?;
        let phase = job.phase();
        if !phase.is_terminal() {
            info!(job_id = %id, "Cancelling job");
            job.cancel_token().cancel();
        }
        Ok(phase)
    }

    /// Cancel every job that has not finished.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.jobs_read();
        let mut n = 0;
        for job in jobs.values().filter(|j| !j.phase().is_terminal()) {
            job.cancel_token().cancel();
            n += 1;
        }
        n
    }

    /// Evict terminal, unobserved jobs older than the retention window.
    pub fn sweep(&self) -> usize {
        let retention = chrono::Duration::seconds(self.config.retention_secs as i64);
        let cutoff = Utc::now() - retention;

        let mut jobs = self.jobs_write();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let snap = job.read();
            !(snap.phase.is_terminal() && snap.updated_at <= cutoff && job.observers() == 0)
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, remaining = jobs.len(), "Evicted finished jobs");
        }
        evicted
    }

    /// Run `sweep` every `sweep_interval_secs` until `shutdown` fires.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let every = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep();
                    }
                }
            }
            let running = manager.cancel_all();
            if running > 0 {
                warn!(running, "Shutdown cancelled unfinished jobs");
            }
        })
    }
}
