//! In-process queue backend.
//!
//! Deliveries are driven explicitly with [`InMemoryBackend::process_next`]
//! or [`InMemoryBackend::run_until_idle`], which makes execution order and
//! timing deterministic. Time comes from the injected [`Clock`].

use super::repeat::{initial_run_at, next_record, next_run_at, repeat_job_id};
use super::{
    settle, should_remove, BackendEvent, JobRecord, JobState, ProcessorFn, QueueBackend, WorkerHandle,
    WorkerOptions, EVENT_CHANNEL_CAPACITY,
};
use crate::clock::{system_clock, Clock};
use crate::error::{JobError, JobResult};
use crate::queue_name::QueueName;
use crate::schedule::CompiledScheduleOptions;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, JobRecord>,
    /// Insertion order of job ids.
    order: Vec<String>,
    worker: Option<Arc<MemoryWorker>>,
    closed: bool,
}

impl QueueState {
    fn insert(&mut self, record: JobRecord) {
        self.order.push(record.id.clone());
        self.jobs.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) {
        self.jobs.remove(id);
        self.order.retain(|existing| existing != id);
    }

    /// Move due delayed jobs to waiting and pick the next one to deliver:
    /// highest priority first, then earliest due, then insertion order.
    fn next_due(&mut self, now: chrono::DateTime<chrono::Utc>) -> Option<String> {
        for record in self.jobs.values_mut() {
            if record.state == JobState::Delayed && record.run_at <= now {
                record.state = JobState::Waiting;
            }
        }

        self.order
            .iter()
            .enumerate()
            .filter_map(|(position, id)| self.jobs.get(id).map(|record| (position, record)))
            .filter(|(_, record)| record.state == JobState::Waiting && record.run_at <= now)
            .min_by(|(pa, a), (pb, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.run_at.cmp(&b.run_at))
                    .then(pa.cmp(pb))
            })
            .map(|(_, record)| record.id.clone())
    }

    fn has_waiting(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.jobs.values().any(|record| {
            matches!(record.state, JobState::Waiting | JobState::Delayed) && record.run_at <= now
        })
    }
}

struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

/// Deterministic in-process backend.
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("queues", &self.inner.queues.lock().len())
            .finish()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Backend driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Backend driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                clock,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Every job currently stored for `queue`, in insertion order.
    pub fn jobs(&self, queue: &QueueName) -> Vec<JobRecord> {
        let queues = self.inner.queues.lock();
        queues
            .get(queue.as_str())
            .map(|state| {
                state
                    .order
                    .iter()
                    .filter_map(|id| state.jobs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up one job.
    pub fn job(&self, queue: &QueueName, id: &str) -> Option<JobRecord> {
        self.inner
            .queues
            .lock()
            .get(queue.as_str())
            .and_then(|state| state.jobs.get(id).cloned())
    }

    /// Make a stored job due now, whatever its schedule.
    pub fn trigger(&self, queue: &QueueName, id: &str) -> JobResult<()> {
        let now = self.inner.clock.now();
        let mut queues = self.inner.queues.lock();
        let record = queues
            .get_mut(queue.as_str())
            .and_then(|state| state.jobs.get_mut(id))
            .ok_or_else(|| JobError::Backend(format!("job {} not found in queue {}", id, queue)))?;
        if matches!(record.state, JobState::Waiting | JobState::Delayed) {
            record.state = JobState::Waiting;
            record.run_at = now;
        }
        Ok(())
    }

    /// Deliver the next due job on `queue` to its bound processor.
    ///
    /// Returns the job as stored after the delivery, or `None` when nothing
    /// is due or no open processor is bound.
    pub async fn process_next(&self, queue: &QueueName) -> JobResult<Option<JobRecord>> {
        let now = self.inner.clock.now();

        let (worker, record) = {
            let mut queues = self.inner.queues.lock();
            let Some(state) = queues.get_mut(queue.as_str()) else {
                return Ok(None);
            };
            let Some(worker) = state.worker.clone().filter(|w| !w.closed.load(Ordering::SeqCst)) else {
                return Ok(None);
            };
            let Some(id) = state.next_due(now) else {
                return Ok(None);
            };

            let Some(record) = state.jobs.get_mut(&id) else {
                return Ok(None);
            };
            record.state = JobState::Active;
            record.processed_at = Some(now);
            let active = record.clone();

            // Repeats chain forward as soon as a firing is picked up.
            if active.attempts_made == 0 {
                if let Some(run_at) = next_run_at(&active)? {
                    let next_id = repeat_job_id(&active, run_at);
                    if !state.jobs.contains_key(&next_id) {
                        state.insert(next_record(&active, next_id, run_at, now));
                    }
                }
            }

            (worker, active)
        };

        worker.emit(BackendEvent::Active(record.clone()));
        debug!(queue = %queue, job_id = %record.id, job_name = %record.name, "Delivering job");

        let result = (worker.processor)(record.clone()).await;
        let finished_at = self.inner.clock.now();

        let (stored, event, drained) = {
            let mut queues = self.inner.queues.lock();
            let Some(state) = queues.get_mut(queue.as_str()) else {
                return Ok(None);
            };
            let Some(stored) = state.jobs.get_mut(&record.id) else {
                return Ok(None);
            };

            let event = settle(stored, result, finished_at);
            let stored = stored.clone();
            let remove = should_remove(&stored);
            if remove {
                state.remove(&stored.id);
            }

            (stored, event, !state.has_waiting(finished_at))
        };

        worker.emit(event);
        if drained {
            worker.emit(BackendEvent::Drained);
        }

        Ok(Some(stored))
    }

    /// Deliver due jobs until none remain. Returns the number of deliveries.
    pub async fn run_until_idle(&self, queue: &QueueName) -> JobResult<usize> {
        let mut delivered = 0;
        while self.process_next(queue).await?.is_some() {
            delivered += 1;
        }
        Ok(delivered)
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn enqueue(
        &self,
        queue: &QueueName,
        job_name: &str,
        payload: Value,
        options: &CompiledScheduleOptions,
    ) -> JobResult<String> {
        let now = self.inner.clock.now();
        let run_at = initial_run_at(options, now)?;

        let mut queues = self.inner.queues.lock();
        let state = queues.entry(queue.to_string()).or_default();
        if state.closed {
            return Err(JobError::Backend(format!("queue {} is closed", queue)));
        }

        if let Some(id) = options.job_id.as_deref() {
            if state.jobs.contains_key(id) {
                debug!(queue = %queue, job_id = %id, "Duplicate job id, keeping existing job");
                return Ok(id.to_string());
            }
        }

        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| self.inner.next_id.fetch_add(1, Ordering::SeqCst).to_string());

        let mut record = JobRecord::new(id.clone(), queue, job_name, payload, options.clone(), now);
        record.run_at = run_at;
        record.state = if run_at > now { JobState::Delayed } else { JobState::Waiting };
        state.insert(record);

        Ok(id)
    }

    async fn get_jobs(
        &self,
        queue: &QueueName,
        states: &[JobState],
        offset: usize,
        limit: usize,
    ) -> JobResult<Vec<JobRecord>> {
        Ok(self
            .jobs(queue)
            .into_iter()
            .filter(|record| states.is_empty() || states.contains(&record.state))
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn bind_processor(
        &self,
        queue: &QueueName,
        processor: ProcessorFn,
        options: WorkerOptions,
    ) -> JobResult<Arc<dyn WorkerHandle>> {
        let mut queues = self.inner.queues.lock();
        let state = queues.entry(queue.to_string()).or_default();
        if let Some(existing) = &state.worker {
            if !existing.closed.load(Ordering::SeqCst) {
                return Err(JobError::Backend(format!("a processor is already bound to {}", queue)));
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let worker = Arc::new(MemoryWorker {
            queue: queue.clone(),
            processor,
            events,
            closed: AtomicBool::new(false),
            concurrency: options.concurrency,
        });
        state.worker = Some(worker.clone());
        debug!(queue = %queue, concurrency = options.concurrency, "Bound in-memory processor");
        Ok(worker)
    }

    async fn close_queue(&self, queue: &QueueName) -> JobResult<()> {
        if let Some(state) = self.inner.queues.lock().get_mut(queue.as_str()) {
            state.closed = true;
        }
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        let workers: Vec<Arc<MemoryWorker>> = {
            let mut queues = self.inner.queues.lock();
            queues
                .values_mut()
                .filter_map(|state| {
                    state.closed = true;
                    state.worker.clone()
                })
                .collect()
        };
        for worker in workers {
            worker.close().await?;
        }
        Ok(())
    }
}

/// Processor bound on one in-memory queue.
struct MemoryWorker {
    queue: QueueName,
    processor: ProcessorFn,
    events: broadcast::Sender<BackendEvent>,
    closed: AtomicBool,
    concurrency: usize,
}

impl MemoryWorker {
    fn emit(&self, event: BackendEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WorkerHandle for MemoryWorker {
    fn queue(&self) -> &QueueName {
        &self.queue
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> JobResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(queue = %self.queue, concurrency = self.concurrency, "Closed in-memory processor");
        } else {
            warn!(queue = %self.queue, "In-memory processor already closed");
        }
        Ok(())
    }
}
