//! Redis queue backend.

use super::{create_pool, priority_score, RedisKeys};
use crate::backend::repeat::{initial_run_at, next_record, next_run_at, repeat_job_id};
use crate::backend::{
    settle, should_remove, BackendEvent, JobRecord, JobState, ProcessorFn, QueueBackend, WorkerHandle,
    WorkerOptions, EVENT_CHANNEL_CAPACITY,
};
use crate::clock::{system_clock, Clock};
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::queue_name::QueueName;
use crate::schedule::CompiledScheduleOptions;
use async_trait::async_trait;
use deadpool_redis::Pool;
use parking_lot::{Mutex, RwLock};
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Storage operations shared by the producer side and bound workers.
#[derive(Clone)]
struct RedisStore {
    pool: Pool,
    keys: RedisKeys,
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn load(&self, queue: &str, id: &str) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(self.keys.job(queue, id)).await?;
        json.map(|json| serde_json::from_str(&json).map_err(JobError::from))
            .transpose()
    }

    /// Persist `record` and place it in exactly the indexes its state calls for.
    async fn save(&self, record: &JobRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let queue = record.queue.as_str();
        let json = serde_json::to_string(record)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.job(queue, &record.id), &json)
            .ignore()
            .zrem(self.keys.waiting(queue), &record.id)
            .ignore()
            .zrem(self.keys.delayed(queue), &record.id)
            .ignore();
        for state in JobState::ALL {
            pipe.zrem(self.keys.state(queue, state), &record.id).ignore();
        }
        pipe.zadd(
            self.keys.state(queue, record.state),
            &record.id,
            record.created_at.timestamp_millis() as f64,
        )
        .ignore();

        match record.state {
            JobState::Waiting => {
                pipe.zadd(
                    self.keys.waiting(queue),
                    &record.id,
                    priority_score(record.priority, record.run_at.timestamp_millis()),
                )
                .ignore();
            }
            JobState::Delayed => {
                pipe.zadd(
                    self.keys.delayed(queue),
                    &record.id,
                    record.run_at.timestamp_millis() as f64,
                )
                .ignore();
            }
            _ => {}
        }

        pipe.query_async::<()>(&mut *conn).await?;
        Ok(())
    }

    async fn remove(&self, record: &JobRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let queue = record.queue.as_str();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.keys.job(queue, &record.id))
            .ignore()
            .zrem(self.keys.waiting(queue), &record.id)
            .ignore()
            .zrem(self.keys.delayed(queue), &record.id)
            .ignore();
        for state in JobState::ALL {
            pipe.zrem(self.keys.state(queue, state), &record.id).ignore();
        }
        pipe.query_async::<()>(&mut *conn).await?;
        Ok(())
    }

    /// Move due delayed jobs to the waiting set.
    async fn promote_delayed(&self, queue: &str) -> JobResult<u64> {
        let now = self.clock.now();
        let due: Vec<String> = {
            let mut conn = self.conn().await?;
            conn.zrangebyscore(self.keys.delayed(queue), 0i64, now.timestamp_millis())
                .await?
        };

        let mut moved = 0u64;
        for id in due {
            // Only the caller whose ZREM removed the id promotes it.
            let claimed: u64 = {
                let mut conn = self.conn().await?;
                conn.zrem(self.keys.delayed(queue), &id).await?
            };
            if claimed == 0 {
                continue;
            }
            if let Some(mut record) = self.load(queue, &id).await? {
                record.state = JobState::Waiting;
                self.save(&record).await?;
                moved += 1;
                debug!(job_id = %id, queue = %queue, "Moved delayed job to waiting");
            }
        }

        Ok(moved)
    }

    /// Atomically take the next waiting job and mark it active.
    async fn claim_next(&self, queue: &str) -> JobResult<Option<JobRecord>> {
        self.promote_delayed(queue).await?;

        let popped: Vec<(String, f64)> = {
            let mut conn = self.conn().await?;
            conn.zpopmin(self.keys.waiting(queue), 1).await?
        };
        let Some((id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let Some(mut record) = self.load(queue, &id).await? else {
            warn!(job_id = %id, queue = %queue, "Waiting job has no stored data");
            return Ok(None);
        };

        let now = self.clock.now();
        record.state = JobState::Active;
        record.processed_at = Some(now);
        self.save(&record).await?;

        if record.attempts_made == 0 {
            if let Some(run_at) = next_run_at(&record)? {
                let next_id = repeat_job_id(&record, run_at);
                let exists: bool = {
                    let mut conn = self.conn().await?;
                    conn.exists(self.keys.job(queue, &next_id)).await?
                };
                if !exists {
                    self.save(&next_record(&record, next_id, run_at, now)).await?;
                }
            }
        }

        Ok(Some(record))
    }

    async fn has_waiting(&self, queue: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcard(self.keys.waiting(queue)).await?;
        Ok(count > 0)
    }
}

/// Redis-backed queue backend.
///
/// Each bound processor runs a polling task that promotes due delayed jobs,
/// pops the highest-priority waiting job and hands it to the processor,
/// with at most `concurrency` deliveries in flight.
pub struct RedisBackend {
    store: RedisStore,
    poll_interval: Duration,
    closed: RwLock<HashSet<String>>,
    workers: Mutex<Vec<Arc<RedisWorker>>>,
}

impl RedisBackend {
    /// Create a backend over an existing pool.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self::with_clock(pool, config, system_clock())
    }

    /// Create a backend over an existing pool with an injected clock.
    pub fn with_clock(pool: Pool, config: &RedisConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RedisStore {
                pool,
                keys: RedisKeys::new(&config.key_prefix),
                clock,
            },
            poll_interval: config.poll_interval(),
            closed: RwLock::new(HashSet::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Create the pool from configuration and connect.
    pub async fn connect(config: &RedisConfig) -> JobResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, config))
    }

    /// Check the Redis connection.
    pub async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.store.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("keys", &self.store.keys)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn enqueue(
        &self,
        queue: &QueueName,
        job_name: &str,
        payload: Value,
        options: &CompiledScheduleOptions,
    ) -> JobResult<String> {
        if self.closed.read().contains(queue.as_str()) {
            return Err(JobError::Backend(format!("queue {} is closed", queue)));
        }

        let now = self.store.clock.now();
        let run_at = initial_run_at(options, now)?;
        let mut conn = self.store.conn().await?;

        let id = match options.job_id.as_deref() {
            Some(id) => {
                let exists: bool = conn.exists(self.store.keys.job(queue.as_str(), id)).await?;
                if exists {
                    debug!(queue = %queue, job_id = %id, "Duplicate job id, keeping existing job");
                    return Ok(id.to_string());
                }
                id.to_string()
            }
            None => {
                let next: u64 = conn.incr(self.store.keys.id_sequence(queue.as_str()), 1u64).await?;
                next.to_string()
            }
        };
        drop(conn);

        let mut record = JobRecord::new(id.clone(), queue, job_name, payload, options.clone(), now);
        record.run_at = run_at;
        record.state = if run_at > now { JobState::Delayed } else { JobState::Waiting };
        self.store.save(&record).await?;

        debug!(
            job_id = %id,
            queue = %queue,
            job_name = %job_name,
            run_at = %run_at,
            priority = record.priority,
            "Enqueued job"
        );

        Ok(id)
    }

    async fn get_jobs(
        &self,
        queue: &QueueName,
        states: &[JobState],
        offset: usize,
        limit: usize,
    ) -> JobResult<Vec<JobRecord>> {
        let states: Vec<JobState> = if states.is_empty() {
            JobState::ALL.to_vec()
        } else {
            states.to_vec()
        };

        let mut scored: Vec<(String, f64)> = Vec::new();
        {
            let mut conn = self.store.conn().await?;
            for state in states {
                let entries: Vec<(String, f64)> = conn
                    .zrange_withscores(self.store.keys.state(queue.as_str(), state), 0, -1)
                    .await?;
                scored.extend(entries);
            }
        }
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut records = Vec::new();
        for (id, _) in scored.into_iter().skip(offset).take(limit) {
            if let Some(record) = self.store.load(queue.as_str(), &id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn bind_processor(
        &self,
        queue: &QueueName,
        processor: ProcessorFn,
        options: WorkerOptions,
    ) -> JobResult<Arc<dyn WorkerHandle>> {
        {
            let workers = self.workers.lock();
            if workers
                .iter()
                .any(|w| w.queue == *queue && !w.closed.load(Ordering::SeqCst))
            {
                return Err(JobError::Backend(format!("a processor is already bound to {}", queue)));
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = Arc::new(RedisWorker {
            queue: queue.clone(),
            events,
            shutdown_tx,
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(
            poll_loop(
                self.store.clone(),
                worker.clone(),
                processor,
                options.concurrency.max(1),
                self.poll_interval,
            )
            .instrument(tracing::info_span!("redis_worker", queue = %queue)),
        );
        *worker.task.lock() = Some(task);

        self.workers.lock().push(worker.clone());
        info!(queue = %queue, concurrency = options.concurrency, "Bound Redis processor");
        Ok(worker)
    }

    async fn close_queue(&self, queue: &QueueName) -> JobResult<()> {
        self.closed.write().insert(queue.to_string());
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        let workers: Vec<Arc<RedisWorker>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            self.closed.write().insert(worker.queue.to_string());
            worker.close().await?;
        }
        Ok(())
    }
}

async fn poll_loop(
    store: RedisStore,
    worker: Arc<RedisWorker>,
    processor: ProcessorFn,
    concurrency: usize,
    poll_interval: Duration,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut shutdown_rx = worker.shutdown_tx.subscribe();
    let queue = worker.queue.to_string();

    loop {
        let permit = tokio::select! {
            _ = shutdown_rx.recv() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match store.claim_next(&queue).await {
            Ok(Some(record)) => {
                let store = store.clone();
                let worker = worker.clone();
                let processor = processor.clone();
                tokio::spawn(
                    async move {
                        deliver(&store, &worker, &processor, record).await;
                        drop(permit);
                    }
                    .in_current_span(),
                );
                continue;
            }
            Ok(None) => drop(permit),
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                drop(permit);
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    // Wait for in-flight deliveries.
    let _ = semaphore.acquire_many(u32::try_from(concurrency).unwrap_or(u32::MAX)).await;
    debug!("Redis poll loop stopped");
}

async fn deliver(store: &RedisStore, worker: &RedisWorker, processor: &ProcessorFn, record: JobRecord) {
    worker.emit(BackendEvent::Active(record.clone()));
    debug!(job_id = %record.id, job_name = %record.name, attempt = record.attempts_made + 1, "Delivering job");

    let result = processor(record.clone()).await;

    let mut settled = record;
    let event = settle(&mut settled, result, store.clock.now());
    let persisted = if should_remove(&settled) {
        store.remove(&settled).await
    } else {
        store.save(&settled).await
    };
    if let Err(e) = persisted {
        error!(job_id = %settled.id, error = %e, "Failed to persist job outcome");
    }

    worker.emit(event);
    match store.has_waiting(&settled.queue).await {
        Ok(false) => worker.emit(BackendEvent::Drained),
        Ok(true) => {}
        Err(e) => warn!(error = %e, "Failed to check waiting jobs"),
    }
}

/// Processor bound on one Redis queue.
struct RedisWorker {
    queue: QueueName,
    events: broadcast::Sender<BackendEvent>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisWorker {
    fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WorkerHandle for RedisWorker {
    fn queue(&self) -> &QueueName {
        &self.queue
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> JobResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(queue = %self.queue, "Stopping Redis processor...");
        let _ = self.shutdown_tx.send(());

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| JobError::Internal(format!("Redis poll loop panicked: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    async fn store(prefix: &str) -> RedisStore {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: prefix.to_string(),
            ..RedisConfig::default()
        };
        RedisStore {
            pool: create_pool(&config).await.unwrap(),
            keys: RedisKeys::new(prefix),
            clock: system_clock(),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_concurrent_promotion_moves_each_job_once() {
        let prefix = format!("cadence:test:{}", uuid::Uuid::new_v4().simple());
        let store = store(&prefix).await;
        let queue = "default";

        let mut record = JobRecord::new(
            "1",
            queue,
            "sendEmail",
            json!({}),
            CompiledScheduleOptions::default(),
            Utc::now(),
        );
        record.state = JobState::Delayed;
        record.run_at = Utc::now() - chrono::Duration::seconds(1);
        store.save(&record).await.unwrap();

        let (a, b) = tokio::join!(store.promote_delayed(queue), store.promote_delayed(queue));
        assert_eq!(a.unwrap() + b.unwrap(), 1);

        let first = store.claim_next(queue).await.unwrap().unwrap();
        assert_eq!(first.id, "1");
        assert!(store.claim_next(queue).await.unwrap().is_none());
        assert!(!store.has_waiting(queue).await.unwrap());

        store.remove(&first).await.unwrap();
    }
}
