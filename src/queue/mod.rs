pub mod backoff;
pub mod store;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use serde::{ de::DeserializeOwned, Serialize };
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{ watch, RwLock };
use tokio::task::JoinHandle;

use crate::enums::JobStatus;
use crate::error::{ AppError, Result };

pub use store::{ InMemoryJobStore, JobStore };

/// Queue of the settlement legs (bets, claims, redeem, payout, credit).
pub const SETTLEMENT_QUEUE: &str = "settlement";
/// Queue of gas top-ups for custody wallets.
pub const GAS_QUEUE: &str = "gas";

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_ms: i64,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobOptions {
    pub attempts: i32,
    pub backoff: Duration,
    pub delay: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(5),
            delay: Duration::ZERO,
        }
    }
}

/// Work for one `(queue, job_type)`.
///
/// `handle` runs at least once per job and must be idempotent. `on_failure`
/// runs exactly once, after the last attempt failed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;

    async fn on_failure(&self, job: &Job, error: &AppError) -> Result<()>;
}

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    handlers: RwLock<HashMap<(String, String), Arc<dyn JobHandler>>>,
    defaults: JobOptions,
    heartbeat: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, defaults: JobOptions) -> Self {
        Self {
            store,
            handlers: RwLock::new(HashMap::new()),
            defaults,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    /// How often a running handler renews its job's lease. Must stay well
    /// below the lease handed to `release_stale`.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub async fn register_handler(&self, queue: &str, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.write().await.insert((queue.to_string(), job_type.to_string()), handler);
    }

    /// Enqueue `job_id` unless it already exists. Returns whether a job was added.
    pub async fn add_job<P: Serialize>(
        &self,
        queue: &str,
        job_type: &str,
        job_id: &str,
        payload: &P,
        options: Option<JobOptions>
    ) -> Result<bool> {
        let options = options.unwrap_or(self.defaults);
        let now = Utc::now();
        let delay = chrono::Duration
            ::from_std(options.delay)
            .map_err(|e| AppError::Internal(format!("Invalid job delay: {}", e)))?;

        let job = Job {
            id: job_id.to_string(),
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload: serde_json::to_value(payload)?,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: options.attempts.max(1),
            backoff_ms: options.backoff.as_millis() as i64,
            run_at: now + delay,
            locked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let added = self.store.insert_if_absent(job).await?;
        if added {
            tracing::debug!(job_id, queue, job_type, "Job enqueued");
        } else {
            tracing::debug!(job_id, "Job already queued, skipping");
        }

        Ok(added)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.get(job_id).await
    }

    pub async fn job_exists(&self, job_id: &str) -> Result<bool> {
        Ok(self.store.get(job_id).await?.is_some())
    }

    /// Claim and process at most one due job. Returns whether one ran.
    pub async fn run_once(&self) -> Result<bool> {
        let queues: Vec<String> = {
            let handlers = self.handlers.read().await;
            let mut queues: Vec<String> = handlers
                .keys()
                .map(|(queue, _)| queue.clone())
                .collect();
            queues.sort();
            queues.dedup();
            queues
        };

        if queues.is_empty() {
            return Ok(false);
        }

        let Some(job) = self.store.claim_next(&queues, Utc::now()).await? else {
            return Ok(false);
        };

        self.process(job).await?;
        Ok(true)
    }

    async fn process(&self, job: Job) -> Result<()> {
        let handler = self.handlers
            .read().await
            .get(&(job.queue.clone(), job.job_type.clone()))
            .cloned();

        let Some(handler) = handler else {
            let message = format!("No handler registered for {}/{}", job.queue, job.job_type);
            tracing::error!(job_id = %job.id, "{}", message);
            self.store.fail(&job.id, job.attempts_made, &message, Utc::now()).await?;
            return Ok(());
        };

        let attempt = job.attempts_made + 1;

        match self.handle_with_heartbeat(handler.as_ref(), &job).await {
            Ok(()) => {
                self.store.complete(&job.id, Utc::now()).await?;
                tracing::debug!(job_id = %job.id, attempt, "Job completed");
            }
            Err(err) if attempt < job.max_attempts => {
                let base = Duration::from_millis(job.backoff_ms.max(0) as u64);
                let delay = backoff::retry_delay(base, attempt);
                let run_at =
                    Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

                tracing::warn!(
                    job_id = %job.id,
                    attempt,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "Job attempt failed, retrying"
                );

                self.store.reschedule(&job.id, attempt, run_at, &err.to_string()).await?;
            }
            Err(err) => {
                tracing::error!(job_id = %job.id, attempt, error = %err, "Job exhausted its attempts");

                let moved = self.store.fail(&job.id, attempt, &err.to_string(), Utc::now()).await?;
                if moved {
                    let mut failed = job.clone();
                    failed.attempts_made = attempt;
                    failed.status = JobStatus::Failed;

                    if let Err(handler_err) = handler.on_failure(&failed, &err).await {
                        tracing::error!(
                            job_id = %job.id,
                            error = %handler_err,
                            "Failure handler errored"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Run the handler while renewing the job's lease, so a slow but live
    /// handler is never released to a second worker.
    async fn handle_with_heartbeat(&self, handler: &dyn JobHandler, job: &Job) -> Result<()> {
        let handled = handler.handle(job);
        tokio::pin!(handled);

        let mut ticker = tokio::time::interval(self.heartbeat.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut handled => {
                    return result;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.store.touch(&job.id, Utc::now()).await {
                        tracing::warn!(job_id = %job.id, error = %e, "Job heartbeat failed");
                    }
                }
            }
        }
    }

    /// Spawn `concurrency` workers polling every `poll_interval` until `shutdown` flips.
    pub fn start(
        self: Arc<Self>,
        concurrency: usize,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>
    ) -> Vec<JoinHandle<()>> {
        (0..concurrency.max(1))
            .map(|worker| {
                let queue = Arc::clone(&self);
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    tracing::info!(worker, "Job worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }

                        let ran = match queue.run_once().await {
                            Ok(ran) => ran,
                            Err(err) => {
                                tracing::warn!(worker, error = %err, "Job worker iteration failed");
                                false
                            }
                        };

                        if !ran {
                            tokio::select! {
                                _ = shutdown.changed() => {}
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                    }
                    tracing::info!(worker, "Job worker stopped");
                })
            })
            .collect()
    }

    /// Hand jobs whose worker vanished back to the queue.
    pub async fn release_stale(&self, lease: Duration) -> Result<u64> {
        let lease = chrono::Duration
            ::from_std(lease)
            .map_err(|e| AppError::Internal(format!("Invalid lease: {}", e)))?;
        self.store.release_stale(Utc::now() - lease).await
    }

    pub async fn purge_finished(&self, retention: Duration) -> Result<u64> {
        let retention = chrono::Duration
            ::from_std(retention)
            .map_err(|e| AppError::Internal(format!("Invalid retention: {}", e)))?;
        self.store.purge_finished(Utc::now() - retention).await
    }
}
