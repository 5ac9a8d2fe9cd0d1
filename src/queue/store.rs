use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::enums::JobStatus;
use crate::error::Result;

use super::Job;

/// Durable home of queued jobs. Every state change is a compare-and-set on
/// the current status so two workers never own the same job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert unless a job with the same id exists. Returns whether it was inserted.
    async fn insert_if_absent(&self, job: Job) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Move the oldest due `waiting` job of one of `queues` to `active`.
    async fn claim_next(&self, queues: &[String], now: DateTime<Utc>) -> Result<Option<Job>>;

    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Put an `active` job back to `waiting` until `run_at`.
    async fn reschedule(
        &self,
        id: &str,
        attempts_made: i32,
        run_at: DateTime<Utc>,
        error: &str
    ) -> Result<()>;

    /// Move an `active` job to `failed`. Returns `false` if another worker got there first.
    async fn fail(&self, id: &str, attempts_made: i32, error: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Renew the lease of an `active` job whose handler is still running.
    async fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Return `active` jobs locked before `locked_before` to `waiting`.
    async fn release_stale(&self, locked_before: DateTime<Utc>) -> Result<u64>;

    /// Delete completed and failed jobs last touched before `finished_before`.
    async fn purge_finished(&self, finished_before: DateTime<Utc>) -> Result<u64>;
}

/// Process-local store for tests and single-node development.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_if_absent(&self, job: Job) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Ok(false);
        }
        jobs.insert(job.id.clone(), job);
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn claim_next(&self, queues: &[String], now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().await;

        let next_id = jobs
            .values()
            .filter(|job| job.status == JobStatus::Waiting)
            .filter(|job| job.run_at <= now)
            .filter(|job| queues.iter().any(|q| q == &job.queue))
            .min_by_key(|job| (job.run_at, job.created_at))
            .map(|job| job.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = match jobs.get_mut(&id) {
            Some(job) => job,
            None => {
                return Ok(None);
            }
        };
        job.status = JobStatus::Active;
        job.locked_at = Some(now);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(id) {
            if job.status == JobStatus::Active {
                job.status = JobStatus::Completed;
                job.locked_at = None;
                job.updated_at = now;
            }
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &str,
        attempts_made: i32,
        run_at: DateTime<Utc>,
        error: &str
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(id) {
            if job.status == JobStatus::Active {
                job.status = JobStatus::Waiting;
                job.attempts_made = attempts_made;
                job.run_at = run_at;
                job.locked_at = None;
                job.last_error = Some(error.to_string());
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn fail(&self, id: &str, attempts_made: i32, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Active => {
                job.status = JobStatus::Failed;
                job.attempts_made = attempts_made;
                job.locked_at = None;
                job.last_error = Some(error.to_string());
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(id) {
            if job.status == JobStatus::Active {
                job.locked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn release_stale(&self, locked_before: DateTime<Utc>) -> Result<u64> {
        let mut released = 0;
        for job in self.jobs.lock().await.values_mut() {
            let stale = job.status == JobStatus::Active &&
                job.locked_at.map(|at| at < locked_before).unwrap_or(true);
            if stale {
                job.status = JobStatus::Waiting;
                job.locked_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn purge_finished(&self, finished_before: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            let finished = matches!(job.status, JobStatus::Completed | JobStatus::Failed);
            !(finished && job.updated_at < finished_before)
        });
        Ok((before - jobs.len()) as u64)
    }
}
