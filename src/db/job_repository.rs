use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use sea_orm::{
    entity::prelude::*,
    sea_query::{ Expr, OnConflict },
    ActiveValue::Set,
    DatabaseConnection,
    QueryOrder,
    QuerySelect,
};

use crate::db::entity::job;
use crate::enums::JobStatus;
use crate::error::Result;
use crate::queue::{ Job, JobStore };

/// How many times `claim_next` retries after losing a race for a candidate.
const CLAIM_RACE_RETRIES: usize = 5;

pub struct SeaOrmJobStore {
    db: DatabaseConnection,
}

impl SeaOrmJobStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl TryFrom<job::Model> for Job {
    type Error = crate::error::AppError;

    fn try_from(model: job::Model) -> Result<Self> {
        Ok(Job {
            id: model.id,
            queue: model.queue,
            job_type: model.job_type,
            payload: model.payload,
            status: model.status.parse()?,
            attempts_made: model.attempts_made,
            max_attempts: model.max_attempts,
            backoff_ms: model.backoff_ms,
            run_at: model.run_at,
            locked_at: model.locked_at,
            last_error: model.last_error,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[async_trait]
impl JobStore for SeaOrmJobStore {
    async fn insert_if_absent(&self, new_job: Job) -> Result<bool> {
        let model = job::ActiveModel {
            id: Set(new_job.id),
            queue: Set(new_job.queue),
            job_type: Set(new_job.job_type),
            payload: Set(new_job.payload),
            status: Set(new_job.status.to_string()),
            attempts_made: Set(new_job.attempts_made),
            max_attempts: Set(new_job.max_attempts),
            backoff_ms: Set(new_job.backoff_ms),
            run_at: Set(new_job.run_at),
            locked_at: Set(new_job.locked_at),
            last_error: Set(new_job.last_error),
            created_at: Set(new_job.created_at),
            updated_at: Set(new_job.updated_at),
        };

        let inserted = job::Entity
            ::insert(model)
            .on_conflict(OnConflict::column(job::Column::Id).do_nothing().to_owned())
            .exec_without_returning(&self.db).await?;

        Ok(inserted > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        job::Entity::find_by_id(id.to_string()).one(&self.db).await?.map(Job::try_from).transpose()
    }

    async fn claim_next(&self, queues: &[String], now: DateTime<Utc>) -> Result<Option<Job>> {
        for _ in 0..CLAIM_RACE_RETRIES {
            let candidate = job::Entity
                ::find()
                .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
                .filter(job::Column::RunAt.lte(now))
                .filter(job::Column::Queue.is_in(queues.iter().cloned()))
                .order_by_asc(job::Column::RunAt)
                .order_by_asc(job::Column::CreatedAt)
                .limit(1)
                .one(&self.db).await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            // Compare-and-set: only the worker that flips waiting -> active owns the job
            let claimed = job::Entity
                ::update_many()
                .col_expr(job::Column::Status, Expr::value(JobStatus::Active.as_str()))
                .col_expr(job::Column::LockedAt, Expr::value(now))
                .col_expr(job::Column::UpdatedAt, Expr::value(now))
                .filter(job::Column::Id.eq(candidate.id.clone()))
                .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
                .exec(&self.db).await?;

            if claimed.rows_affected == 1 {
                let mut owned = Job::try_from(candidate)?;
                owned.status = JobStatus::Active;
                owned.locked_at = Some(now);
                owned.updated_at = now;
                return Ok(Some(owned));
            }
        }

        Ok(None)
    }

    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        job::Entity
            ::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Completed.as_str()))
            .col_expr(job::Column::LockedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .exec(&self.db).await?;

        Ok(())
    }

    async fn reschedule(
        &self,
        id: &str,
        attempts_made: i32,
        run_at: DateTime<Utc>,
        error: &str
    ) -> Result<()> {
        job::Entity
            ::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Waiting.as_str()))
            .col_expr(job::Column::AttemptsMade, Expr::value(attempts_made))
            .col_expr(job::Column::RunAt, Expr::value(run_at))
            .col_expr(job::Column::LockedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(job::Column::LastError, Expr::value(error))
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .exec(&self.db).await?;

        Ok(())
    }

    async fn fail(&self, id: &str, attempts_made: i32, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = job::Entity
            ::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(job::Column::AttemptsMade, Expr::value(attempts_made))
            .col_expr(job::Column::LockedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(job::Column::LastError, Expr::value(error))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .exec(&self.db).await?;

        Ok(result.rows_affected == 1)
    }

    async fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        job::Entity
            ::update_many()
            .col_expr(job::Column::LockedAt, Expr::value(now))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .exec(&self.db).await?;

        Ok(())
    }

    async fn release_stale(&self, locked_before: DateTime<Utc>) -> Result<u64> {
        let result = job::Entity
            ::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Waiting.as_str()))
            .col_expr(job::Column::LockedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .filter(job::Column::LockedAt.lt(locked_before))
            .exec(&self.db).await?;

        Ok(result.rows_affected)
    }

    async fn purge_finished(&self, finished_before: DateTime<Utc>) -> Result<u64> {
        let result = job::Entity
            ::delete_many()
            .filter(
                job::Column::Status.is_in([
                    JobStatus::Completed.as_str(),
                    JobStatus::Failed.as_str(),
                ])
            )
            .filter(job::Column::UpdatedAt.lt(finished_before))
            .exec(&self.db).await?;

        Ok(result.rows_affected)
    }
}
