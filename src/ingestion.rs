//! Ingestion job state machine and pipeline orchestration.
//!
//! A job moves `PENDING → PROCESSING → {COMPLETED | FAILED}` and never
//! leaves a terminal state. Entry into PROCESSING is an atomic claim
//! (compare-and-swap on status), so dispatching the same job twice gets a
//! rejected claim instead of a second pipeline run.
//!
//! The pipeline itself: locate the uploaded file, extract its text, chunk
//! it, build one passage per chunk with the job's metadata, and upsert the
//! whole batch into the vector index. Any failure marks the job FAILED
//! (recording why) and propagates to the caller — the job is left in a
//! terminal state on every exit path.

use std::path::{Path, PathBuf};

use sqlx::{Row, SqlitePool};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunker::chunk_text;
use crate::error::{Error, Result};
use crate::extract;
use crate::index::VectorIndex;
use crate::models::{IngestionJob, JobStatus, Passage, PassageMetadata};

pub const MIN_GRADE: i64 = 1;
pub const MAX_GRADE: i64 = 12;

#[derive(Clone)]
pub struct IngestionCoordinator {
    pool: SqlitePool,
    index: VectorIndex,
    upload_dir: PathBuf,
    chunk_size: usize,
    overlap: usize,
}

impl IngestionCoordinator {
    pub fn new(
        pool: SqlitePool,
        index: VectorIndex,
        upload_dir: impl Into<PathBuf>,
        chunk_size: usize,
        overlap: usize,
    ) -> Self {
        Self {
            pool,
            index,
            upload_dir: upload_dir.into(),
            chunk_size,
            overlap,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Write accepted upload bytes into the upload directory.
    pub fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.upload_dir)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        std::fs::write(self.upload_dir.join(filename), bytes)
            .map_err(|e| Error::Persistence(format!("failed to save {}: {}", filename, e)))
    }

    /// Accept an upload: validate, insert a PENDING job row.
    pub async fn create_job(
        &self,
        filename: &str,
        grade: i64,
        subject: &str,
        chapter: &str,
    ) -> Result<IngestionJob> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("filename must not be empty".to_string()));
        }
        if !extract::is_supported(filename) {
            return Err(Error::Validation(format!(
                "unsupported file type: {} (expected one of: pdf, txt, md)",
                filename
            )));
        }
        if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
            return Err(Error::Validation(format!(
                "grade must be between {} and {}, got {}",
                MIN_GRADE, MAX_GRADE, grade
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (id, filename, grade, subject, chapter, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(filename)
        .bind(grade)
        .bind(subject)
        .bind(chapter)
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(job_id = %id, filename, grade, "created ingestion job");

        Ok(IngestionJob {
            id,
            filename: filename.to_string(),
            grade,
            subject: subject.to_string(),
            chapter: chapter.to_string(),
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_job(&self, job_id: &str) -> Result<IngestionJob> {
        let row = sqlx::query(
            "SELECT id, filename, grade, subject, chapter, status, error, created_at, updated_at \
             FROM ingestion_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("ingestion job not found: {}", job_id)))?;

        job_from_row(&row)
    }

    /// All jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<IngestionJob>> {
        let rows = sqlx::query(
            "SELECT id, filename, grade, subject, chapter, status, error, created_at, updated_at \
             FROM ingestion_jobs ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Atomically move a PENDING job to PROCESSING. Exactly one caller
    /// wins; anyone else gets `Validation` (or `NotFound` for an unknown
    /// id).
    pub async fn claim(&self, job_id: &str) -> Result<IngestionJob> {
        let now = chrono::Utc::now().timestamp();
        let claimed = sqlx::query(
            "UPDATE ingestion_jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Processing.as_str())
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if claimed.rows_affected() == 0 {
            let current = self.get_job(job_id).await?;
            return Err(Error::Validation(format!(
                "job {} is {}, not PENDING — refusing duplicate claim",
                job_id,
                current.status.as_str()
            )));
        }

        self.get_job(job_id).await
    }

    /// Claim the oldest PENDING job, if any. Races between workers settle
    /// through the compare-and-swap: the loser just looks again.
    pub async fn claim_next_pending(&self) -> Result<Option<IngestionJob>> {
        loop {
            let candidate: Option<String> = sqlx::query_scalar(
                "SELECT id FROM ingestion_jobs WHERE status = ? ORDER BY created_at, id LIMIT 1",
            )
            .bind(JobStatus::Pending.as_str())
            .fetch_optional(&self.pool)
            .await?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            match self.claim(&id).await {
                Ok(job) => return Ok(Some(job)),
                Err(Error::Validation(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Claim and process a job; returns the number of passages indexed.
    pub async fn start(&self, job_id: &str) -> Result<usize> {
        let job = self.claim(job_id).await?;
        self.run_claimed(&job).await
    }

    /// Drive an already-claimed job to a terminal state.
    pub async fn run_claimed(&self, job: &IngestionJob) -> Result<usize> {
        info!(job_id = %job.id, filename = %job.filename, "processing ingestion job");

        match self.process(job).await {
            Ok(count) => {
                self.mark_terminal(&job.id, JobStatus::Completed, None).await?;
                info!(job_id = %job.id, passages = count, "ingestion completed");
                Ok(count)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "ingestion failed");
                if let Err(mark_err) = self
                    .mark_terminal(&job.id, JobStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    error!(job_id = %job.id, error = %mark_err, "could not record job failure");
                }
                Err(e)
            }
        }
    }

    async fn process(&self, job: &IngestionJob) -> Result<usize> {
        let path = self.upload_dir.join(&job.filename);
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "source file not found: {}",
                path.display()
            )));
        }

        let text = extract::extract_text(&path)?;
        let chunks = chunk_text(&text, self.chunk_size, self.overlap);

        let passages: Vec<Passage> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Passage {
                id: format!("{}_{}", job.id, i),
                text: chunk,
                metadata: PassageMetadata {
                    grade: job.grade,
                    subject: job.subject.clone(),
                    chapter: job.chapter.clone(),
                    filename: job.filename.clone(),
                    chunk_index: i as i64,
                },
            })
            .collect();

        self.index.upsert(&passages).await?;
        Ok(passages.len())
    }

    /// Move a PROCESSING job into a terminal state. The status guard keeps
    /// terminal rows immutable.
    async fn mark_terminal(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE ingestion_jobs SET status = ?, error = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<IngestionJob> {
    let status: String = row.get("status");
    Ok(IngestionJob {
        id: row.get("id"),
        filename: row.get("filename"),
        grade: row.get("grade"),
        subject: row.get("subject"),
        chapter: row.get("chapter"),
        status: JobStatus::parse(&status)?,
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
