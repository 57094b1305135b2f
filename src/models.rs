//! Core data models used throughout Lectern.
//!
//! These types represent the ingestion jobs, indexed passages, and
//! conversation records that flow through the ingestion and answer
//! pipelines.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle of an ingestion job.
///
/// Transitions are monotonic and one-directional:
/// `Pending → Processing → {Completed | Failed}`. The two final states
/// are terminal; a job never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(Error::Persistence(format!(
                "unknown job status in store: {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One document's path through the ingestion pipeline.
///
/// Created when an upload is accepted, mutated only by the
/// [`IngestionCoordinator`](crate::ingestion::IngestionCoordinator),
/// never deleted by the core.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionJob {
    pub id: String,
    pub filename: String,
    pub grade: i64,
    pub subject: String,
    pub chapter: String,
    pub status: JobStatus,
    /// Why the job failed, set when `status` is FAILED.
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Metadata carried by every indexed passage, copied from its job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub grade: i64,
    pub subject: String,
    pub chapter: String,
    pub filename: String,
    pub chunk_index: i64,
}

/// One indexed chunk of a source document.
///
/// The id is derived from the job id and chunk index
/// (`"{job_id}_{chunk_index}"`), so re-ingesting the same job overwrites
/// rather than duplicates.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub metadata: PassageMetadata,
}

/// A passage returned from a similarity query, with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Who wrote a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Student,
    Tutor,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Student => "student",
            Sender::Tutor => "tutor",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "student" => Ok(Sender::Student),
            "tutor" => Ok(Sender::Tutor),
            other => Err(Error::Persistence(format!(
                "unknown message sender in store: {}",
                other
            ))),
        }
    }
}

/// A question/answer thread owned by one student.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub student_id: String,
    pub created_at: i64,
    /// Advances every time a message is appended.
    pub updated_at: i64,
}

/// One turn in a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: Sender,
    pub content: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_store_representation() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_a_persistence_error() {
        assert!(JobStatus::parse("RUNNING").is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn sender_round_trips() {
        assert_eq!(Sender::parse("student").unwrap(), Sender::Student);
        assert_eq!(Sender::parse("tutor").unwrap(), Sender::Tutor);
        assert!(Sender::parse("admin").is_err());
    }
}
