use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    #[allow(dead_code)]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "dead_letter" => Some(JobStatus::DeadLetter),
            _ => None,
        }
    }
}

/// Standard job priority levels; higher runs first.
#[allow(dead_code)]
pub(crate) mod priority {
    pub(crate) const CRITICAL: i32 = 1000;
    pub(crate) const HIGH: i32 = 100;
    pub(crate) const NORMAL: i32 = 0;
    pub(crate) const LOW: i32 = -100;
}

/// A leased job.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) id: Uuid,
    #[allow(dead_code)]
    pub(crate) queue_name: String,
    pub(crate) job_type: String,
    pub(crate) payload: Value,
    #[allow(dead_code)]
    pub(crate) priority: i32,
    #[allow(dead_code)]
    pub(crate) status: JobStatus,
    pub(crate) attempts: i32,
    #[allow(dead_code)]
    pub(crate) max_attempts: i32,
    #[allow(dead_code)]
    pub(crate) scheduled_for: DateTime<Utc>,
    #[allow(dead_code)]
    pub(crate) locked_by: Option<String>,
    #[allow(dead_code)]
    pub(crate) last_error: Option<String>,
}

/// A job about to be enqueued.
#[derive(Debug, Clone)]
pub(crate) struct NewJob {
    pub(crate) job_type: String,
    pub(crate) payload: Value,
    pub(crate) priority: i32,
    pub(crate) delay_seconds: i64,
    pub(crate) max_attempts: i32,
}

impl NewJob {
    pub(crate) fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: priority::NORMAL,
            delay_seconds: 0,
            max_attempts: 3,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[allow(dead_code)]
    pub(crate) fn with_delay_seconds(mut self, delay_seconds: i64) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }
}

/// Per-queue statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct QueueStats {
    pub(crate) pending_count: i64,
    pub(crate) processing_count: i64,
    pub(crate) completed_count: i64,
    pub(crate) failed_count: i64,
    pub(crate) dead_letter_count: i64,
    pub(crate) avg_processing_time_seconds: Option<f64>,
}
