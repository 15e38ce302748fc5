use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// Senders get notified when the queue wants a job to wind down.
pub type JobCancelSender = watch::Sender<()>;
pub type JobCancelReceiver = watch::Receiver<()>;

/// The kinds of work this queue dispatches. Each kind has its own handler
/// and concurrency bound; status keys are namespaced by the serialized
/// name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum TaskType {
    #[strum(serialize = "sync")]
    Sync,
}

/// Terminal and non-terminal job states as exposed to status probes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Done,
    Failed,
}

/// The per-job record kept in the coordination store under
/// `{task}:::{request_id}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobStatusRecord {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp: Option<serde_json::Value>,
}

impl JobStatusRecord {
    pub fn in_progress() -> Self {
        JobStatusRecord {
            status: JobStatus::InProgress,
            resp: None,
        }
    }

    pub fn done(resp: serde_json::Value) -> Self {
        JobStatusRecord {
            status: JobStatus::Done,
            resp: Some(resp),
        }
    }

    pub fn failed(message: String) -> Self {
        JobStatusRecord {
            status: JobStatus::Failed,
            resp: Some(serde_json::Value::String(message)),
        }
    }
}

/// Implemented by each task kind's worker. Errors are plain strings here;
/// the handler is the boundary where typed errors become status records.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(
        &self,
        job_id: Uuid,
        params: serde_json::Value,
        cancel_rx: JobCancelReceiver,
    ) -> Result<serde_json::Value, String>;
}
