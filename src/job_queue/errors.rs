#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum JobQueueError {
    #[error("failed to enqueue job: {0}")]
    AddJobError(String),

    #[error("job parameters could not be serialized: {0}")]
    InvalidParams(String),
}
