//! A durable-ish asynchronous work queue shared by sync work and any other
//! background processing: jobs enqueue immediately, handlers run with
//! bounded concurrency, and every job leaves a status record that status
//! probes can read for a day after completion.

pub mod errors;
pub mod queue;
pub mod traits;

pub use errors::JobQueueError;
pub use queue::JobQueue;
pub use queue::JOB_STATUS_TTL;
pub use traits::JobCancelReceiver;
pub use traits::JobCancelSender;
pub use traits::JobHandler;
pub use traits::JobStatus;
pub use traits::JobStatusRecord;
pub use traits::TaskType;
