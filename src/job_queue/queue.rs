use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::errors::JobQueueError;
use super::traits::JobHandler;
use super::traits::JobStatusRecord;
use super::traits::TaskType;
use crate::coordination::keys;
use crate::coordination::CoordinationStore;

/// Terminal status records linger this long so pollers always observe the
/// outcome of a finished job.
pub const JOB_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// messages that can be sent to the queue's dispatcher task.
enum JobQueueMsg {
    AddJob(AddJobMsg),
    Stop,
}

struct AddJobMsg {
    job_id: Uuid,
    params: serde_json::Value,
}

/// One task kind's queue: jobs enqueue without blocking, a dispatcher task
/// feeds them to the handler with at most `concurrency` running at once.
///
/// Handler errors and panics become `FAILED` status records and never take
/// the dispatcher down. The queue does not retry; the scheduler that
/// enqueued the job decides whether to try again.
pub struct JobQueue {
    task: TaskType,
    tx: mpsc::UnboundedSender<JobQueueMsg>,
    coordination: Arc<dyn CoordinationStore>,
    dispatcher_handle: JoinHandle<()>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("task", &self.task).finish()
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(JobQueueMsg::Stop);
        self.dispatcher_handle.abort();
    }
}

impl JobQueue {
    /// Create the queue and start its dispatcher. Returns immediately.
    pub fn start(
        task: TaskType,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
        coordination: Arc<dyn CoordinationStore>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobQueueMsg>();
        let (cancel_tx, cancel_rx) = watch::channel(());
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let dispatcher_coordination = coordination.clone();
        let dispatcher_handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let add_job = match msg {
                    JobQueueMsg::AddJob(m) => m,
                    JobQueueMsg::Stop => {
                        tracing::info!("JobQueue[{task}]: received stop message, stopping");
                        cancel_tx.send(()).ok();
                        break;
                    }
                };

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("job-queue semaphore is never closed");
                tracing::info!(
                    "JobQueue[{task}]: begin job {} ({} slots left)",
                    add_job.job_id,
                    semaphore.available_permits()
                );

                let handler = handler.clone();
                let coordination = dispatcher_coordination.clone();
                let job_cancel_rx = cancel_rx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let job_id = add_job.job_id;
                    let timer = tokio::time::Instant::now();

                    // the extra spawn turns a handler panic into a JoinError
                    // instead of a dead worker
                    let run_handle = tokio::spawn(async move {
                        handler.run(job_id, add_job.params, job_cancel_rx).await
                    });
                    let record = match run_handle.await {
                        Ok(Ok(resp)) => JobStatusRecord::done(resp),
                        Ok(Err(message)) => JobStatusRecord::failed(message),
                        Err(join_error) if join_error.is_panic() => {
                            JobStatusRecord::failed(format!("job panicked: {join_error}"))
                        }
                        Err(_) => JobStatusRecord::failed("job was cancelled".to_string()),
                    };

                    tracing::info!(
                        "JobQueue[{task}]: ended job {job_id} as {:?} after {:.2} secs",
                        record.status,
                        timer.elapsed().as_secs_f32()
                    );
                    write_status(&*coordination, task, job_id, &record).await;
                });
            }
            tracing::debug!("JobQueue[{task}]: dispatcher exiting");
        });

        tracing::info!("JobQueue[{task}]: started with concurrency {concurrency}");
        Self {
            task,
            tx,
            coordination,
            dispatcher_handle,
        }
    }

    /// Enqueue a job and return its id immediately. The status record exists
    /// before this returns, so a poll straight after the enqueue finds it.
    pub async fn add_job(&self, params: impl Serialize) -> Result<Uuid, JobQueueError> {
        let job_id = Uuid::new_v4();
        let params = serde_json::to_value(params)
            .map_err(|e| JobQueueError::InvalidParams(e.to_string()))?;

        write_status(
            &*self.coordination,
            self.task,
            job_id,
            &JobStatusRecord::in_progress(),
        )
        .await;

        self.tx
            .send(JobQueueMsg::AddJob(AddJobMsg { job_id, params }))
            .map_err(|e| JobQueueError::AddJobError(e.to_string()))?;
        Ok(job_id)
    }

    /// The status record of a (task, request-id) pair, if it exists and has
    /// not expired.
    pub async fn status(
        coordination: &dyn CoordinationStore,
        task: TaskType,
        request_id: &str,
    ) -> Option<JobStatusRecord> {
        let raw = coordination
            .get(&keys::job_status(&task.to_string(), request_id))
            .await?;
        serde_json::from_str(&raw).ok()
    }
}

async fn write_status(
    coordination: &dyn CoordinationStore,
    task: TaskType,
    job_id: Uuid,
    record: &JobStatusRecord,
) {
    let raw = serde_json::to_string(record).expect("status records serialize infallibly");
    coordination
        .set(
            &keys::job_status(&task.to_string(), &job_id.to_string()),
            &raw,
            Some(JOB_STATUS_TTL),
        )
        .await;
}

#[cfg(test)]
mod job_queue_tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use tracing_test::traced_test;

    use super::super::traits::JobCancelReceiver;
    use super::super::traits::JobStatus;
    use super::*;
    use crate::coordination::MemoryCoordinationStore;

    struct EchoJob;

    #[async_trait]
    impl JobHandler for EchoJob {
        async fn run(
            &self,
            _job_id: Uuid,
            params: serde_json::Value,
            _cancel_rx: JobCancelReceiver,
        ) -> Result<serde_json::Value, String> {
            match params.get("fail") {
                Some(serde_json::Value::Bool(true)) => Err("requested failure".to_string()),
                _ => Ok(params),
            }
        }
    }

    struct PanicJob;

    #[async_trait]
    impl JobHandler for PanicJob {
        async fn run(
            &self,
            _job_id: Uuid,
            _params: serde_json::Value,
            _cancel_rx: JobCancelReceiver,
        ) -> Result<serde_json::Value, String> {
            panic!("job panics unexpectedly");
        }
    }

    struct GaugeJob {
        running: Arc<AtomicUsize>,
        high_water: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for GaugeJob {
        async fn run(
            &self,
            _job_id: Uuid,
            _params: serde_json::Value,
            _cancel_rx: JobCancelReceiver,
        ) -> Result<serde_json::Value, String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    }

    async fn wait_for_terminal_status(
        coordination: &dyn CoordinationStore,
        job_id: Uuid,
    ) -> JobStatusRecord {
        for _ in 0..200 {
            if let Some(record) =
                JobQueue::status(coordination, TaskType::Sync, &job_id.to_string()).await
            {
                if record.status != JobStatus::InProgress {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal status");
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn finished_jobs_report_done_with_result() {
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let queue = JobQueue::start(TaskType::Sync, 2, Arc::new(EchoJob), coordination.clone());

        let job_id = queue
            .add_job(serde_json::json!({"wallet": "0xaa"}))
            .await
            .unwrap();

        // visible immediately after enqueue
        assert!(
            JobQueue::status(&*coordination, TaskType::Sync, &job_id.to_string())
                .await
                .is_some()
        );

        let record = wait_for_terminal_status(&*coordination, job_id).await;
        assert_eq!(JobStatus::Done, record.status);
        assert_eq!(Some(serde_json::json!({"wallet": "0xaa"})), record.resp);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn handler_errors_become_failed_status() {
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let queue = JobQueue::start(TaskType::Sync, 2, Arc::new(EchoJob), coordination.clone());

        let job_id = queue
            .add_job(serde_json::json!({"fail": true}))
            .await
            .unwrap();
        let record = wait_for_terminal_status(&*coordination, job_id).await;
        assert_eq!(JobStatus::Failed, record.status);
        assert_eq!(
            Some(serde_json::Value::String("requested failure".to_string())),
            record.resp
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn a_panicking_job_does_not_kill_the_queue() {
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let queue = JobQueue::start(TaskType::Sync, 1, Arc::new(PanicJob), coordination.clone());

        let job_id = queue.add_job(serde_json::json!({})).await.unwrap();
        let record = wait_for_terminal_status(&*coordination, job_id).await;
        assert_eq!(JobStatus::Failed, record.status);

        // the dispatcher survives and accepts more work
        let second = queue.add_job(serde_json::json!({})).await.unwrap();
        let record = wait_for_terminal_status(&*coordination, second).await;
        assert_eq!(JobStatus::Failed, record.status);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn concurrency_is_bounded() {
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let running = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(GaugeJob {
            running: running.clone(),
            high_water: high_water.clone(),
        });
        let queue = JobQueue::start(TaskType::Sync, 2, handler, coordination.clone());

        let mut job_ids = vec![];
        for _ in 0..6 {
            job_ids.push(queue.add_job(serde_json::json!({})).await.unwrap());
        }
        for job_id in job_ids {
            wait_for_terminal_status(&*coordination, job_id).await;
        }

        assert!(high_water.load(Ordering::SeqCst) <= 2);
        assert_eq!(0, running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_request_ids_have_no_status() {
        let coordination = MemoryCoordinationStore::new();
        assert!(
            JobQueue::status(&coordination, TaskType::Sync, &Uuid::new_v4().to_string())
                .await
                .is_none()
        );
    }
}
