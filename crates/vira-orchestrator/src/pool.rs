use crate::monitor::PoolMonitor;
use crate::types::{FailureKind, SubtaskError, SubtaskId, WorkerResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vira_agent::{CancelToken, RetryPolicy, WorkRequest, Worker, WorkerRole};

/// Runs a nested workflow on behalf of a parent subtask.
#[async_trait]
pub trait NestedRunner: Send + Sync {
    /// Submit `workflow_type` at nesting `depth`, wait for its terminal
    /// outcome and stop it if `cancel` is raised first.
    async fn run_nested(
        &self,
        workflow_type: &str,
        request: serde_json::Value,
        depth: u32,
        cancel: CancelToken,
    ) -> NestedOutcome;
}

/// What a [`NestedRunner`] reports back.
#[derive(Debug, Clone)]
pub struct NestedOutcome {
    pub instance_id: Option<String>,
    pub result: Result<serde_json::Value, SubtaskError>,
}

/// The work behind one submission.
pub enum JobKind {
    Prompt {
        worker: Arc<Worker>,
        request: WorkRequest,
    },
    Nested {
        workflow_type: String,
        request: serde_json::Value,
        /// Depth the child instance will run at.
        depth: u32,
    },
}

/// One subtask handed to the pool.
pub struct Job {
    pub subtask_id: SubtaskId,
    pub role: WorkerRole,
    pub kind: JobKind,
    /// Per-attempt time budget.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Place in the admission queue; resolves with a permit.
type Ticket = oneshot::Sender<OwnedSemaphorePermit>;

/// Bounded set of concurrently running workers shared by every instance.
///
/// Submissions take a ticket synchronously and a single admission task
/// hands out permits in ticket order, so work beyond the ceiling starts in
/// submission order. A requeued retry takes a fresh ticket at the back.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    admissions: OnceLock<mpsc::UnboundedSender<Ticket>>,
    ceiling: usize,
    cancel_grace: Duration,
    monitor: Arc<PoolMonitor>,
}

impl WorkerPool {
    pub fn new(ceiling: usize, cancel_grace: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            admissions: OnceLock::new(),
            ceiling,
            cancel_grace,
            monitor: Arc::new(PoolMonitor::new()),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PoolMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn monitor(&self) -> &Arc<PoolMonitor> {
        &self.monitor
    }

    /// Join the back of the admission queue. Must be called on a tokio
    /// runtime; the admission task starts with the first ticket.
    fn enqueue(&self) -> oneshot::Receiver<OwnedSemaphorePermit> {
        let (ticket, waiting) = oneshot::channel();
        let queue = self.admissions.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(admit_in_order(Arc::clone(&self.permits), rx));
            tx
        });
        // If the admission task is gone the ticket is dropped and the
        // waiter sees a closed pool.
        let _ = queue.send(ticket);
        waiting
    }

    /// Open a result channel for one workflow instance.
    pub fn session(
        self: &Arc<Self>,
        instance_id: impl Into<String>,
        cancel: CancelToken,
        nested: Option<Arc<dyn NestedRunner>>,
    ) -> PoolSession {
        let (tx, rx) = mpsc::unbounded_channel();
        PoolSession {
            pool: Arc::clone(self),
            instance_id: instance_id.into(),
            cancel,
            nested,
            tx,
            rx,
            in_flight: 0,
        }
    }

    async fn run_prompt(
        self: Arc<Self>,
        run: PromptRun,
        cancel: CancelToken,
        mut ticket: oneshot::Receiver<OwnedSemaphorePermit>,
    ) -> WorkerResult {
        let PromptRun {
            instance_id,
            subtask_id: job_id,
            role,
            worker,
            request,
            timeout,
            retry,
        } = run;
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return finished(job_id, Err(SubtaskError::cancelled()), attempts, started);
                }
                permit = &mut ticket => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = SubtaskError::new(FailureKind::Internal, "worker pool closed");
                        return finished(job_id, Err(err), attempts, started);
                    }
                },
            };

            attempts += 1;
            self.monitor.start(role).await;
            debug!(instance_id = %instance_id, subtask = %job_id, attempt = attempts, "Subtask admitted");
            let attempt_started = Instant::now();
            let mut attempt_request = request.clone();
            attempt_request.attempt = attempts;
            let outcome = self
                .run_attempt(Arc::clone(&worker), attempt_request, role, timeout, &cancel)
                .await;
            // Leave the gauge before the slot is handed to the next waiter.
            self.monitor
                .finish(role, outcome.is_ok(), attempt_started.elapsed())
                .await;
            drop(permit);

            match outcome {
                Ok(payload) => return finished(job_id, Ok(payload), attempts, started),
                Err(err)
                    if err.kind.is_transient()
                        && retry.allows_another(attempts)
                        && !cancel.is_cancelled() =>
                {
                    let delay = retry.backoff_for(attempts);
                    warn!(
                        instance_id = %instance_id,
                        subtask = %job_id,
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient failure, requeueing subtask"
                    );
                    self.monitor.record_retry(role).await;
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return finished(job_id, Err(SubtaskError::cancelled()), attempts, started);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    ticket = self.enqueue();
                }
                Err(err) => {
                    if err.kind != FailureKind::Cancelled {
                        warn!(
                            instance_id = %instance_id,
                            subtask = %job_id,
                            attempts,
                            error = %err,
                            "Subtask failed terminally"
                        );
                    }
                    return finished(job_id, Err(err), attempts, started);
                }
            }
        }
    }

    /// Execute one attempt under its timeout and the instance's cancel token.
    async fn run_attempt(
        &self,
        worker: Arc<Worker>,
        request: WorkRequest,
        role: WorkerRole,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SubtaskError> {
        let token = cancel.child();
        let worker_token = token.clone();
        let mut handle =
            tokio::spawn(async move { worker.execute(&request, &worker_token).await });

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(err)) => Err(SubtaskError::from(&err)),
                Err(join_err) => Err(SubtaskError::new(
                    FailureKind::Internal,
                    format!("worker task failed: {join_err}"),
                )),
            },
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                handle.abort();
                self.monitor.record_timeout(role).await;
                Err(SubtaskError::new(
                    FailureKind::Timeout,
                    format!("attempt exceeded {} ms", timeout.as_millis()),
                ))
            }
            _ = cancel.cancelled() => {
                token.cancel();
                if tokio::time::timeout(self.cancel_grace, &mut handle).await.is_err() {
                    warn!(role = %role, "Worker ignored cancellation, aborting");
                    handle.abort();
                }
                Err(SubtaskError::cancelled())
            }
        }
    }
}

struct PromptRun {
    instance_id: String,
    subtask_id: SubtaskId,
    role: WorkerRole,
    worker: Arc<Worker>,
    request: WorkRequest,
    timeout: Duration,
    retry: RetryPolicy,
}

fn finished(
    subtask_id: SubtaskId,
    outcome: Result<serde_json::Value, SubtaskError>,
    attempts: u32,
    started: Instant,
) -> WorkerResult {
    WorkerResult {
        subtask_id,
        outcome,
        attempts,
        duration: started.elapsed(),
        nested_instance: None,
    }
}

/// Serve tickets strictly in arrival order, one permit at a time.
async fn admit_in_order(
    permits: Arc<Semaphore>,
    mut queue: mpsc::UnboundedReceiver<Ticket>,
) {
    while let Some(ticket) = queue.recv().await {
        if ticket.is_closed() {
            continue;
        }
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        // A waiter that gave up in the meantime hands the permit straight back.
        let _ = ticket.send(permit);
    }
}

/// Run `body` on its own task so that a panic still produces a result for
/// the executor.
async fn supervised<F>(subtask_id: SubtaskId, body: F) -> WorkerResult
where
    F: Future<Output = WorkerResult> + Send + 'static,
{
    let started = Instant::now();
    match tokio::spawn(body).await {
        Ok(result) => result,
        Err(join_err) => {
            warn!(subtask = %subtask_id, error = %join_err, "Subtask task died");
            let err = SubtaskError::new(
                FailureKind::Internal,
                format!("subtask task failed: {join_err}"),
            );
            finished(subtask_id, Err(err), 1, started)
        }
    }
}

/// Per-instance view of the pool: submissions and their results.
pub struct PoolSession {
    pool: Arc<WorkerPool>,
    instance_id: String,
    cancel: CancelToken,
    nested: Option<Arc<dyn NestedRunner>>,
    tx: mpsc::UnboundedSender<WorkerResult>,
    rx: mpsc::UnboundedReceiver<WorkerResult>,
    in_flight: usize,
}

impl PoolSession {
    /// Hand a job to the pool. The result arrives through [`PoolSession::await_any`].
    pub fn submit(&mut self, job: Job) -> JoinHandle<()> {
        self.in_flight += 1;
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let instance_id = self.instance_id.clone();
        info!(instance_id = %instance_id, subtask = %job.subtask_id, role = %job.role, "Subtask submitted");

        match job.kind {
            JobKind::Prompt { worker, request } => {
                let pool = Arc::clone(&self.pool);
                // Taken here, in submission order, not inside the spawned task.
                let ticket = pool.enqueue();
                let run = PromptRun {
                    instance_id,
                    subtask_id: job.subtask_id.clone(),
                    role: job.role,
                    worker,
                    request,
                    timeout: job.timeout,
                    retry: job.retry,
                };
                let subtask_id = job.subtask_id;
                tokio::spawn(async move {
                    let body = pool.run_prompt(run, cancel, ticket);
                    let _ = tx.send(supervised(subtask_id, body).await);
                })
            }
            JobKind::Nested {
                workflow_type,
                request,
                depth,
            } => {
                let runner = self.nested.clone();
                let subtask_id = job.subtask_id.clone();
                let body = async move {
                    let started = Instant::now();
                    let outcome = match runner {
                        Some(runner) => {
                            runner
                                .run_nested(&workflow_type, request, depth, cancel)
                                .await
                        }
                        None => NestedOutcome {
                            instance_id: None,
                            result: Err(SubtaskError::new(
                                FailureKind::Internal,
                                "nested workflows need an engine",
                            )),
                        },
                    };
                    let mut result = finished(subtask_id, outcome.result, 1, started);
                    result.nested_instance = outcome.instance_id;
                    result
                };
                let supervised_id = job.subtask_id;
                tokio::spawn(async move {
                    let _ = tx.send(supervised(supervised_id, body).await);
                })
            }
        }
    }

    /// Next completed result in completion order, or `None` when nothing is
    /// in flight.
    pub async fn await_any(&mut self) -> Option<WorkerResult> {
        if self.in_flight == 0 {
            return None;
        }
        let result = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(result)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vira_agent::{Capabilities, CompletionOptions, CompletionProvider, RoleProfile};
    use vira_core::ProviderError;

    /// Fails with `kind` for the first `failures` calls, then answers.
    struct Flaky {
        failures: u32,
        kind: Option<vira_core::ProviderErrorKind>,
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.kind {
                Some(kind) if n < self.failures => Err(ProviderError::new(kind, "injected")),
                _ => Ok(format!("call {n}")),
            }
        }
    }

    fn flaky(failures: u32, kind: Option<vira_core::ProviderErrorKind>, delay: Duration) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            kind,
            delay,
            calls: AtomicU32::new(0),
        })
    }

    /// Records the order in which subtasks reach the provider.
    #[derive(Default)]
    struct Recorder {
        order: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionProvider for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            let id = prompt
                .lines()
                .find_map(|line| line.strip_prefix("Subtask: "))
                .unwrap_or("?")
                .trim()
                .to_string();
            self.order.lock().push(id);
            Ok("ok".into())
        }
    }

    fn job(id: &str, provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Job {
        let profile = RoleProfile {
            role: WorkerRole::Developer,
            system_prompt: "dev".into(),
            options: CompletionOptions::default(),
            allowed_tools: vec![],
        };
        Job {
            subtask_id: id.into(),
            role: WorkerRole::Developer,
            kind: JobKind::Prompt {
                worker: Arc::new(Worker::new(profile, Capabilities::new(provider))),
                request: WorkRequest {
                    instance_id: "i".into(),
                    subtask_id: id.into(),
                    instruction: "x".into(),
                    tools: vec![],
                    context: vec![],
                    attempt: 0,
                },
            },
            timeout,
            retry: RetryPolicy {
                max_retries: 2,
                backoff_base_ms: 5,
                backoff_factor: 2,
                backoff_max_ms: 20,
            },
        }
    }

    fn pool(ceiling: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(ceiling, Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_success_reports_one_attempt() {
        let pool = pool(2);
        let mut session = pool.session("i", CancelToken::new(), None);
        session.submit(job("a", flaky(0, None, Duration::ZERO), Duration::from_secs(1)));
        let result = session.await_any().await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.outcome.unwrap(), "call 0");
        assert!(session.await_any().await.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let pool = pool(1);
        let provider = flaky(1, Some(vira_core::ProviderErrorKind::RateLimited), Duration::ZERO);
        let mut session = pool.session("i", CancelToken::new(), None);
        session.submit(job("a", provider.clone(), Duration::from_secs(1)));
        let result = session.await_any().await.unwrap();
        assert_eq!(result.attempts, 2);
        assert!(result.outcome.is_ok());
        assert_eq!(pool.monitor().role_metrics(WorkerRole::Developer).await.retries, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_total_executions() {
        let pool = pool(1);
        let provider = flaky(10, Some(vira_core::ProviderErrorKind::Unavailable), Duration::ZERO);
        let mut session = pool.session("i", CancelToken::new(), None);
        session.submit(job("a", provider.clone(), Duration::from_secs(1)));
        let result = session.await_any().await.unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.outcome.unwrap_err().kind, FailureKind::Unavailable);
    }

    #[tokio::test]
    async fn test_terminal_failure_not_retried() {
        let pool = pool(1);
        let provider = flaky(10, Some(vira_core::ProviderErrorKind::InvalidRequest), Duration::ZERO);
        let mut session = pool.session("i", CancelToken::new(), None);
        session.submit(job("a", provider.clone(), Duration::from_secs(1)));
        let result = session.await_any().await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.outcome.unwrap_err().kind, FailureKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let pool = pool(1);
        let provider = flaky(0, None, Duration::from_millis(500));
        let mut session = pool.session("i", CancelToken::new(), None);
        session.submit(job("a", provider, Duration::from_millis(20)));
        let result = session.await_any().await.unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(result.outcome.unwrap_err().kind, FailureKind::Timeout);
        assert_eq!(pool.monitor().role_metrics(WorkerRole::Developer).await.timeouts, 2);
    }

    #[tokio::test]
    async fn test_ceiling_is_respected() {
        let pool = pool(2);
        let mut session = pool.session("i", CancelToken::new(), None);
        for id in ["a", "b", "c", "d", "e"] {
            session.submit(job(id, flaky(0, None, Duration::from_millis(30)), Duration::from_secs(1)));
        }
        let mut done = 0;
        while session.await_any().await.is_some() {
            done += 1;
        }
        assert_eq!(done, 5);
        assert_eq!(pool.monitor().peak_running(), 2);
        assert_eq!(pool.monitor().running(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_admission_follows_submission_order() {
        for _ in 0..10 {
            let pool = pool(1);
            let recorder = Arc::new(Recorder::default());
            let mut session = pool.session("i", CancelToken::new(), None);
            let ids: Vec<String> = (0..30).map(|n| format!("j{n:02}")).collect();
            for id in &ids {
                session.submit(job(id, recorder.clone(), Duration::from_secs(5)));
            }
            while session.await_any().await.is_some() {}
            assert_eq!(*recorder.order.lock(), ids);
        }
    }

    #[tokio::test]
    async fn test_retry_rejoins_the_back_of_the_queue() {
        let pool = pool(1);
        let recorder = Arc::new(Recorder::default());
        let flaky_provider = flaky(1, Some(vira_core::ProviderErrorKind::RateLimited), Duration::ZERO);
        let mut session = pool.session("i", CancelToken::new(), None);
        let mut first = job("a", flaky_provider.clone(), Duration::from_secs(1));
        first.retry.backoff_base_ms = 200;
        first.retry.backoff_max_ms = 200;
        session.submit(first);
        session.submit(job("b", recorder.clone(), Duration::from_secs(1)));
        session.submit(job("c", recorder.clone(), Duration::from_secs(1)));

        let mut finished_ids = Vec::new();
        while let Some(result) = session.await_any().await {
            assert!(result.outcome.is_ok());
            finished_ids.push(result.subtask_id);
        }
        // "a" failed once, backed off and was admitted again after b and c.
        assert_eq!(*recorder.order.lock(), vec!["b", "c"]);
        assert_eq!(finished_ids.last().map(String::as_str), Some("a"));
        assert_eq!(flaky_provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_job_still_reports_a_result() {
        struct Exploding;

        #[async_trait]
        impl NestedRunner for Exploding {
            async fn run_nested(
                &self,
                _workflow_type: &str,
                _request: serde_json::Value,
                _depth: u32,
                _cancel: CancelToken,
            ) -> NestedOutcome {
                panic!("decomposition bug");
            }
        }

        let pool = pool(1);
        let mut session = pool.session("i", CancelToken::new(), Some(Arc::new(Exploding)));
        session.submit(Job {
            subtask_id: "child".into(),
            role: WorkerRole::Orchestrator,
            kind: JobKind::Nested {
                workflow_type: "PlanningWorkflow".into(),
                request: serde_json::json!("x"),
                depth: 1,
            },
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        });
        let result = tokio::time::timeout(Duration::from_secs(2), session.await_any())
            .await
            .expect("a panicking job must not hang the session")
            .unwrap();
        assert_eq!(result.subtask_id, "child");
        assert_eq!(result.outcome.unwrap_err().kind, FailureKind::Internal);
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_and_queued() {
        let pool = pool(1);
        let cancel = CancelToken::new();
        let mut session = pool.session("i", cancel.clone(), None);
        session.submit(job("a", flaky(0, None, Duration::from_secs(5)), Duration::from_secs(10)));
        session.submit(job("b", flaky(0, None, Duration::from_secs(5)), Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let first = session.await_any().await.unwrap();
        let second = session.await_any().await.unwrap();
        for result in [first, second] {
            assert_eq!(result.outcome.unwrap_err().kind, FailureKind::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_nested_without_runner_fails() {
        let pool = pool(1);
        let mut session = pool.session("i", CancelToken::new(), None);
        session.submit(Job {
            subtask_id: "child".into(),
            role: WorkerRole::Orchestrator,
            kind: JobKind::Nested {
                workflow_type: "ResearchWorkflow".into(),
                request: serde_json::json!("x"),
                depth: 1,
            },
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        });
        let result = session.await_any().await.unwrap();
        assert_eq!(result.outcome.unwrap_err().kind, FailureKind::Internal);
    }
}
