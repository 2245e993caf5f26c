//! Single-flight FIFO task executor.
//!
//! [`TaskExecutor::submit`] queues an async invocation and returns a
//! [`Completion`] that resolves exactly once. Invocations run strictly one
//! at a time in submission order: the next one does not start until the
//! previous one has finished, succeeded or failed, and a short yield delay
//! has elapsed.
//!
//! Each invocation runs in its own Tokio task, so a panic counts as a
//! failure of that invocation and the queue keeps draining.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use kontur_pipeline::{NoopObserver, Observer};
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send>;

/// Executor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Pause between one invocation finishing and the next starting.
    pub yield_delay: Duration,

    /// How long a failure message is shown via
    /// [`Observer::user_message`].
    pub failure_message_duration: Duration,
}

impl ExecutorConfig {
    /// Default pause between invocations.
    pub const DEFAULT_YIELD_DELAY: Duration = Duration::from_millis(50);

    /// Default display time for failure messages.
    pub const DEFAULT_FAILURE_MESSAGE_DURATION: Duration = Duration::from_secs(5);
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            yield_delay: Self::DEFAULT_YIELD_DELAY,
            failure_message_duration: Self::DEFAULT_FAILURE_MESSAGE_DURATION,
        }
    }
}

/// Why a [`Completion`] did not yield a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// The invocation ran and returned an error.
    #[error("{0}")]
    Failed(E),

    /// The task was discarded before settling: removed by
    /// [`TaskExecutor::clear`], or its invocation panicked.
    #[error("task was dropped before it completed")]
    Dropped,
}

/// Settles once with the outcome of a submitted invocation.
///
/// Dropping a `Completion` does not cancel the task.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|settled| match settled {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::Failed(e)),
            Err(_) => Err(TaskError::Dropped),
        })
    }
}

struct Task {
    description: String,
    job: Job,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    running: bool,
    current: Option<String>,
}

struct Shared {
    state: Mutex<State>,
    observer: Arc<dyn Observer>,
    config: ExecutorConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes async invocations into a one-at-a-time FIFO queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskExecutor {
    shared: Arc<Shared>,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoopObserver), ExecutorConfig::default())
    }
}

impl TaskExecutor {
    /// Create an idle executor reporting to `observer`.
    #[must_use]
    pub fn new(observer: Arc<dyn Observer>, config: ExecutorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                observer,
                config,
            }),
        }
    }

    /// Queue `invocation` behind every task submitted before it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while the executor is
    /// idle, since a drain task has to be spawned.
    pub fn submit<F, Fut, T, E>(
        &self,
        description: impl Into<String>,
        invocation: F,
    ) -> Completion<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let outcome = invocation().await;
                let report = outcome.as_ref().map(|_| ()).map_err(ToString::to_string);
                // The caller may have dropped its completion.
                let _ = tx.send(outcome);
                report
            })
        });
        let task = Task {
            description: description.into(),
            job,
        };

        let start_drain = {
            let mut state = self.shared.lock();
            state.queue.push_back(task);
            !std::mem::replace(&mut state.running, true)
        };
        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.shared)));
        }
        Completion { rx }
    }

    /// Drop every task that has not started yet.
    ///
    /// Their completions resolve to [`TaskError::Dropped`]. An invocation
    /// already in flight is not affected, and the executor reports idle
    /// once it finishes.
    pub fn clear(&self) {
        let dropped: Vec<Task> = self.shared.lock().queue.drain(..).collect();
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "cleared queued tasks");
        }
    }

    /// Number of tasks waiting to start.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Whether a drain loop is active (a task running or about to run).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Description of the task currently running, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<String> {
        self.shared.lock().current.clone()
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.lock();
            let Some(task) = state.queue.pop_front() else {
                state.running = false;
                state.current = None;
                return;
            };
            state.current = Some(task.description.clone());
            task
        };

        run(&shared, task).await;
        shared.lock().current = None;
        tokio::time::sleep(shared.config.yield_delay).await;
    }
}

async fn run(shared: &Shared, task: Task) {
    let Task { description, job } = task;
    shared.observer.progress_started(&description);
    let _ended = ProgressGuard(shared.observer.as_ref());
    tracing::debug!(task = %description, "task started");

    let outcome = match tokio::spawn(job()).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err("task panicked".to_owned()),
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(()) => tracing::debug!(task = %description, "task finished"),
        Err(message) => {
            tracing::warn!(task = %description, error = %message, "task failed");
            shared.observer.user_message(
                &format!("{description} failed: {message}"),
                shared.config.failure_message_duration,
            );
        }
    }
}

/// Emits `progress_ended` when dropped.
struct ProgressGuard<'a>(&'a dyn Observer);

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.progress_ended();
    }
}
