//! The background worker: a dedicated thread servicing a FIFO queue of
//! requests one at a time.
//!
//! Results leave the worker through the `deliver` function supplied with
//! each request, invoked on the worker thread. Callers that need results on
//! their own thread or event loop hop over inside that function (for
//! example by sending into a channel).

mod engine;
mod paging;

pub use engine::{Engine, EngineSettings};

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorInfo, UNEXPECTED_CODE};
use crate::request::RequestSpec;
use crate::value::PathValue;

/// Result delivered for every serviced request.
pub type Outcome = Result<PathValue, ErrorInfo>;

/// Receives the outcome of one request, exactly once.
pub type Deliver = Box<dyn FnOnce(Outcome) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Idle,
  Running,
  Stopped,
}

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("worker already started")]
  AlreadyStarted,
  #[error("worker is stopped")]
  Stopped,
  #[error("failed to spawn worker thread: {0}")]
  Spawn(#[from] std::io::Error),
}

struct Job {
  spec: RequestSpec,
  deliver: Deliver,
}

/// Single-consumer request worker.
///
/// Work submitted before [`start`](Self::start) waits in the queue. Work
/// still queued when the worker stops is abandoned without delivery.
pub struct Worker {
  state: WorkerState,
  queue: UnboundedSender<Job>,
  /// Consumer side and engine, handed to the thread on start
  pending: Option<(UnboundedReceiver<Job>, Engine)>,
  stop_flag: Arc<AtomicBool>,
  /// Cuts an idle poll short once stop is requested
  wake: Arc<Notify>,
  poll_interval: Duration,
  thread: Option<JoinHandle<()>>,
}

impl Worker {
  pub fn new(engine: Engine, poll_interval: Duration) -> Self {
    let (queue, receiver) = mpsc::unbounded_channel();
    Self {
      state: WorkerState::Idle,
      queue,
      pending: Some((receiver, engine)),
      stop_flag: Arc::new(AtomicBool::new(false)),
      wake: Arc::new(Notify::new()),
      poll_interval,
      thread: None,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Start servicing the queue on a dedicated thread.
  pub fn start(&mut self) -> Result<(), WorkerError> {
    match self.state {
      WorkerState::Running => return Err(WorkerError::AlreadyStarted),
      WorkerState::Stopped => return Err(WorkerError::Stopped),
      WorkerState::Idle => {}
    }
    let Some((receiver, engine)) = self.pending.take() else {
      return Err(WorkerError::AlreadyStarted);
    };

    let stop_flag = Arc::clone(&self.stop_flag);
    let wake = Arc::clone(&self.wake);
    let poll_interval = self.poll_interval;

    info!("Launching worker thread");
    let thread = std::thread::Builder::new()
      .name("yte-worker".into())
      .spawn(move || run(receiver, engine, &stop_flag, &wake, poll_interval))?;

    self.thread = Some(thread);
    self.state = WorkerState::Running;
    Ok(())
  }

  /// Queue a request. Never blocks.
  pub fn submit(&self, spec: RequestSpec, deliver: Deliver) -> Result<(), WorkerError> {
    if self.state == WorkerState::Stopped {
      return Err(WorkerError::Stopped);
    }
    self
      .queue
      .send(Job { spec, deliver })
      .map_err(|_| WorkerError::Stopped)
  }

  /// Signal the loop to exit and wait up to `timeout` for the request in
  /// progress to finish. Returns whether the thread exited in time; if not,
  /// it is left to finish on its own.
  pub fn stop(&mut self, timeout: Duration) -> bool {
    self.stop_flag.store(true, Ordering::Release);
    self.wake.notify_one();
    self.state = WorkerState::Stopped;
    self.pending = None;

    let Some(thread) = self.thread.take() else {
      return true;
    };

    info!("Terminating worker thread");
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() && Instant::now() < deadline {
      std::thread::sleep(EXIT_CHECK_INTERVAL);
    }

    if !thread.is_finished() {
      warn!(?timeout, "Worker thread did not stop in time; abandoning it");
      return false;
    }
    if thread.join().is_err() {
      error!("Worker thread panicked");
    }
    true
  }
}

impl Drop for Worker {
  fn drop(&mut self) {
    // Don't block in drop; the thread exits at its next poll.
    self.stop_flag.store(true, Ordering::Release);
    self.wake.notify_one();
  }
}

const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(5);

fn run(
  mut receiver: UnboundedReceiver<Job>,
  mut engine: Engine,
  stop_flag: &AtomicBool,
  wake: &Notify,
  poll_interval: Duration,
) {
  let runtime = match tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
  {
    Ok(runtime) => runtime,
    Err(e) => {
      error!(error = %e, "Failed to start worker runtime");
      return;
    }
  };

  while !stop_flag.load(Ordering::Acquire) {
    let polled = runtime.block_on(async {
      tokio::select! {
        job = receiver.recv() => Some(job),
        _ = wake.notified() => None,
        _ = tokio::time::sleep(poll_interval) => None,
      }
    });

    match polled {
      Some(Some(job)) if !stop_flag.load(Ordering::Acquire) => {
        runtime.block_on(handle(&mut engine, job))
      }
      // Stop was requested while this job waited; it is never serviced.
      Some(Some(_)) => break,
      Some(None) => break,
      None => {}
    }
  }

  info!("Worker thread has terminated");
}

/// Execute one job and deliver its outcome. Failures of any kind, panics
/// included, become an error outcome.
async fn handle(engine: &mut Engine, job: Job) {
  let Job { spec, deliver } = job;
  let started = Instant::now();
  info!(
    request = spec.name(),
    handler = spec.handler(),
    reason = spec.reason(),
    key = %spec.fingerprint(),
    refresh = spec.refresh(),
    "Handling request"
  );

  let outcome = match AssertUnwindSafe(engine.execute(&spec)).catch_unwind().await {
    Ok(Ok(result)) => Ok(result),
    Ok(Err(err)) => {
      error!(request = spec.name(), error = %err, "Request failed");
      Err(ErrorInfo::from(err))
    }
    Err(panic) => {
      let message = panic_message(panic.as_ref());
      error!(request = spec.name(), %message, "Request handler panicked");
      Err(ErrorInfo::new(UNEXPECTED_CODE, message))
    }
  };

  debug!(
    request = spec.name(),
    success = outcome.is_ok(),
    elapsed_ms = started.elapsed().as_millis() as u64,
    "Delivering result"
  );

  if std::panic::catch_unwind(AssertUnwindSafe(|| deliver(outcome))).is_err() {
    error!(request = spec.name(), "Result callback panicked");
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "request handler panicked".to_string()
  }
}
