//! Front door to the worker.
//!
//! The manager owns the worker's lifecycle, tracks whether this session has
//! authorized, and folds identical read-only requests into one already
//! queued or running, as long as nothing else was submitted in between.

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheStorage, FileStorage, NoopStorage};
use crate::config::Config;
use crate::crypto::Cipher;
use crate::request::{Request, RequestSpec};
use crate::worker::{Engine, EngineSettings, Outcome, Worker, WorkerError, WorkerState};
use crate::youtube::{Authenticator, CredentialStore, OAuthAuthenticator};

/// Receives the request as submitted along with its outcome.
pub type Callback = Box<dyn FnOnce(&RequestSpec, Outcome) + Send + 'static>;

/// Callers sharing one queued execution.
type Waiters = Arc<Mutex<Vec<(RequestSpec, Callback)>>>;

/// Executions still open for joining, by request identity.
type InFlight = Arc<Mutex<HashMap<RequestSpec, Waiters>>>;

pub struct Manager {
  worker: Worker,
  authenticator: Arc<dyn Authenticator>,
  authorized: Arc<AtomicBool>,
  in_flight: InFlight,
  shutdown_timeout: Duration,
}

impl Manager {
  /// Wire the worker, cache and authenticator from configuration. The
  /// worker starts with the first request.
  pub fn new(config: &Config) -> Result<Self> {
    let cipher = Cipher::builtin()?;
    let credentials = CredentialStore::new(config.credentials_file()?, cipher.clone());
    let authenticator = Arc::new(OAuthAuthenticator::new(
      config.oauth.clone(),
      config.api.clone(),
      credentials,
      Config::bootstrap_refresh_token(),
    ));

    let storage: Box<dyn CacheStorage> = if config.cache.cache_downloaded_data {
      let cipher = config.cache.encrypt_cache.then_some(cipher);
      Box::new(FileStorage::new(config.cache_file()?, cipher))
    } else {
      Box::new(NoopStorage)
    };

    let settings = EngineSettings {
      page_size: config.api.page_size,
      batch_size: config.api.batch_size,
      playlist_video_purge: config.cache.playlist_video_purge,
    };

    Ok(Self::with_parts(
      authenticator,
      storage,
      settings,
      config.worker.poll_interval(),
      config.worker.shutdown_timeout(),
    ))
  }

  pub fn with_parts(
    authenticator: Arc<dyn Authenticator>,
    storage: Box<dyn CacheStorage>,
    settings: EngineSettings,
    poll_interval: Duration,
    shutdown_timeout: Duration,
  ) -> Self {
    let engine = Engine::new(Arc::clone(&authenticator), storage, settings);
    Self {
      worker: Worker::new(engine, poll_interval),
      authenticator,
      authorized: Arc::new(AtomicBool::new(false)),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      shutdown_timeout,
    }
  }

  /// Whether credentials were persisted by an earlier session. Does not
  /// validate them.
  pub fn has_credentials(&self) -> bool {
    self.authenticator.has_credentials()
  }

  /// Whether an `authorize` request has succeeded in this session, with no
  /// `deauthorize` since.
  pub fn is_authorized(&self) -> bool {
    self.authorized.load(Ordering::Acquire)
  }

  /// Submit a request; `callback` runs on the worker thread with the result.
  ///
  /// Starts the worker on first use. Fails only once the manager has been
  /// shut down.
  pub fn request<F>(&mut self, spec: RequestSpec, callback: F) -> Result<(), WorkerError>
  where
    F: FnOnce(&RequestSpec, Outcome) + Send + 'static,
  {
    if self.worker.state() == WorkerState::Idle {
      self.worker.start()?;
    }

    if !coalescable(&spec) {
      // Later reads must observe whatever this one does, so nothing queued
      // before it can be joined any more.
      lock(&self.in_flight).clear();
      let authorized = Arc::clone(&self.authorized);
      return self.worker.submit(
        spec.clone(),
        Box::new(move |outcome| {
          track_authorization(&authorized, &spec, &outcome);
          callback(&spec, outcome);
        }),
      );
    }

    let callback: Callback = Box::new(callback);
    let mut in_flight = lock(&self.in_flight);
    if let Some(waiters) = in_flight.get(&spec) {
      debug!(request = spec.name(), key = %spec.fingerprint(), "Joining identical request in flight");
      lock(waiters).push((spec, callback));
      return Ok(());
    }
    // Only the most recent submission stays joinable.
    in_flight.clear();

    let waiters: Waiters = Arc::new(Mutex::new(vec![(spec.clone(), callback)]));
    in_flight.insert(spec.clone(), Arc::clone(&waiters));
    drop(in_flight);

    let registry = Arc::clone(&self.in_flight);
    let key = spec.clone();
    let shared = Arc::clone(&waiters);
    let failed_key = key.clone();
    let submitted = self.worker.submit(
      spec,
      Box::new(move |outcome| {
        close(&registry, &key, &shared);
        let callers = std::mem::take(&mut *lock(&shared));
        for (spec, callback) in callers {
          callback(&spec, outcome.clone());
        }
      }),
    );

    if submitted.is_err() {
      close(&self.in_flight, &failed_key, &waiters);
    }
    submitted
  }

  /// Stop the worker, waiting up to the configured timeout for the request
  /// in progress. Queued requests are dropped without delivery.
  pub fn shutdown(&mut self) -> bool {
    if self.worker.state() == WorkerState::Stopped {
      return true;
    }
    info!("Shutting down request manager");
    self.worker.stop(self.shutdown_timeout)
  }
}

impl Drop for Manager {
  fn drop(&mut self) {
    self.shutdown();
  }
}

/// Identical read-only requests can share one execution. Refreshes, session
/// requests and updates always run on their own.
fn coalescable(spec: &RequestSpec) -> bool {
  !spec.refresh() && Request::parse(spec).is_ok_and(|request| request.is_read_only())
}

fn track_authorization(authorized: &AtomicBool, spec: &RequestSpec, outcome: &Outcome) {
  match spec.name() {
    Request::AUTHORIZE => authorized.store(outcome.is_ok(), Ordering::Release),
    Request::DEAUTHORIZE => authorized.store(false, Ordering::Release),
    _ => {}
  }
}

/// Stop `waiters` from taking new callers, unless a newer execution of the
/// same request already took its place.
fn close(in_flight: &Mutex<HashMap<RequestSpec, Waiters>>, key: &RequestSpec, waiters: &Waiters) {
  let mut in_flight = lock(in_flight);
  if in_flight
    .get(key)
    .is_some_and(|current| Arc::ptr_eq(current, waiters))
  {
    in_flight.remove(key);
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::PathValue;
  use crate::youtube::testing::{items, FakeApi, FakeAuthenticator};
  use crate::youtube::{ListFilter, Resource};
  use serde_json::json;
  use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
  use tokio::time::timeout;

  const WAIT: Duration = Duration::from_secs(5);

  type Results = UnboundedReceiver<(RequestSpec, Outcome)>;

  fn manager(auth: Arc<FakeAuthenticator>, shutdown_timeout: Duration) -> Manager {
    Manager::with_parts(
      auth,
      Box::new(NoopStorage),
      EngineSettings::default(),
      Duration::from_millis(10),
      shutdown_timeout,
    )
  }

  fn reply(
    tx: &UnboundedSender<(RequestSpec, Outcome)>,
  ) -> impl FnOnce(&RequestSpec, Outcome) + Send + 'static {
    let tx = tx.clone();
    move |spec, outcome| {
      let _ = tx.send((spec.clone(), outcome));
    }
  }

  async fn next(rx: &mut Results) -> (RequestSpec, Outcome) {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
  }

  fn videos(id: &str) -> RequestSpec {
    RequestSpec::new("video_details").with_param("video_id", id)
  }

  async fn authorize(manager: &mut Manager, tx: &UnboundedSender<(RequestSpec, Outcome)>, rx: &mut Results) {
    manager
      .request(RequestSpec::new("authorize"), reply(tx))
      .unwrap();
    assert!(next(rx).await.1.is_ok());
  }

  #[tokio::test]
  async fn test_repeated_video_details_makes_one_remote_call() {
    let api = FakeApi::new();
    api.add_video(PathValue::new(json!({"id": "abc", "snippet": {"title": "A"}})));
    let mut manager = manager(FakeAuthenticator::new(api.clone()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    manager.request(videos("abc"), reply(&tx)).unwrap();
    let (_, first) = next(&mut rx).await;
    manager.request(videos("abc"), reply(&tx)).unwrap();
    let (_, second) = next(&mut rx).await;

    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(first.str_at("0.snippet.title"), Some("A"));
    assert_eq!(api.get_calls().len(), 1);
    assert_eq!(api.total_calls(), 1);
  }

  #[tokio::test]
  async fn test_playlist_contents_across_three_pages() {
    let api = FakeApi::new();
    let entries: Vec<PathValue> = (0..130)
      .map(|n| PathValue::new(json!({ "contentDetails": { "videoId": format!("v{n}") } })))
      .collect();
    api.set_list(Resource::PlaylistItems, ListFilter::PlaylistId("p1".into()), entries);
    for video in items("v", 130) {
      api.add_video(video);
    }
    let mut manager = manager(FakeAuthenticator::new(api.clone()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    manager
      .request(
        RequestSpec::new("playlist_contents").with_param("playlist_id", "p1"),
        reply(&tx),
      )
      .unwrap();

    let (spec, outcome) = next(&mut rx).await;
    assert_eq!(spec.name(), "playlist_contents");
    let videos = outcome.unwrap();
    assert_eq!(videos.as_array().map(Vec::len), Some(130));
    assert_eq!(api.list_calls().len(), 3);
  }

  #[tokio::test]
  async fn test_authorization_state_follows_results() {
    let auth = FakeAuthenticator::new(FakeApi::new());
    let mut manager = manager(auth.clone(), WAIT);
    let (tx, mut rx) = unbounded_channel();
    assert!(!manager.is_authorized());
    assert!(!manager.has_credentials());

    auth.reject.store(true, Ordering::SeqCst);
    manager
      .request(RequestSpec::new("authorize"), reply(&tx))
      .unwrap();
    let (_, outcome) = next(&mut rx).await;
    assert_eq!(outcome.unwrap_err().code, 401);
    assert!(!manager.is_authorized());

    auth.reject.store(false, Ordering::SeqCst);
    authorize(&mut manager, &tx, &mut rx).await;
    assert!(manager.is_authorized());
    assert!(manager.has_credentials());

    manager
      .request(RequestSpec::new("deauthorize"), reply(&tx))
      .unwrap();
    next(&mut rx).await;
    assert!(!manager.is_authorized());
    assert!(!manager.has_credentials());
  }

  #[tokio::test]
  async fn test_identical_request_joins_the_running_one() {
    // Unknown ids are never cached, so each execution reaches the API.
    let api = FakeApi::new();
    let mut manager = manager(FakeAuthenticator::new(api.clone()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    let pause = api.pause_next();
    manager
      .request(videos("gone").with_reason("first"), reply(&tx))
      .unwrap();
    timeout(WAIT, pause.started).await.unwrap().unwrap();
    manager
      .request(videos("gone").with_reason("second"), reply(&tx))
      .unwrap();
    pause.release.send(()).unwrap();

    let (a, first) = next(&mut rx).await;
    let (b, second) = next(&mut rx).await;
    assert_eq!(a.reason(), "first");
    assert_eq!(b.reason(), "second");
    assert_eq!(first.unwrap().as_value(), &json!([]));
    assert_eq!(second.unwrap().as_value(), &json!([]));
    assert_eq!(api.get_calls().len(), 1);

    // Once delivered, the same request executes again.
    manager.request(videos("gone"), reply(&tx)).unwrap();
    next(&mut rx).await;
    assert_eq!(api.get_calls().len(), 2);
  }

  #[tokio::test]
  async fn test_reads_after_an_update_see_the_update() {
    let api = FakeApi::new();
    api.add_video(PathValue::new(json!({"id": "abc", "snippet": {"title": "Orig"}})));
    let mut manager = manager(FakeAuthenticator::new(api.clone()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    // Hold the worker so everything below is queued together.
    let pause = api.pause_next();
    manager
      .request(videos("other").with_reason("hold"), reply(&tx))
      .unwrap();
    timeout(WAIT, pause.started).await.unwrap().unwrap();

    manager
      .request(videos("abc").with_reason("before"), reply(&tx))
      .unwrap();
    manager
      .request(
        RequestSpec::new("set_video_details")
          .with_reason("update")
          .with_param("part", "snippet")
          .with_param("video_details", json!({"id": "abc", "snippet": {"title": "Edited"}})),
        reply(&tx),
      )
      .unwrap();
    manager
      .request(videos("abc").with_reason("after"), reply(&tx))
      .unwrap();
    pause.release.send(()).unwrap();

    let mut delivered = Vec::new();
    for _ in 0..4 {
      delivered.push(next(&mut rx).await);
    }
    let order: Vec<&str> = delivered.iter().map(|(spec, _)| spec.reason()).collect();
    assert_eq!(order, vec!["hold", "before", "update", "after"]);

    let title = |n: usize| {
      delivered[n]
        .1
        .as_ref()
        .unwrap()
        .str_at("0.snippet.title")
        .map(String::from)
    };
    assert_eq!(title(1).as_deref(), Some("Orig"));
    assert_eq!(title(3).as_deref(), Some("Edited"));
  }

  #[tokio::test]
  async fn test_identical_reads_split_by_other_requests() {
    let api = FakeApi::new();
    let mut manager = manager(FakeAuthenticator::new(api.clone()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    let pause = api.pause_next();
    manager
      .request(videos("hold").with_reason("hold"), reply(&tx))
      .unwrap();
    timeout(WAIT, pause.started).await.unwrap().unwrap();
    for (id, reason) in [("gone", "a"), ("missing", "b"), ("gone", "c")] {
      manager
        .request(videos(id).with_reason(reason), reply(&tx))
        .unwrap();
    }
    pause.release.send(()).unwrap();

    let mut order = Vec::new();
    for _ in 0..4 {
      order.push(next(&mut rx).await.0.reason().to_string());
    }
    assert_eq!(order, vec!["hold", "a", "b", "c"]);
    assert_eq!(api.get_calls().len(), 4);
  }

  #[tokio::test]
  async fn test_refresh_requests_are_never_coalesced() {
    let api = FakeApi::new();
    api.add_video(PathValue::new(json!({"id": "abc"})));
    let mut manager = manager(FakeAuthenticator::new(api.clone()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    let pause = api.pause_next();
    manager
      .request(videos("abc").with_refresh(true), reply(&tx))
      .unwrap();
    timeout(WAIT, pause.started).await.unwrap().unwrap();
    manager
      .request(videos("abc").with_refresh(true), reply(&tx))
      .unwrap();
    pause.release.send(()).unwrap();

    next(&mut rx).await;
    next(&mut rx).await;
    assert_eq!(api.get_calls().len(), 2);
  }

  #[tokio::test]
  async fn test_shutdown_still_delivers_to_joined_callers() {
    let api = FakeApi::new();
    let mut manager = manager(FakeAuthenticator::new(api.clone()), Duration::from_millis(50));
    let (tx, mut rx) = unbounded_channel();
    authorize(&mut manager, &tx, &mut rx).await;

    let pause = api.pause_next();
    manager
      .request(videos("gone").with_reason("first"), reply(&tx))
      .unwrap();
    timeout(WAIT, pause.started).await.unwrap().unwrap();
    manager
      .request(videos("gone").with_reason("second"), reply(&tx))
      .unwrap();

    // The running request outlives the timeout but still answers everyone.
    assert!(!manager.shutdown());
    pause.release.send(()).unwrap();

    assert_eq!(next(&mut rx).await.0.reason(), "first");
    assert_eq!(next(&mut rx).await.0.reason(), "second");
  }

  #[tokio::test]
  async fn test_requests_after_shutdown_fail() {
    let mut manager = manager(FakeAuthenticator::new(FakeApi::new()), WAIT);
    let (tx, mut rx) = unbounded_channel();
    manager
      .request(RequestSpec::new("flush_cache"), reply(&tx))
      .unwrap();
    assert!(next(&mut rx).await.1.is_ok());

    assert!(manager.shutdown());
    assert!(matches!(
      manager.request(RequestSpec::new("flush_cache"), reply(&tx)),
      Err(WorkerError::Stopped)
    ));
  }
}
