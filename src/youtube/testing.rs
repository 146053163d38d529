//! In-memory API used by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::cache::StoreError;
use crate::error::RequestError;
use crate::value::PathValue;

use super::api::{ApiError, ListFilter, ListQuery, Page, Resource, YouTubeApi};
use super::auth::Authenticator;

#[derive(Default)]
struct State {
  lists: HashMap<(Resource, ListFilter), Vec<PathValue>>,
  videos: HashMap<String, PathValue>,
  list_calls: Vec<ListQuery>,
  get_calls: Vec<Vec<String>>,
  update_calls: Vec<PathValue>,
  fail_next: Option<ApiError>,
  pause: Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>,
}

/// Handle on a call held by [`FakeApi::pause_next`].
pub struct Pause {
  /// Resolves once the held call has started
  pub started: oneshot::Receiver<()>,
  /// Send (or drop) to let the held call continue
  pub release: oneshot::Sender<()>,
}

/// Scripted API serving list calls in pages using offsets as page tokens.
#[derive(Default)]
pub struct FakeApi {
  state: Mutex<State>,
}

impl FakeApi {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn set_list(&self, resource: Resource, filter: ListFilter, items: Vec<PathValue>) {
    self.state().lists.insert((resource, filter), items);
  }

  pub fn add_video(&self, video: PathValue) {
    let id = video.str_at("id").unwrap_or_default().to_string();
    self.state().videos.insert(id, video);
  }

  /// Fail the next call of any kind with `error`.
  pub fn fail_next(&self, error: ApiError) {
    self.state().fail_next = Some(error);
  }

  /// Hold the next call of any kind until released.
  pub fn pause_next(&self) -> Pause {
    let (started_tx, started) = oneshot::channel();
    let (release, release_rx) = oneshot::channel();
    self.state().pause = Some((started_tx, release_rx));
    Pause { started, release }
  }

  async fn hold(&self) {
    let pause = self.state().pause.take();
    if let Some((started, release)) = pause {
      let _ = started.send(());
      let _ = release.await;
    }
  }

  pub fn list_calls(&self) -> Vec<ListQuery> {
    self.state().list_calls.clone()
  }

  pub fn get_calls(&self) -> Vec<Vec<String>> {
    self.state().get_calls.clone()
  }

  pub fn update_calls(&self) -> Vec<PathValue> {
    self.state().update_calls.clone()
  }

  pub fn total_calls(&self) -> usize {
    let state = self.state();
    state.list_calls.len() + state.get_calls.len() + state.update_calls.len()
  }
}

#[async_trait]
impl YouTubeApi for FakeApi {
  async fn list(&self, query: &ListQuery) -> Result<Page, ApiError> {
    self.hold().await;
    let mut state = self.state();
    state.list_calls.push(query.clone());
    if let Some(err) = state.fail_next.take() {
      return Err(err);
    }

    let items = state
      .lists
      .get(&(query.resource, query.filter.clone()))
      .cloned()
      .unwrap_or_default();
    let start = query
      .page_token
      .as_deref()
      .and_then(|token| token.parse::<usize>().ok())
      .unwrap_or(0)
      .min(items.len());
    let end = (start + query.max_results as usize).min(items.len());

    Ok(Page {
      items: items[start..end].to_vec(),
      next_page_token: (end < items.len()).then(|| end.to_string()),
    })
  }

  async fn get(
    &self,
    _resource: Resource,
    ids: &[String],
    _part: &str,
  ) -> Result<Vec<PathValue>, ApiError> {
    self.hold().await;
    let mut state = self.state();
    state.get_calls.push(ids.to_vec());
    if let Some(err) = state.fail_next.take() {
      return Err(err);
    }

    Ok(
      ids
        .iter()
        .filter_map(|id| state.videos.get(id).cloned())
        .collect(),
    )
  }

  async fn update(
    &self,
    _resource: Resource,
    _part: &str,
    body: &PathValue,
  ) -> Result<PathValue, ApiError> {
    self.hold().await;
    let mut state = self.state();
    state.update_calls.push(body.clone());
    if let Some(err) = state.fail_next.take() {
      return Err(err);
    }
    Ok(body.clone())
  }
}

/// Authenticator handing out a shared [`FakeApi`].
pub struct FakeAuthenticator {
  pub api: Arc<FakeApi>,
  pub credentials: AtomicBool,
  pub reject: AtomicBool,
}

impl FakeAuthenticator {
  pub fn new(api: Arc<FakeApi>) -> Arc<Self> {
    Arc::new(Self {
      api,
      credentials: AtomicBool::new(false),
      reject: AtomicBool::new(false),
    })
  }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
  async fn authenticate(&self) -> Result<Arc<dyn YouTubeApi>, RequestError> {
    if self.reject.load(Ordering::SeqCst) {
      return Err(RequestError::Remote {
        code: 401,
        message: "invalid_grant".into(),
      });
    }
    self.credentials.store(true, Ordering::SeqCst);
    Ok(self.api.clone())
  }

  fn has_credentials(&self) -> bool {
    self.credentials.load(Ordering::SeqCst)
  }

  fn forget(&self) -> Result<(), StoreError> {
    self.credentials.store(false, Ordering::SeqCst);
    Ok(())
  }
}

/// `count` simple items with ids `{prefix}{n}`.
pub fn items(prefix: &str, count: usize) -> Vec<PathValue> {
  (0..count)
    .map(|n| PathValue::new(serde_json::json!({ "id": format!("{prefix}{n}") })))
    .collect()
}
