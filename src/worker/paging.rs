//! Assembling complete results from paged and capped API calls.

use tracing::debug;

use crate::value::PathValue;
use crate::youtube::{ApiError, ListFilter, ListQuery, Resource, YouTubeApi};

/// Follow continuation tokens until the API reports no further page,
/// returning every item in page order.
pub async fn list_all(
  api: &dyn YouTubeApi,
  resource: Resource,
  filter: ListFilter,
  part: &str,
  page_size: u32,
) -> Result<Vec<PathValue>, ApiError> {
  let mut query = ListQuery {
    resource,
    filter,
    part: part.to_string(),
    page_token: None,
    max_results: page_size,
  };
  let mut items = Vec::new();
  let mut pages = 0usize;

  loop {
    let page = api.list(&query).await?;
    pages += 1;
    items.extend(page.items);

    match page.next_page_token {
      Some(token) if !token.is_empty() => query.page_token = Some(token),
      _ => break,
    }
  }

  debug!(
    resource = resource.path(),
    pages,
    items = items.len(),
    "Fetched all pages"
  );
  Ok(items)
}

/// Look up `ids` in chunks of at most `batch_size`, one call per chunk,
/// concatenating the results in chunk order.
pub async fn get_batched(
  api: &dyn YouTubeApi,
  resource: Resource,
  ids: &[String],
  part: &str,
  batch_size: usize,
) -> Result<Vec<PathValue>, ApiError> {
  let mut items = Vec::with_capacity(ids.len());

  for chunk in ids.chunks(batch_size.max(1)) {
    items.extend(api.get(resource, chunk, part).await?);
  }

  Ok(items)
}
