use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::value::PathValue;

use super::api::{ApiError, ListQuery, Page, Resource, YouTubeApi};

/// YouTube Data API client wrapper
#[derive(Clone)]
pub struct YouTubeClient {
  http: reqwest::Client,
  base_url: Url,
  token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  code: i64,
  message: String,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
  #[serde(default)]
  items: Vec<PathValue>,
}

impl YouTubeClient {
  pub fn new(http: reqwest::Client, base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
    let base_url =
      Url::parse(base_url).map_err(|e| ApiError::Transport(format!("invalid API url '{}': {}", base_url, e)))?;

    Ok(Self {
      http,
      base_url,
      token: token.into(),
    })
  }

  fn endpoint(&self, resource: Resource) -> Result<Url, ApiError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| ApiError::Transport(format!("cannot extend API url {}", self.base_url)))?
      .pop_if_empty()
      .push(resource.path());
    Ok(url)
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
    let response = request
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|e| ApiError::Transport(e.to_string()))?;

    decode(response).await
  }
}

/// Decode a successful body, or turn an error status into [`ApiError::Remote`]
/// using the API's error envelope when present.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
  let status = response.status();
  let body = response
    .bytes()
    .await
    .map_err(|e| ApiError::Transport(e.to_string()))?;

  if !status.is_success() {
    return Err(match serde_json::from_slice::<ErrorEnvelope>(&body) {
      Ok(envelope) => ApiError::Remote {
        code: envelope.error.code,
        message: envelope.error.message,
      },
      Err(_) => ApiError::Remote {
        code: i64::from(status.as_u16()),
        message: String::from_utf8_lossy(&body).trim().to_string(),
      },
    });
  }

  serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl YouTubeApi for YouTubeClient {
  async fn list(&self, query: &ListQuery) -> Result<Page, ApiError> {
    let mut url = self.endpoint(query.resource)?;
    {
      let (filter_key, filter_value) = query.filter.query_pair();
      let mut pairs = url.query_pairs_mut();
      pairs
        .append_pair("part", &query.part)
        .append_pair(filter_key, filter_value)
        .append_pair("maxResults", &query.max_results.to_string());
      if let Some(token) = &query.page_token {
        pairs.append_pair("pageToken", token);
      }
    }

    self.send(self.http.get(url)).await
  }

  async fn get(
    &self,
    resource: Resource,
    ids: &[String],
    part: &str,
  ) -> Result<Vec<PathValue>, ApiError> {
    let mut url = self.endpoint(resource)?;
    url
      .query_pairs_mut()
      .append_pair("part", part)
      .append_pair("id", &ids.join(","))
      .append_pair("maxResults", &ids.len().to_string());

    let response: ItemsResponse = self.send(self.http.get(url)).await?;
    Ok(response.items)
  }

  async fn update(
    &self,
    resource: Resource,
    part: &str,
    body: &PathValue,
  ) -> Result<PathValue, ApiError> {
    let mut url = self.endpoint(resource)?;
    url.query_pairs_mut().append_pair("part", part);

    self.send(self.http.put(url).json(body)).await
  }
}
