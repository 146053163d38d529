//! Stored credentials and the handshake that turns them into an API handle.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{SealedFile, StoreError};
use crate::config::{ApiConfig, OAuthConfig};
use crate::crypto::Cipher;
use crate::error::RequestError;

use super::api::YouTubeApi;
use super::client::YouTubeClient;

/// Read-write access to the authenticated user's account.
pub const SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";

/// Access tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth tokens for the authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
  pub token: Option<String>,
  pub refresh_token: Option<String>,
  pub id_token: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
  /// Credentials holding only a refresh token; the access token is obtained
  /// on first use.
  pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
    Self {
      token: None,
      refresh_token: Some(refresh_token.into()),
      id_token: None,
      expires_at: None,
    }
  }

  /// Whether the access token can be used as is.
  pub fn is_valid(&self) -> bool {
    self.token.is_some()
      && self
        .expires_at
        .map_or(true, |at| at - Duration::seconds(EXPIRY_MARGIN_SECS) > Utc::now())
  }
}

/// Encrypted credentials file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
  file: SealedFile,
}

impl CredentialStore {
  pub fn new(path: impl Into<PathBuf>, cipher: Cipher) -> Self {
    Self {
      file: SealedFile::new(path, Some(cipher)),
    }
  }

  pub fn exists(&self) -> bool {
    self.file.exists()
  }

  pub fn load(&self) -> Result<Option<Credentials>, StoreError> {
    self.file.read()
  }

  pub fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
    self.file.write(credentials)
  }

  pub fn remove(&self) -> Result<(), StoreError> {
    self.file.remove()
  }
}

/// Produces an authenticated API handle.
#[async_trait]
pub trait Authenticator: Send + Sync {
  /// Authenticate, reusing stored credentials where possible.
  async fn authenticate(&self) -> Result<Arc<dyn YouTubeApi>, RequestError>;

  /// Whether credentials are persisted from an earlier session. Must not
  /// touch the network.
  fn has_credentials(&self) -> bool;

  /// Discard persisted credentials.
  fn forget(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  expires_in: Option<i64>,
  refresh_token: Option<String>,
  id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
  error: String,
  error_description: Option<String>,
}

/// Authenticator for installed applications using the OAuth refresh flow.
///
/// The interactive consent flow happens outside this process; a refresh
/// token obtained from it is either already stored or supplied through
/// `bootstrap_token`.
pub struct OAuthAuthenticator {
  oauth: OAuthConfig,
  api: ApiConfig,
  store: CredentialStore,
  bootstrap_token: Option<String>,
  http: reqwest::Client,
}

impl OAuthAuthenticator {
  pub fn new(
    oauth: OAuthConfig,
    api: ApiConfig,
    store: CredentialStore,
    bootstrap_token: Option<String>,
  ) -> Self {
    Self {
      oauth,
      api,
      store,
      bootstrap_token,
      http: reqwest::Client::new(),
    }
  }

  /// The consent page a user has to visit to obtain a refresh token.
  pub fn consent_url(&self) -> Result<Url, RequestError> {
    let mut url = Url::parse(&self.oauth.auth_uri)
      .map_err(|e| RequestError::Unexpected(format!("invalid auth_uri: {}", e)))?;
    url
      .query_pairs_mut()
      .append_pair("client_id", &self.oauth.client_id)
      .append_pair("response_type", "code")
      .append_pair("scope", SCOPE)
      .append_pair("access_type", "offline");
    Ok(url)
  }

  async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, RequestError> {
    let refresh_token = credentials
      .refresh_token
      .as_deref()
      .ok_or(RequestError::NotAuthorized)?;

    debug!(token_uri = %self.oauth.token_uri, "Refreshing access token");
    let response = self
      .http
      .post(&self.oauth.token_uri)
      .form(&[
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", self.oauth.client_id.as_str()),
        ("client_secret", self.oauth.client_secret.as_str()),
      ])
      .send()
      .await
      .map_err(|e| RequestError::Unexpected(format!("token refresh failed: {}", e)))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| RequestError::Unexpected(format!("token refresh failed: {}", e)))?;

    if !status.is_success() {
      let message = match serde_json::from_slice::<TokenError>(&body) {
        Ok(err) => err.error_description.unwrap_or(err.error),
        Err(_) => String::from_utf8_lossy(&body).trim().to_string(),
      };
      return Err(RequestError::Remote {
        code: i64::from(status.as_u16()),
        message,
      });
    }

    let token: TokenResponse = serde_json::from_slice(&body)
      .map_err(|e| RequestError::Unexpected(format!("invalid token response: {}", e)))?;

    Ok(Credentials {
      token: Some(token.access_token),
      refresh_token: token
        .refresh_token
        .or_else(|| credentials.refresh_token.clone()),
      id_token: token.id_token.or_else(|| credentials.id_token.clone()),
      expires_at: token
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs)),
    })
  }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
  async fn authenticate(&self) -> Result<Arc<dyn YouTubeApi>, RequestError> {
    let stored = self.store.load()?;
    let credentials = match (stored, &self.bootstrap_token) {
      (Some(credentials), _) => credentials,
      (None, Some(token)) => Credentials::from_refresh_token(token.clone()),
      (None, None) => {
        let url = self.consent_url()?;
        return Err(RequestError::Unexpected(format!(
          "no stored credentials; authorize at {} and provide the refresh token via YTE_REFRESH_TOKEN",
          url
        )));
      }
    };

    let credentials = if credentials.is_valid() {
      credentials
    } else {
      let refreshed = self.refresh(&credentials).await?;
      self.store.save(&refreshed)?;
      refreshed
    };

    let token = credentials.token.ok_or(RequestError::NotAuthorized)?;
    let client = YouTubeClient::new(self.http.clone(), &self.api.base_url, token)?;
    info!("Authenticated with the YouTube Data API");
    Ok(Arc::new(client))
  }

  fn has_credentials(&self) -> bool {
    self.store.exists()
  }

  fn forget(&self) -> Result<(), StoreError> {
    self.store.remove()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_string_contains, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn oauth(server: &MockServer) -> OAuthConfig {
    OAuthConfig {
      client_id: "client".into(),
      client_secret: "secret".into(),
      auth_uri: "https://accounts.example.com/o/oauth2/auth".into(),
      token_uri: format!("{}/token", server.uri()),
    }
  }

  #[test]
  fn test_credentials_round_trip_encrypted() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.bin"), Cipher::builtin().unwrap());
    assert!(!store.exists());
    assert!(store.load().unwrap().is_none());

    let credentials = Credentials {
      token: Some("access".into()),
      refresh_token: Some("refresh".into()),
      id_token: None,
      expires_at: None,
    };
    store.save(&credentials).unwrap();
    assert!(store.exists());
    assert_eq!(store.load().unwrap(), Some(credentials));

    store.remove().unwrap();
    assert!(!store.exists());
  }

  #[test]
  fn test_validity() {
    let mut credentials = Credentials::from_refresh_token("r");
    assert!(!credentials.is_valid());

    credentials.token = Some("t".into());
    assert!(credentials.is_valid());

    credentials.expires_at = Some(Utc::now() + Duration::seconds(10));
    assert!(!credentials.is_valid());

    credentials.expires_at = Some(Utc::now() + Duration::hours(1));
    assert!(credentials.is_valid());
  }

  #[tokio::test]
  async fn test_bootstrap_token_is_exchanged_and_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token"))
      .and(body_string_contains("grant_type=refresh_token"))
      .and(body_string_contains("refresh_token=boot"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": "fresh",
        "expires_in": 3600,
        "token_type": "Bearer"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.bin"), Cipher::builtin().unwrap());
    let auth = OAuthAuthenticator::new(
      oauth(&server),
      ApiConfig::default(),
      store.clone(),
      Some("boot".into()),
    );

    assert!(!auth.has_credentials());
    auth.authenticate().await.unwrap();
    assert!(auth.has_credentials());

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.token.as_deref(), Some("fresh"));
    assert_eq!(saved.refresh_token.as_deref(), Some("boot"));
    assert!(saved.is_valid());

    // Valid stored credentials are reused without another exchange.
    auth.authenticate().await.unwrap();
  }

  #[tokio::test]
  async fn test_rejected_refresh_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token"))
      .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
        "error": "invalid_grant",
        "error_description": "Token has been expired or revoked."
      })))
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.bin"), Cipher::builtin().unwrap());
    let auth = OAuthAuthenticator::new(oauth(&server), ApiConfig::default(), store, Some("old".into()));

    match auth.authenticate().await {
      Err(RequestError::Remote { code, message }) => {
        assert_eq!(code, 400);
        assert_eq!(message, "Token has been expired or revoked.");
      }
      Err(other) => panic!("unexpected error {other:?}"),
      Ok(_) => panic!("authentication should fail"),
    }
  }

  #[tokio::test]
  async fn test_missing_credentials_point_at_consent_page() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.bin"), Cipher::builtin().unwrap());
    let auth = OAuthAuthenticator::new(oauth(&server), ApiConfig::default(), store, None);

    let err = auth.authenticate().await.err().unwrap();
    let message = err.to_string();
    assert!(message.contains("accounts.example.com"));
    assert!(message.contains("client_id=client"));
  }
}
