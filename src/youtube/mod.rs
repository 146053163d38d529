//! YouTube Data API access: the remote API seam, its HTTP client and the
//! authentication handshake that produces one.

mod api;
mod auth;
mod client;
mod filter;
#[cfg(test)]
pub mod testing;

pub use api::{ApiError, ListFilter, ListQuery, Page, Resource, YouTubeApi};
pub use auth::{Authenticator, CredentialStore, Credentials, OAuthAuthenticator};
pub use client::YouTubeClient;
pub use filter::filter_video_update;
