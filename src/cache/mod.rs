//! Result cache owned by the worker.
//!
//! This module provides:
//! - [`Cache`], the in-memory sections of previously fetched results
//! - [`CacheStorage`], the persistence seam with an encrypted file backend
//!   and a no-op backend for session-only caching
//! - [`PlaylistVideoPurge`], the policy for dependent entries when a
//!   playlist is refreshed

mod sections;
mod storage;

pub use sections::{Cache, PlaylistVideoPurge, VideoSection};
pub use storage::{CacheStorage, FileStorage, NoopStorage, SealedFile, StoreError};
