//! The release source contract the control loops depend on.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::error::SourceResult;

/// Boxed future returned by release source calls.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = SourceResult<T>> + Send + 'a>>;

/// A release artifact on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub tag: String,
    pub path: PathBuf,
}

pub trait ReleaseSource: Send + Sync {
    /// Tag of the newest release, optionally considering pre-releases.
    fn fetch_latest(&self, include_prerelease: bool) -> SourceFuture<'_, String>;

    /// Download the matching asset of `tag`.
    ///
    /// Idempotent: repeated calls for one tag return the same path and
    /// download at most once.
    fn download_asset<'a>(&'a self, tag: &'a str) -> SourceFuture<'a, Asset>;
}
