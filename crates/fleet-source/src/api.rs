//! Narrow view of a release-hosting API.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::SourceResult;

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = SourceResult<T>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag: String,
    pub draft: bool,
    pub prerelease: bool,
    /// Unix seconds.
    pub published_at: Option<i64>,
    pub assets: Vec<AssetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub id: u64,
    pub name: String,
}

/// The calls the release source needs from the hosting API.
pub trait ReleaseApi: Send + Sync {
    /// The repository's latest non-draft, non-prerelease release.
    fn latest(&self) -> ApiFuture<'_, Option<ReleaseInfo>>;

    /// Every release, all pages.
    fn releases(&self) -> ApiFuture<'_, Vec<ReleaseInfo>>;

    fn by_tag<'a>(&'a self, tag: &'a str) -> ApiFuture<'a, Option<ReleaseInfo>>;

    /// Stream the asset's bytes into `dest`.
    fn download<'a>(&'a self, asset: &'a AssetInfo, dest: &'a Path) -> ApiFuture<'a, ()>;
}
