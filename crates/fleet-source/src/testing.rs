//! In-memory release source for tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::SourceError;
use crate::source::{Asset, ReleaseSource, SourceFuture};

#[derive(Debug, Default)]
struct Catalog {
    latest: Option<String>,
    latest_prerelease: Option<String>,
    missing_assets: HashSet<String>,
    broken_downloads: HashSet<String>,
    unreachable: bool,
    downloads: HashMap<String, usize>,
}

/// Serves a fixed latest tag and pretends every asset lives at
/// `{dir}/{tag}.tar.gz`. Nothing touches the filesystem.
#[derive(Debug)]
pub struct StaticSource {
    dir: PathBuf,
    catalog: Mutex<Catalog>,
}

impl StaticSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            catalog: Mutex::new(Catalog::default()),
        }
    }

    pub fn with_latest(self, tag: &str) -> Self {
        self.set_latest(Some(tag));
        self
    }

    /// Tag returned only when pre-releases are requested.
    pub fn with_prerelease(self, tag: &str) -> Self {
        self.lock().latest_prerelease = Some(tag.to_string());
        self
    }

    pub fn set_latest(&self, tag: Option<&str>) {
        self.lock().latest = tag.map(str::to_string);
    }

    /// `download_asset(tag)` fails with `NoMatchingAsset`.
    pub fn without_asset(self, tag: &str) -> Self {
        self.lock().missing_assets.insert(tag.to_string());
        self
    }

    /// `download_asset(tag)` fails with `DownloadFailed`; other tags are
    /// unaffected.
    pub fn break_download(&self, tag: &str) {
        self.lock().broken_downloads.insert(tag.to_string());
    }

    /// Every call fails with `Unreachable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn downloads(&self, tag: &str) -> usize {
        self.lock().downloads.get(tag).copied().unwrap_or(0)
    }

    pub fn asset_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{tag}.tar.gz"))
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ReleaseSource for StaticSource {
    fn fetch_latest(&self, include_prerelease: bool) -> SourceFuture<'_, String> {
        let result = {
            let catalog = self.lock();
            if catalog.unreachable {
                Err(SourceError::Unreachable("static source switched off".to_string()))
            } else {
                let prerelease = catalog.latest_prerelease.clone().filter(|_| include_prerelease);
                prerelease
                    .or_else(|| catalog.latest.clone())
                    .ok_or(SourceError::NoRelease(None))
            }
        };
        Box::pin(async move { result })
    }

    fn download_asset<'a>(&'a self, tag: &'a str) -> SourceFuture<'a, Asset> {
        let result = {
            let mut catalog = self.lock();
            if catalog.unreachable || catalog.broken_downloads.contains(tag) {
                Err(SourceError::DownloadFailed {
                    tag: tag.to_string(),
                    asset: format!("{tag}.tar.gz"),
                    reason: "connection reset".to_string(),
                })
            } else if catalog.missing_assets.contains(tag) {
                Err(SourceError::NoMatchingAsset {
                    tag: tag.to_string(),
                    pattern: "*.tar.gz".to_string(),
                })
            } else {
                *catalog.downloads.entry(tag.to_string()).or_default() += 1;
                Ok(Asset {
                    tag: tag.to_string(),
                    path: self.asset_path(tag),
                })
            }
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_latest_and_assets() {
        let source = StaticSource::new("/srv/assets")
            .with_latest("v1")
            .with_prerelease("v2-rc1")
            .without_asset("v0");

        assert_eq!(source.fetch_latest(false).await.unwrap(), "v1");
        assert_eq!(source.fetch_latest(true).await.unwrap(), "v2-rc1");

        let asset = source.download_asset("v1").await.unwrap();
        assert_eq!(asset.path, PathBuf::from("/srv/assets/v1.tar.gz"));
        assert_eq!(source.downloads("v1"), 1);

        assert!(matches!(
            source.download_asset("v0").await,
            Err(SourceError::NoMatchingAsset { .. })
        ));

        source.break_download("v1");
        assert!(matches!(
            source.download_asset("v1").await,
            Err(SourceError::DownloadFailed { .. })
        ));
        assert_eq!(source.fetch_latest(false).await.unwrap(), "v1");

        source.set_unreachable(true);
        assert!(source.fetch_latest(false).await.unwrap_err().is_recoverable());
    }
}
