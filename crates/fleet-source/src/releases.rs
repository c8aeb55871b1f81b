//! ReleaseSource over a release-hosting API.
//!
//! Picks the release to roll out, selects its asset by name pattern and
//! keeps one downloaded copy per release under `{save_dir}/{tag}/`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use fleet_core::FleetConfig;

use crate::api::{AssetInfo, ReleaseApi, ReleaseInfo};
use crate::error::{SourceError, SourceResult};
use crate::source::{Asset, ReleaseSource, SourceFuture};

const PARTIAL_SUFFIX: &str = ".partial";

/// Choose between the latest release and the newest pre-release.
///
/// Drafts are ignored. The pre-release wins only when it was published
/// strictly after the latest release, or when there is no latest release.
pub fn pick_release(latest: Option<ReleaseInfo>, releases: &[ReleaseInfo]) -> Option<ReleaseInfo> {
    let newest_prerelease = releases
        .iter()
        .filter(|r| !r.draft && r.prerelease)
        .max_by_key(|r| r.published_at);

    match (latest, newest_prerelease) {
        (None, prerelease) => prerelease.cloned(),
        (Some(latest), Some(prerelease)) if prerelease.published_at > latest.published_at => {
            Some(prerelease.clone())
        }
        (Some(latest), _) => Some(latest),
    }
}

pub struct GitHubReleases<A> {
    api: A,
    pattern: Regex,
    save_dir: PathBuf,
    api_timeout: Duration,
    download_timeout: Duration,
    last: Mutex<Option<Asset>>,
    /// Held while resolving and downloading an asset; both loops share
    /// one source.
    fetching: tokio::sync::Mutex<()>,
}

impl<A: ReleaseApi> GitHubReleases<A> {
    pub fn new(api: A, pattern: &str, save_dir: impl Into<PathBuf>) -> SourceResult<Self> {
        Ok(Self {
            api,
            pattern: Regex::new(pattern)?,
            save_dir: save_dir.into(),
            api_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(5 * 60),
            last: Mutex::new(None),
            fetching: tokio::sync::Mutex::new(()),
        })
    }

    pub fn from_config(api: A, config: &FleetConfig) -> SourceResult<Self> {
        Ok(Self::new(api, &config.package_name_pattern, &config.save_assets_path)?
            .with_timeouts(config.github_timeout, config.deploy_timeout))
    }

    pub fn with_timeouts(mut self, api: Duration, download: Duration) -> Self {
        self.api_timeout = api;
        self.download_timeout = download;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn latest_tag(&self, include_prerelease: bool) -> SourceResult<String> {
        let latest = match bounded(self.api_timeout, self.api.latest()).await {
            Ok(latest) => latest,
            // Pre-releases may still yield a candidate.
            Err(e) if include_prerelease => {
                warn!(error = %e, "latest release lookup failed, checking pre-releases");
                None
            }
            Err(e) => return Err(e),
        };

        let release = if include_prerelease {
            let releases = bounded(self.api_timeout, self.api.releases()).await?;
            pick_release(latest, &releases)
        } else {
            latest
        };

        let release = release.ok_or(SourceError::NoRelease(None))?;
        debug!(tag = %release.tag, prerelease = release.prerelease, "latest release");
        Ok(release.tag)
    }

    async fn fetch_asset(&self, tag: &str) -> SourceResult<Asset> {
        if let Some(cached) = self.cached(tag) {
            debug!(tag, path = %cached.path.display(), "asset already downloaded");
            return Ok(cached);
        }

        let _fetching = self.fetching.lock().await;
        if let Some(cached) = self.cached(tag) {
            return Ok(cached);
        }

        let release = bounded(self.api_timeout, self.api.by_tag(tag))
            .await?
            .ok_or_else(|| SourceError::NoRelease(Some(tag.to_string())))?;

        let asset = self
            .matching_asset(&release)
            .ok_or_else(|| SourceError::NoMatchingAsset {
                tag: release.tag.clone(),
                pattern: self.pattern.as_str().to_string(),
            })?;

        let path = self.asset_path(&release.tag, &asset.name);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SourceError::io(&path, e))?
        {
            debug!(tag, path = %path.display(), "reusing asset on disk");
        } else {
            self.download(tag, asset, &path).await?;
            info!(tag, asset = %asset.name, path = %path.display(), "downloaded release asset");
        }

        let fetched = Asset {
            tag: release.tag.clone(),
            path,
        };
        self.remember(&fetched);
        Ok(fetched)
    }

    fn asset_path(&self, tag: &str, asset_name: &str) -> PathBuf {
        self.save_dir.join(tag).join(asset_name)
    }

    fn matching_asset<'r>(&self, release: &'r ReleaseInfo) -> Option<&'r AssetInfo> {
        release
            .assets
            .iter()
            .find(|asset| self.pattern.is_match(&asset.name))
    }

    /// Download into a `.partial` sibling, then rename into place.
    async fn download(&self, tag: &str, asset: &AssetInfo, path: &Path) -> SourceResult<()> {
        let dir = path.parent().unwrap_or(&self.save_dir);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SourceError::io(dir, e))?;

        let partial = partial_path(path);
        let result = bounded(self.download_timeout, self.api.download(asset, &partial)).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(match e {
                SourceError::DownloadFailed { asset, reason, .. } => SourceError::DownloadFailed {
                    tag: tag.to_string(),
                    asset,
                    reason,
                },
                other => other,
            });
        }

        tokio::fs::rename(&partial, path)
            .await
            .map_err(|e| SourceError::io(path, e))
    }

    fn cached(&self, tag: &str) -> Option<Asset> {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        last.as_ref().filter(|asset| asset.tag == tag).cloned()
    }

    fn remember(&self, asset: &Asset) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(asset.clone());
    }
}

impl<A: ReleaseApi> ReleaseSource for GitHubReleases<A> {
    fn fetch_latest(&self, include_prerelease: bool) -> SourceFuture<'_, String> {
        Box::pin(self.latest_tag(include_prerelease))
    }

    fn download_asset<'a>(&'a self, tag: &'a str) -> SourceFuture<'a, Asset> {
        Box::pin(self.fetch_asset(tag))
    }
}

impl<A> std::fmt::Debug for GitHubReleases<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubReleases")
            .field("pattern", &self.pattern.as_str())
            .field("save_dir", &self.save_dir)
            .finish_non_exhaustive()
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = SourceResult<T>>,
) -> SourceResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Unreachable(format!(
            "release API call timed out after {timeout:?}"
        ))),
    }
}
