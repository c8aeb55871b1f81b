//! GitHub (or GitHub Enterprise) releases through octocrab.

use std::path::Path;

use futures::StreamExt;
use octocrab::Octocrab;
use octocrab::models::repos::Release;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use fleet_core::FleetConfig;

use crate::api::{ApiFuture, AssetInfo, ReleaseApi, ReleaseInfo};
use crate::error::{SourceError, SourceResult};

const PER_PAGE: u8 = 100;

/// Release API scoped to one repository.
#[derive(Clone)]
pub struct OctocrabApi {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl OctocrabApi {
    pub fn new(client: Octocrab, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Build a client for `repo` against `github_api`, with token auth when
    /// a token is configured.
    pub fn from_config(config: &FleetConfig) -> SourceResult<Self> {
        let (owner, repo) = config
            .owner_and_name()
            .ok_or_else(|| SourceError::Unreachable(format!("invalid repo: {}", config.repo)))?;

        let mut builder = Octocrab::builder()
            .base_uri(config.github_api.as_str())
            .map_err(|e| SourceError::Unreachable(format!("invalid github_api: {e}")))?;
        if let Some(token) = config.github_token.as_deref().filter(|t| !t.is_empty()) {
            builder = builder.personal_token(token.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| SourceError::Unreachable(format!("failed to build GitHub client: {e}")))?;

        Ok(Self::new(client, owner, repo))
    }

    fn handler(&self) -> octocrab::repos::RepoHandler<'_> {
        self.client.repos(&self.owner, &self.repo)
    }
}

impl std::fmt::Debug for OctocrabApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabApi")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl ReleaseApi for OctocrabApi {
    fn latest(&self) -> ApiFuture<'_, Option<ReleaseInfo>> {
        Box::pin(async move {
            match self.handler().releases().get_latest().await {
                Ok(release) => Ok(Some(release_info(release))),
                Err(e) if is_not_found(&e) => Ok(None),
                Err(e) => Err(api_error(e)),
            }
        })
    }

    fn releases(&self) -> ApiFuture<'_, Vec<ReleaseInfo>> {
        Box::pin(async move {
            let mut page = 1u32;
            let mut all = Vec::new();
            loop {
                let result = self
                    .handler()
                    .releases()
                    .list()
                    .per_page(PER_PAGE)
                    .page(page)
                    .send()
                    .await
                    .map_err(api_error)?;

                let is_last_page = result.next.is_none() || result.items.len() < PER_PAGE as usize;
                all.extend(result.items.into_iter().map(release_info));
                if is_last_page {
                    break;
                }
                page += 1;
            }
            debug!(count = all.len(), "listed releases");
            Ok(all)
        })
    }

    fn by_tag<'a>(&'a self, tag: &'a str) -> ApiFuture<'a, Option<ReleaseInfo>> {
        Box::pin(async move {
            match self.handler().releases().get_by_tag(tag).await {
                Ok(release) => Ok(Some(release_info(release))),
                Err(e) if is_not_found(&e) => Ok(None),
                Err(e) => Err(api_error(e)),
            }
        })
    }

    fn download<'a>(&'a self, asset: &'a AssetInfo, dest: &'a Path) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let failed = |reason: String| SourceError::DownloadFailed {
                tag: String::new(),
                asset: asset.name.clone(),
                reason,
            };

            let repo = self.handler();
            let releases = repo.releases();
            let stream = releases
                .stream_asset(asset.id)
                .await
                .map_err(|e| failed(e.to_string()))?;
            let mut stream = Box::pin(stream);

            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| SourceError::io(dest, e))?;
            let mut written = 0usize;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| failed(e.to_string()))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| SourceError::io(dest, e))?;
                written += chunk.len();
            }
            file.flush().await.map_err(|e| SourceError::io(dest, e))?;
            file.sync_all().await.map_err(|e| SourceError::io(dest, e))?;

            debug!(asset = %asset.name, bytes = written, dest = %dest.display(), "asset downloaded");
            Ok(())
        })
    }
}

fn release_info(release: Release) -> ReleaseInfo {
    ReleaseInfo {
        tag: release.tag_name,
        draft: release.draft,
        prerelease: release.prerelease,
        published_at: release.published_at.map(|at| at.timestamp()),
        assets: release
            .assets
            .into_iter()
            .map(|asset| AssetInfo {
                id: asset.id.into_inner(),
                name: asset.name,
            })
            .collect(),
    }
}

fn is_not_found(err: &octocrab::Error) -> bool {
    match err {
        octocrab::Error::GitHub { source, .. } => source.status_code.as_u16() == 404,
        _ => false,
    }
}

fn api_error(err: octocrab::Error) -> SourceError {
    SourceError::Unreachable(err.to_string())
}
