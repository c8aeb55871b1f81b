//! fleet-source: where releases come from.
//!
//! # Architecture
//!
//! ```text
//! dyn ReleaseSource (fetch_latest, download_asset)
//!   └── GitHubReleases<A: ReleaseApi>   release pick, asset match, disk cache
//!         └── OctocrabApi               GitHub / GitHub Enterprise REST
//! ```
//!
//! A missing asset is a steady-state condition for the caller to log and
//! skip; unreachable APIs and failed downloads are recoverable and retried
//! on the next tick.

pub mod api;
pub mod error;
pub mod github;
pub mod releases;
pub mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{AssetInfo, ReleaseApi, ReleaseInfo};
pub use error::{SourceError, SourceResult};
pub use github::OctocrabApi;
pub use releases::{GitHubReleases, pick_release};
pub use source::{Asset, ReleaseSource, SourceFuture};
