//! Release source errors.

use std::path::PathBuf;

use thiserror::Error;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The release exists but no asset name matches the pattern.
    #[error("release {tag} has no asset matching {pattern}")]
    NoMatchingAsset { tag: String, pattern: String },

    /// The repository has no published release (or no such tag).
    #[error("no release found{}", tag_suffix(.0.as_deref()))]
    NoRelease(Option<String>),

    /// The release API could not be reached or answered with an error.
    #[error("release source unreachable: {0}")]
    Unreachable(String),

    /// Transport failure while fetching an asset.
    #[error("failed to download {asset} for {tag}: {reason}")]
    DownloadFailed {
        tag: String,
        asset: String,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid asset name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl SourceError {
    /// Transport-level failure worth retrying on the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SourceError::Unreachable(_) | SourceError::DownloadFailed { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SourceError::Io {
            path: path.into(),
            source,
        }
    }
}

fn tag_suffix(tag: Option<&str>) -> String {
    tag.map(|t| format!(" for tag {t}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_recoverable() {
        assert!(SourceError::Unreachable("502".to_string()).is_recoverable());
        assert!(
            SourceError::DownloadFailed {
                tag: "v1".to_string(),
                asset: "a.tgz".to_string(),
                reason: "reset".to_string(),
            }
            .is_recoverable()
        );
        assert!(!SourceError::NoRelease(None).is_recoverable());
        assert!(
            !SourceError::NoMatchingAsset {
                tag: "v1".to_string(),
                pattern: "x".to_string(),
            }
            .is_recoverable()
        );
    }

    #[test]
    fn no_release_message() {
        assert_eq!(SourceError::NoRelease(None).to_string(), "no release found");
        assert_eq!(
            SourceError::NoRelease(Some("v9".to_string())).to_string(),
            "no release found for tag v9"
        );
    }
}
