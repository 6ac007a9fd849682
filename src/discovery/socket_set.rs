//! Directory snapshotting for upstream socket files.
//!
//! # Responsibilities
//! - List a directory and match entries against a glob pattern
//! - Produce a deduplicated, ordered `TargetSet`
//! - Classify failures as retryable (missing, empty) or fatal (bad pattern)

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// One backend worker, identified by the path of its domain socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpstreamTarget {
    path: PathBuf,
}

impl UpstreamTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unix:{}", self.path.display())
    }
}

/// Snapshot of the targets found by a single discovery pass.
///
/// Order is preserved for selection policies that care about it (`first`,
/// `round_robin`), but two sets are equal when they hold the same members.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    targets: Vec<UpstreamTarget>,
}

impl TargetSet {
    /// Build a set from paths, dropping duplicates while keeping first-seen order.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut seen = BTreeSet::new();
        let targets = paths
            .into_iter()
            .map(|p| UpstreamTarget::new(p))
            .filter(|t| seen.insert(t.clone()))
            .collect();
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpstreamTarget> {
        self.targets.iter()
    }

    fn members(&self) -> BTreeSet<&UpstreamTarget> {
        self.targets.iter().collect()
    }
}

impl PartialEq for TargetSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.members() == other.members()
    }
}

impl Eq for TargetSet {}

/// Error type for discovery passes.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("socket directory {} does not exist or is not a directory", .directory.display())]
    NotFound { directory: PathBuf },

    #[error("no files matching {pattern} found in {}", .directory.display())]
    Empty { directory: PathBuf, pattern: String },

    #[error("invalid socket pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to list {}: {source}", .directory.display())]
    Io {
        directory: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiscoveryError {
    /// Retryable errors are expected while workers start up.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DiscoveryError::Pattern { .. })
    }
}

/// Check that `pattern` is a valid glob without touching the filesystem.
pub fn validate_pattern(pattern: &str) -> Result<(), DiscoveryError> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|source| DiscoveryError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// `discover` on the blocking thread pool, for use inside async tasks.
pub async fn scan(directory: PathBuf, pattern: String) -> Result<TargetSet, DiscoveryError> {
    let listed = directory.clone();
    tokio::task::spawn_blocking(move || discover(&directory, &pattern))
        .await
        .unwrap_or_else(|join_error| {
            Err(DiscoveryError::Io {
                directory: listed,
                source: std::io::Error::other(join_error),
            })
        })
}

/// List `directory` and return every entry matching `pattern`.
///
/// Blocks on filesystem calls.
pub fn discover(directory: &Path, pattern: &str) -> Result<TargetSet, DiscoveryError> {
    match std::fs::metadata(directory) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DiscoveryError::NotFound {
                directory: directory.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound {
                directory: directory.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(DiscoveryError::Io {
                directory: directory.to_path_buf(),
                source,
            })
        }
    }

    // The directory part must not be interpreted as a pattern.
    let escaped = glob::Pattern::escape(&directory.to_string_lossy());
    let full_pattern = format!("{}/{}", escaped.trim_end_matches('/'), pattern);

    let entries = glob::glob(&full_pattern).map_err(|source| DiscoveryError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => {
                return Err(DiscoveryError::Io {
                    directory: directory.to_path_buf(),
                    source: e.into_error(),
                })
            }
        }
    }

    if paths.is_empty() {
        return Err(DiscoveryError::Empty {
            directory: directory.to_path_buf(),
            pattern: pattern.to_string(),
        });
    }

    Ok(TargetSet::from_paths(paths))
}
