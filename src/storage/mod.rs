//! Storage abstraction over the local filesystem and S3.
//!
//! Both the record sources and the table sink go through a
//! [`StorageProvider`] rooted at a URL. Paths handed to and returned by the
//! provider are relative to that root.

mod local;
mod s3;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, future::ready};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use local::LocalConfig;
pub use s3::S3Config;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

// URL patterns for the supported backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
}

fn matchers() -> &'static [(Backend, Regex)] {
    static MATCHERS: OnceLock<Vec<(Backend, Regex)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        [
            (Backend::S3, S3_PATH),
            (Backend::S3, S3_URL),
            (Backend::Local, FILE_URI),
            (Backend::Local, FILE_PATH),
        ]
        .into_iter()
        .map(|(backend, pattern)| {
            (
                backend,
                Regex::new(pattern).expect("storage URL patterns are valid"),
            )
        })
        .collect()
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    ///
    /// Trailing slashes are ignored, so `s3a://bucket/` and `s3a://bucket`
    /// name the same root.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let trimmed = url.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() && url.starts_with('/') {
            "/"
        } else {
            trimmed
        };

        for (backend, regex) in matchers() {
            if let Some(captures) = regex.captures(trimmed) {
                return match backend {
                    Backend::S3 => Ok(Self::parse_s3(&captures)),
                    Backend::Local => Ok(Self::parse_local(&captures)),
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(captures: &regex::Captures) -> Self {
        let bucket = captures
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let region = captures.name("region").map(|m| m.as_str().to_string());
        let key = captures.name("key").map(|m| Path::from(m.as_str()));

        BackendConfig::S3(S3Config {
            region,
            bucket,
            key,
        })
    }

    fn parse_local(captures: &regex::Captures) -> Self {
        let path = captures.name("path").map(|m| m.as_str()).unwrap_or("");
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        BackendConfig::Local(LocalConfig { path })
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    ///
    /// Options are backend-specific configuration keys such as
    /// `aws_access_key_id` or `aws_region`; the local backend ignores them.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// The canonical URL of the storage root.
    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List files under a prefix (relative to the root), recursively.
    ///
    /// Returns paths relative to the root. A missing prefix yields an empty
    /// stream.
    pub fn list_with_prefix(
        &self,
        prefix: Option<&str>,
    ) -> BoxStream<'_, Result<Path, StorageError>> {
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let full_prefix: Option<Path> = match (self.config.key(), prefix) {
            (Some(key), Some(prefix)) => {
                Some(key.parts().chain(Path::from(prefix).parts()).collect())
            }
            (Some(key), None) => Some(key.clone()),
            (None, Some(prefix)) => Some(Path::from(prefix)),
            (None, None) => None,
        };

        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::Success,
            duration: Duration::ZERO,
        });

        self.object_store
            .list(full_prefix.as_ref())
            .filter_map(move |meta| {
                let result = match meta {
                    Ok(metadata) => {
                        // Strip the root prefix so callers get relative paths
                        let relative: Path =
                            metadata.location.parts().skip(key_part_count).collect();
                        Some(Ok(relative))
                    }
                    Err(object_store::Error::NotFound { .. }) => None,
                    Err(source) => Some(Err(StorageError::ObjectStore { source })),
                };
                ready(result)
            })
            .boxed()
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)
    }

    /// Put bytes to a path, replacing any existing object.
    pub async fn put(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify_path(path), PutPayload::from(bytes))
            .await;

        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete a file. Deleting a missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(path)).await;

        emit!(StorageRequest {
            operation: StorageOperation::Delete,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        match result {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }
}
