//! Glob-style file patterns and listing of matching input files.
//!
//! Patterns are relative to the input root and matched one path segment at
//! a time: `*` matches any run of characters inside a segment and `?` a
//! single character, so `song_data/*/*/*/*.json` only matches files exactly
//! four directories below `song_data`.

use futures::TryStreamExt;
use object_store::path::Path;
use regex::Regex;

use crate::error::{ConfigError, StorageError};
use crate::storage::StorageProvider;

/// A compiled file pattern.
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: String,
    segments: Vec<Regex>,
    prefix: Option<String>,
}

impl FilePattern {
    /// Compile a pattern such as `log_data/*.json`.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            message: message.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut segments = Vec::new();
        let mut literal = Vec::new();
        let mut in_prefix = true;

        for segment in pattern.split('/') {
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }

            let has_glob = segment.contains(['*', '?']);
            if in_prefix && !has_glob {
                literal.push(segment);
            } else {
                in_prefix = false;
            }

            let regex = Regex::new(&segment_regex(segment))
                .map_err(|e| invalid(&e.to_string()))?;
            segments.push(regex);
        }

        // The last segment names files, so it never belongs to the prefix
        if in_prefix {
            literal.pop();
        }

        let prefix = (!literal.is_empty()).then(|| literal.join("/"));

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
            prefix,
        })
    }

    /// The pattern text.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Longest directory prefix without wildcards, used to narrow listing.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Check whether a root-relative path matches.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        parts.len() == self.segments.len()
            && parts
                .iter()
                .zip(&self.segments)
                .all(|(part, regex)| regex.is_match(part))
    }
}

fn segment_regex(segment: &str) -> String {
    let mut regex = String::with_capacity(segment.len() + 2);
    regex.push('^');
    let mut literal = [0u8; 4];
    for c in segment.chars() {
        match c {
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            c => regex.push_str(&regex::escape(c.encode_utf8(&mut literal))),
        }
    }
    regex.push('$');
    regex
}

/// List every file under `storage` matching `pattern`, sorted by path.
///
/// The order is stable across runs, so file positions can seed ids.
pub async fn list_matching(
    storage: &StorageProvider,
    pattern: &FilePattern,
) -> Result<Vec<Path>, StorageError> {
    let mut paths: Vec<Path> = storage
        .list_with_prefix(pattern.prefix())
        .try_filter(|path| futures::future::ready(pattern.matches(path.as_ref())))
        .try_collect()
        .await?;

    paths.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    Ok(paths)
}
