//! Hive-style partition directories.
//!
//! A partitioned file lives under one `column=value` directory per
//! partition column, for example `time/year=2018/month=November/`. Values
//! are escaped so they always form a single path segment; null and empty
//! values map to [`DEFAULT_PARTITION`].

use std::collections::HashMap;
use std::fmt::Write;

/// Directory value used for null or empty partition values.
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

fn needs_escape(c: char) -> bool {
    c.is_ascii_control()
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
        )
}

/// Escape a partition value for use in a directory name.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if needs_escape(c) {
            // Writing to a String cannot fail
            let _ = write!(escaped, "%{:02X}", c as u32);
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Reverse [`escape_value`]. Malformed escapes are kept literally.
pub fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value.get(i + 1..i + 3).and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Render one partition directory segment.
pub fn partition_segment(column: &str, value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => format!("{column}={}", escape_value(v)),
        _ => format!("{column}={DEFAULT_PARTITION}"),
    }
}

/// Render the directory for a set of partition values, e.g.
/// `year=2018/month=November`. Empty when the table is unpartitioned.
pub fn partition_dir(columns: &[&str], values: &[Option<String>]) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| partition_segment(column, value.as_deref()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Extracts partition values from table-relative file paths.
#[derive(Debug, Clone)]
pub struct PartitionExtractor {
    columns: Vec<String>,
}

impl PartitionExtractor {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Extract the configured columns from `path`.
    ///
    /// Columns without a `column=value` segment are absent from the result;
    /// default-partition values are present as `None`.
    pub fn extract(&self, path: &str) -> HashMap<String, Option<String>> {
        let mut values = HashMap::new();

        for segment in path.split('/') {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            if !self.columns.iter().any(|c| c == key) {
                continue;
            }

            let value = (value != DEFAULT_PARTITION).then(|| unescape_value(value));
            values.insert(key.to_string(), value);
        }

        values
    }
}
