//! Typed NDJSON reader.
//!
//! Reads (optionally gzip-compressed) newline-delimited JSON and decodes
//! every line into a typed record. Scalars are coerced to the declared field
//! kind before decoding; a line that still does not decode is skipped and
//! counted rather than failing the file.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use snafu::prelude::*;
use std::io::{BufRead, BufReader, Read};
use tracing::{debug, warn};

use crate::config::CompressionFormat;
use crate::emit;
use crate::error::{DecompressSnafu, ReaderError};
use crate::metrics::events::{BytesRead, RecordsRead, RecordsSkipped};

/// Scalar kind a source field is coerced to before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
}

/// A record type that can be read from an NDJSON dataset.
pub trait SourceRecord: DeserializeOwned + Send + 'static {
    /// Dataset label used in logs and metrics.
    const DATASET: &'static str;

    /// Source field names with the kind each is coerced to.
    const FIELDS: &'static [(&'static str, FieldKind)];
}

/// Records decoded from one file.
#[derive(Debug)]
pub struct ReadResult<T> {
    pub records: Vec<T>,
    /// Lines that were not a JSON object or lacked a required field.
    pub skipped: usize,
}

/// Reader for NDJSON files.
#[derive(Debug, Clone, Copy)]
pub struct NdjsonReader {
    compression: CompressionFormat,
}

impl NdjsonReader {
    pub fn new(compression: CompressionFormat) -> Self {
        Self { compression }
    }

    /// Decode every line of `data`.
    ///
    /// Only failures to decompress the file are errors; blank lines are
    /// ignored and malformed lines are skipped.
    pub fn read<T: SourceRecord>(
        &self,
        data: &Bytes,
        path: &str,
    ) -> Result<ReadResult<T>, ReaderError> {
        emit!(BytesRead {
            bytes: data.len() as u64,
        });

        let reader: Box<dyn Read + '_> = match self.compression {
            CompressionFormat::Gzip => Box::new(flate2::read::GzDecoder::new(&data[..])),
            CompressionFormat::None => Box::new(&data[..]),
        };

        let mut records = Vec::new();
        let mut skipped = 0;

        for (line_num, line) in BufReader::new(reader).split(b'\n').enumerate() {
            let line = line.context(DecompressSnafu {
                path: path.to_string(),
            })?;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match decode_line::<T>(&line) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!(path, line = line_num + 1, %reason, "Skipping malformed record");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!(
                dataset = T::DATASET,
                path, skipped, "Skipped malformed records"
            );
            emit!(RecordsSkipped {
                dataset: T::DATASET,
                count: skipped as u64,
            });
        }
        emit!(RecordsRead {
            dataset: T::DATASET,
            count: records.len() as u64,
        });

        debug!(
            dataset = T::DATASET,
            path,
            records = records.len(),
            "Parsed file"
        );

        Ok(ReadResult { records, skipped })
    }
}

fn decode_line<T: SourceRecord>(line: &[u8]) -> Result<T, serde_json::Error> {
    let mut value: Value = serde_json::from_slice(line)?;
    if let Value::Object(obj) = &mut value {
        coerce_fields(obj, T::FIELDS);
    }
    serde_json::from_value(value)
}

fn coerce_fields(obj: &mut Map<String, Value>, fields: &[(&str, FieldKind)]) {
    for (name, kind) in fields {
        if let Some(value) = obj.get_mut(*name) {
            coerce_value(value, *kind);
        }
    }
}

/// Coerce a single value to the expected kind.
///
/// Values that cannot represent the kind become null.
fn coerce_value(value: &mut Value, kind: FieldKind) {
    let coerced = match (kind, &*value) {
        (_, Value::Null) => return,
        (FieldKind::Text, Value::String(_)) => return,
        (FieldKind::Text, Value::Number(n)) => Value::String(n.to_string()),
        (FieldKind::Text, Value::Bool(b)) => Value::String(b.to_string()),
        (FieldKind::Text, other) => Value::String(other.to_string()),

        (FieldKind::Integer, Value::Number(n)) if n.is_i64() => return,
        (FieldKind::Integer, Value::Number(n)) => n.as_f64().map_or(Value::Null, integral),
        (FieldKind::Integer, Value::String(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::from(i),
                Err(_) => s.parse::<f64>().map_or(Value::Null, integral),
            }
        }

        (FieldKind::Float, Value::Number(_)) => return,
        (FieldKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),

        _ => Value::Null,
    };
    *value = coerced;
}

fn integral(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        id: String,
        name: Option<String>,
        count: Option<i64>,
        length: Option<f64>,
    }

    impl SourceRecord for Probe {
        const DATASET: &'static str = "probe";
        const FIELDS: &'static [(&'static str, FieldKind)] = &[
            ("id", FieldKind::Text),
            ("name", FieldKind::Text),
            ("count", FieldKind::Integer),
            ("length", FieldKind::Float),
        ];
    }

    fn read(data: &[u8], compression: CompressionFormat) -> ReadResult<Probe> {
        NdjsonReader::new(compression)
            .read(&Bytes::copy_from_slice(data), "test.json")
            .unwrap()
    }

    #[test]
    fn test_reads_lines_and_skips_malformed() {
        let data = b"{\"id\": \"a\", \"count\": 3}\n\
            not json\n\
            \n\
            {\"name\": \"missing id\"}\n\
            [1, 2, 3]\n\
            {\"id\": \"b\", \"length\": 218.93\n\
            {\"id\": \"c\", \"length\": 218.93}\n";

        let result = read(data, CompressionFormat::None);
        assert_eq!(result.skipped, 4);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].id, "a");
        assert_eq!(result.records[0].count, Some(3));
        assert_eq!(result.records[1].length, Some(218.93));
    }

    #[test]
    fn test_numeric_text_field_becomes_string() {
        let result = read(br#"{"id": 26, "name": null}"#, CompressionFormat::None);
        assert_eq!(result.records[0].id, "26");
        assert_eq!(result.records[0].name, None);
    }

    #[test]
    fn test_numeric_strings_and_empty_strings() {
        let data = br#"{"id": "x", "count": "2018", "length": ""}
{"id": "y", "count": "", "length": "12.5"}
{"id": "z", "count": 1541.0, "length": "n/a"}"#;
        let result = read(data, CompressionFormat::None);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.records[0].count, Some(2018));
        assert_eq!(result.records[0].length, None);
        assert_eq!(result.records[1].count, None);
        assert_eq!(result.records[1].length, Some(12.5));
        assert_eq!(result.records[2].count, Some(1541));
        assert_eq!(result.records[2].length, None);
    }

    #[test]
    fn test_gzip_input() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"{\"id\": \"g\"}\n{\"id\": \"h\"}\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let result = read(&compressed, CompressionFormat::Gzip);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].id, "h");
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let err = NdjsonReader::new(CompressionFormat::Gzip)
            .read::<Probe>(&Bytes::from_static(b"definitely not gzip"), "bad.json.gz")
            .unwrap_err();
        assert!(matches!(err, ReaderError::Decompress { .. }));
    }

    #[test]
    fn test_coerce_value_kinds() {
        let mut value = json!(true);
        coerce_value(&mut value, FieldKind::Integer);
        assert_eq!(value, Value::Null);

        let mut value = json!({"nested": 1});
        coerce_value(&mut value, FieldKind::Text);
        assert_eq!(value, json!(r#"{"nested":1}"#));

        let mut value = json!(" 42 ");
        coerce_value(&mut value, FieldKind::Integer);
        assert_eq!(value, json!(42));
    }
}
