//! Typed access to stored batches when reading a table back.

use arrow::array::{
    Array, ArrayRef, ArrowPrimitiveType, AsArray, PrimitiveArray, RecordBatch, StringArray,
};
use arrow::datatypes::{Float64Type, Int32Type, Int64Type, TimestampMicrosecondType};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{DecodeBatchSnafu, InvalidPartitionSnafu, SinkError};

/// Column lookup on one stored batch.
pub struct ColumnReader<'a> {
    batch: &'a RecordBatch,
    table: &'static str,
}

impl<'a> ColumnReader<'a> {
    pub fn new(batch: &'a RecordBatch, table: &'static str) -> Self {
        Self { batch, table }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    fn column(&self, name: &str) -> Result<&'a ArrayRef, SinkError> {
        self.batch.column_by_name(name).ok_or_else(|| {
            DecodeBatchSnafu {
                table: self.table,
                message: format!("missing column {name}"),
            }
            .build()
        })
    }

    fn mismatch(&self, name: &str, expected: &str) -> SinkError {
        DecodeBatchSnafu {
            table: self.table,
            message: format!("column {name} is not {expected}"),
        }
        .build()
    }

    pub fn strings(&self, name: &str) -> Result<&'a StringArray, SinkError> {
        self.column(name)?
            .as_string_opt::<i32>()
            .ok_or_else(|| self.mismatch(name, "a string column"))
    }

    fn primitives<T: ArrowPrimitiveType>(
        &self,
        name: &str,
        expected: &str,
    ) -> Result<&'a PrimitiveArray<T>, SinkError> {
        self.column(name)?
            .as_primitive_opt::<T>()
            .ok_or_else(|| self.mismatch(name, expected))
    }

    pub fn int32s(&self, name: &str) -> Result<&'a PrimitiveArray<Int32Type>, SinkError> {
        self.primitives(name, "an int32 column")
    }

    pub fn int64s(&self, name: &str) -> Result<&'a PrimitiveArray<Int64Type>, SinkError> {
        self.primitives(name, "an int64 column")
    }

    pub fn float64s(&self, name: &str) -> Result<&'a PrimitiveArray<Float64Type>, SinkError> {
        self.primitives(name, "a float64 column")
    }

    pub fn timestamps(
        &self,
        name: &str,
    ) -> Result<&'a PrimitiveArray<TimestampMicrosecondType>, SinkError> {
        self.primitives(name, "a microsecond timestamp column")
    }
}

/// Nullable string value at `index`.
pub fn opt_string(array: &StringArray, index: usize) -> Option<String> {
    array.is_valid(index).then(|| array.value(index).to_string())
}

/// Nullable primitive value at `index`.
pub fn opt_value<T: ArrowPrimitiveType>(
    array: &PrimitiveArray<T>,
    index: usize,
) -> Option<T::Native> {
    array.is_valid(index).then(|| array.value(index))
}

/// Partition values restored from a file's directory.
pub struct PartitionValues<'a> {
    values: &'a HashMap<String, Option<String>>,
    table: &'static str,
}

impl<'a> PartitionValues<'a> {
    pub fn new(values: &'a HashMap<String, Option<String>>, table: &'static str) -> Self {
        Self { values, table }
    }

    /// Text value of a partition column; `None` for the default partition.
    pub fn text(&self, column: &str) -> Result<Option<String>, SinkError> {
        match self.values.get(column) {
            Some(value) => Ok(value.clone()),
            None => DecodeBatchSnafu {
                table: self.table,
                message: format!("file path has no {column} partition"),
            }
            .fail(),
        }
    }

    /// Parse a partition value into `T`.
    pub fn parse<T: FromStr>(&self, column: &str) -> Result<Option<T>, SinkError> {
        self.text(column)?
            .map(|value| {
                value.parse::<T>().map_err(|_| {
                    InvalidPartitionSnafu {
                        table: self.table,
                        column,
                        value: value.clone(),
                    }
                    .build()
                })
            })
            .transpose()
    }
}
