//! Parquet writer for export operations
//!
//! The schema is inferred from the first non-empty chunk: the column list
//! comes from the selected fields or the first record, and each column's
//! type from its first non-null value (all-null columns become Utf8). Every
//! chunk is flushed as its own row group unless a fixed row-group size is
//! configured, in which case rows are buffered up to that size. The file is
//! only created once the first row arrives; an export with no rows removes
//! any file already at the path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::parquet::arrow::AsyncArrowWriter;
use ::parquet::basic::{Compression, ZstdLevel};
use ::parquet::file::properties::WriterProperties;
use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tracing::{debug, warn};

use crate::error::{FetchError, OutputError, Result};
use crate::fetch::Chunk;
use crate::record::{FieldValue, Record};

use super::{FormatWriter, file_size_or_zero, validate_path};

/// Arrow type chosen for one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
    Timestamp,
    Date32,
    Binary,
}

impl ColumnKind {
    fn of(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(ColumnKind::Boolean),
            FieldValue::Int(_) => Some(ColumnKind::Int64),
            FieldValue::Float(_) => Some(ColumnKind::Float64),
            FieldValue::Numeric(_)
            | FieldValue::Text(_)
            | FieldValue::Json(_)
            | FieldValue::Uuid(_) => Some(ColumnKind::Utf8),
            FieldValue::Timestamp(_) => Some(ColumnKind::Timestamp),
            FieldValue::Date(_) => Some(ColumnKind::Date32),
            FieldValue::Bytes(_) => Some(ColumnKind::Binary),
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Utf8 => DataType::Utf8,
            ColumnKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            ColumnKind::Date32 => DataType::Date32,
            ColumnKind::Binary => DataType::Binary,
        }
    }
}

struct Column {
    name: String,
    kind: ColumnKind,
}

/// Writer for Parquet format (ZSTD compressed)
pub struct ParquetWriter {
    path: PathBuf,
    select_fields: Option<Vec<String>>,
    row_group_size: Option<usize>,
    writer: Option<AsyncArrowWriter<File>>,
    columns: Vec<Column>,
    schema: Option<SchemaRef>,
    pending: Vec<Record>,
    warned_extra: bool,
    row_groups: usize,
    written: usize,
    closed: bool,
}

impl ParquetWriter {
    /// Create a new Parquet writer
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `select_fields` - Column order when a field projection is in effect
    /// * `row_group_size` - Rows per row group; `None` means one per chunk
    pub async fn new(
        path: &Path,
        select_fields: Option<Vec<String>>,
        row_group_size: Option<usize>,
    ) -> Result<Self> {
        validate_path(path)?;
        if row_group_size == Some(0) {
            return Err(FetchError::invalid_config("row_group_size must be positive"));
        }

        debug!("Created Parquet writer for: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            select_fields,
            row_group_size,
            writer: None,
            columns: Vec::new(),
            schema: None,
            pending: Vec::new(),
            warned_extra: false,
            row_groups: 0,
            written: 0,
            closed: false,
        })
    }

    /// Fix the schema from the first batch of rows and open the file.
    async fn open(&mut self, records: &[Record]) -> Result<()> {
        let names: Vec<String> = match &self.select_fields {
            Some(fields) => fields.clone(),
            None => records
                .first()
                .map(|r| r.columns().to_vec())
                .unwrap_or_default(),
        };

        self.columns = names
            .into_iter()
            .map(|name| {
                let kind = records
                    .iter()
                    .filter_map(|r| r.get(&name).and_then(ColumnKind::of))
                    .next()
                    .unwrap_or(ColumnKind::Utf8);
                Column { name, kind }
            })
            .collect();

        let schema: SchemaRef = Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.kind.data_type(), true))
                .collect::<Vec<_>>(),
        ));

        let file = File::create(&self.path)
            .await
            .map_err(|source| OutputError::CreateFailed {
                path: self.path.clone(),
                source,
            })?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();
        let writer = AsyncArrowWriter::try_new(file, Arc::clone(&schema), Some(props))?;

        debug!(
            columns = self.columns.len(),
            "Parquet schema fixed: {}",
            self.columns
                .iter()
                .map(|c| format!("{}:{:?}", c.name, c.kind))
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.schema = Some(schema);
        self.writer = Some(writer);
        Ok(())
    }

    fn warn_extra_columns(&mut self, records: &[Record]) {
        if self.warned_extra {
            return;
        }
        let extra: Vec<&str> = records
            .iter()
            .flat_map(|r| r.columns())
            .filter(|name| !self.columns.iter().any(|c| &c.name == *name))
            .map(String::as_str)
            .collect();
        if let Some(first) = extra.first() {
            warn!("Parquet schema is fixed; dropping column '{}' and any others not in it", first);
            self.warned_extra = true;
        }
    }

    fn build_batch(&self, records: &[Record]) -> Result<RecordBatch> {
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| FetchError::write_failed("Parquet writer", "schema not initialized"))?;
        let arrays = self
            .columns
            .iter()
            .map(|column| build_array(column, records))
            .collect::<Result<Vec<ArrayRef>>>()?;
        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    /// Write `records` as one row group.
    async fn write_row_group(&mut self, records: &[Record]) -> Result<()> {
        let batch = self.build_batch(records)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FetchError::write_failed("Parquet writer", "file not open"))?;
        writer.write(&batch).await?;
        writer.flush().await?;
        self.row_groups += 1;
        debug!(rows = records.len(), row_groups = self.row_groups, "Flushed Parquet row group");
        Ok(())
    }
}

fn mismatch(column: &Column, value: &FieldValue) -> FetchError {
    FetchError::SchemaMismatch(format!(
        "column '{}' is {:?} but a record has {:?}",
        column.name, column.kind, value
    ))
}

/// Pull one typed value per record, nulls for missing fields.
fn column_values<T>(
    column: &Column,
    records: &[Record],
    convert: impl Fn(&FieldValue) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    records
        .iter()
        .map(|record| match record.get(&column.name) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(value) => convert(value)
                .map(Some)
                .ok_or_else(|| mismatch(column, value)),
        })
        .collect()
}

fn build_array(column: &Column, records: &[Record]) -> Result<ArrayRef> {
    let array: ArrayRef = match column.kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(column_values(column, records, |v| {
            match v {
                FieldValue::Bool(b) => Some(*b),
                _ => None,
            }
        })?)),
        ColumnKind::Int64 => Arc::new(Int64Array::from(column_values(column, records, |v| match v {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        })?)),
        ColumnKind::Float64 => Arc::new(Float64Array::from(column_values(column, records, |v| {
            match v {
                FieldValue::Float(f) => Some(*f),
                FieldValue::Int(i) => Some(*i as f64),
                _ => None,
            }
        })?)),
        ColumnKind::Utf8 => Arc::new(StringArray::from(column_values(column, records, |v| {
            Some(v.to_plain_text())
        })?)),
        ColumnKind::Timestamp => Arc::new(
            TimestampMicrosecondArray::from(column_values(column, records, |v| match v {
                FieldValue::Timestamp(ts) => Some(ts.timestamp_micros()),
                _ => None,
            })?)
            .with_timezone("UTC"),
        ),
        ColumnKind::Date32 => {
            let epoch = DateTime::<Utc>::UNIX_EPOCH.date_naive();
            Arc::new(Date32Array::from(column_values(column, records, |v| match v {
                FieldValue::Date(d) => i32::try_from((*d - epoch).num_days()).ok(),
                _ => None,
            })?))
        }
        ColumnKind::Binary => Arc::new(BinaryArray::from_iter(column_values(
            column,
            records,
            |v| match v {
                FieldValue::Bytes(b) => Some(b.clone()),
                _ => None,
            },
        )?)),
    };
    Ok(array)
}

/// Drop whatever an earlier run left at `path` so an export with no rows
/// never reports a previous file.
async fn remove_stale_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("No rows exported; removed existing file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No rows exported; Parquet file not created");
            Ok(())
        }
        Err(e) => Err(FetchError::write_failed("Failed to remove existing Parquet file", e)),
    }
}

#[async_trait]
impl FormatWriter for ParquetWriter {
    async fn write_chunk(&mut self, chunk: &Chunk) -> Result<usize> {
        if chunk.data.is_empty() {
            return Ok(0);
        }
        if self.writer.is_none() {
            self.open(&chunk.data).await?;
        }
        self.warn_extra_columns(&chunk.data);

        match self.row_group_size {
            None => self.write_row_group(&chunk.data).await?,
            Some(size) => {
                self.pending.extend(chunk.data.iter().cloned());
                while self.pending.len() >= size {
                    let rest = self.pending.split_off(size);
                    let group = std::mem::replace(&mut self.pending, rest);
                    self.write_row_group(&group).await?;
                }
            }
        }

        self.written += chunk.data.len();
        Ok(chunk.data.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.pending.is_empty() {
            let group = std::mem::take(&mut self.pending);
            self.write_row_group(&group).await?;
        }
        match self.writer.take() {
            Some(writer) => {
                writer.close().await?;
                debug!(
                    "Finalized Parquet file: {} ({} records, {} row groups)",
                    self.path.display(),
                    self.written,
                    self.row_groups
                );
            }
            None => remove_stale_file(&self.path).await?,
        }
        self.closed = true;
        Ok(())
    }

    async fn file_size(&mut self) -> Result<u64> {
        file_size_or_zero(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::writers::test_support::chunk;
    use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use arrow::array::Array;
    use chrono::TimeZone;

    fn row(id: i64, score: Option<f64>, name: &str) -> Record {
        Record::from_pairs([
            ("id", FieldValue::Int(id)),
            ("score", score.into()),
            ("name", FieldValue::from(name)),
            (
                "created_at_ts",
                FieldValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, id as u32).unwrap()),
            ),
        ])
    }

    fn read_back(path: &Path) -> (usize, Vec<RecordBatch>) {
        let file = std::fs::File::open(path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        let row_groups = builder.metadata().num_row_groups();
        let batches = builder.build().unwrap().collect::<std::result::Result<Vec<_>, _>>().unwrap();
        (row_groups, batches)
    }

    #[tokio::test]
    async fn test_row_group_per_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer = ParquetWriter::new(&path, None, None).await.unwrap();

        writer
            .write_chunk(&chunk(0, vec![row(1, None, "a"), row(2, Some(0.5), "b")]))
            .await
            .unwrap();
        writer.write_chunk(&chunk(2, vec![])).await.unwrap();
        writer.write_chunk(&chunk(2, vec![row(3, Some(1.5), "c")])).await.unwrap();
        writer.finalize().await.unwrap();

        let (row_groups, batches) = read_back(&path);
        assert_eq!(row_groups, 2);
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 3);

        let schema = batches[0].schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        // first non-null value decides the type
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(
            schema.field(3).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
        assert!(batches[0].column(1).is_null(0));
    }

    #[tokio::test]
    async fn test_fixed_row_group_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer = ParquetWriter::new(&path, None, Some(4)).await.unwrap();

        for start in [0i64, 3, 6] {
            let rows = (start..start + 3).map(|i| row(i, Some(1.0), "x")).collect();
            writer.write_chunk(&chunk(start as usize, rows)).await.unwrap();
        }
        writer.finalize().await.unwrap();

        let (row_groups, batches) = read_back(&path);
        assert_eq!(row_groups, 3); // 4 + 4 + 1
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 9);
    }

    #[tokio::test]
    async fn test_missing_field_is_null_and_conflict_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer = ParquetWriter::new(&path, None, None).await.unwrap();

        writer.write_chunk(&chunk(0, vec![row(1, Some(2.0), "a")])).await.unwrap();
        let partial = Record::from_pairs([("id", FieldValue::Int(2))]);
        writer.write_chunk(&chunk(1, vec![partial])).await.unwrap();

        let conflicting = Record::from_pairs([("id", FieldValue::from("three"))]);
        let err = writer.write_chunk(&chunk(2, vec![conflicting])).await.unwrap_err();
        assert!(matches!(err, FetchError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_no_rows_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer = ParquetWriter::new(&path, None, None).await.unwrap();

        writer.write_chunk(&chunk(0, vec![])).await.unwrap();
        writer.finalize().await.unwrap();
        assert!(!path.exists());
        assert_eq!(writer.file_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_rows_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        std::fs::write(&path, "previous export").unwrap();

        let mut writer = ParquetWriter::new(&path, None, None).await.unwrap();
        writer.write_chunk(&chunk(0, vec![])).await.unwrap();
        writer.finalize().await.unwrap();

        assert!(!path.exists());
        assert_eq!(writer.file_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writer_runs_on_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer: Box<dyn FormatWriter> =
            Box::new(ParquetWriter::new(&path, None, None).await.unwrap());

        let size = tokio::spawn(async move {
            writer.write_chunk(&chunk(0, vec![row(1, Some(1.0), "a")])).await?;
            writer.finalize().await?;
            writer.file_size().await
        })
        .await
        .unwrap()
        .unwrap();

        assert!(size > 0);
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn test_zero_row_group_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ParquetWriter::new(&dir.path().join("x.parquet"), None, Some(0)).await;
        assert!(matches!(result, Err(FetchError::InvalidConfig(_))));
    }
}
