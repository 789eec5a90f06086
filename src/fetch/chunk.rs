//! Chunk envelope handed to stream consumers and export sinks

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::query::{QuerySpec, format_timestamp};
use crate::record::Record;

use super::planner::Window;
use super::reader::Page;

fn serialize_ts<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub table_name: String,
    pub time_field: String,
    /// When the page query was issued
    #[serde(serialize_with = "serialize_ts")]
    pub query_time: DateTime<Utc>,
}

/// One page of records plus its window and offset context.
///
/// `chunk_size == data.len()`. A chunk with `chunk_size == 0` is the last
/// one of its window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub window_index: usize,
    #[serde(serialize_with = "serialize_ts")]
    pub window_start: DateTime<Utc>,
    #[serde(serialize_with = "serialize_ts")]
    pub window_end: DateTime<Utc>,
    pub chunk_offset: usize,
    pub chunk_size: usize,
    pub total_records_so_far: u64,
    pub data: Vec<Record>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub(crate) fn from_page(window: &Window, page: Page, total: u64, spec: &QuerySpec) -> Self {
        Self {
            window_index: window.index,
            window_start: window.start(),
            window_end: window.end(),
            chunk_offset: page.offset,
            chunk_size: page.records.len(),
            total_records_so_far: total,
            data: page.records,
            metadata: ChunkMetadata {
                table_name: spec.table().to_string(),
                time_field: spec.time_field().to_string(),
                query_time: page.query_time,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Column names of the first record, if any.
    pub fn columns(&self) -> Option<&[String]> {
        self.data.first().map(Record::columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{TableRegistry, TimeRange};
    use crate::record::FieldValue;

    #[test]
    fn test_envelope_shape() {
        let spec = QuerySpec::new(&TableRegistry::builtin(), "tweets").unwrap();
        let range = TimeRange::parse("2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z").unwrap();
        let window = crate::fetch::planner::plan(range, 60).unwrap().next().unwrap();
        let page = Page {
            offset: 1000,
            records: vec![Record::from_pairs([("tweet_id", FieldValue::Int(7))])],
            query_time: range.start(),
        };

        let chunk = Chunk::from_page(&window, page, 1001, &spec);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "window_index": 0,
                "window_start": "2024-01-01T00:00:00Z",
                "window_end": "2024-01-01T01:00:00Z",
                "chunk_offset": 1000,
                "chunk_size": 1,
                "total_records_so_far": 1001,
                "data": [{"tweet_id": 7}],
                "metadata": {
                    "table_name": "tweets",
                    "time_field": "created_at_ts",
                    "query_time": "2024-01-01T00:00:00Z"
                }
            })
        );
        assert_eq!(chunk.columns(), Some(&["tweet_id".to_string()][..]));
    }
}
