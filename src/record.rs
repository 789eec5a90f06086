//! Typed rows as returned by the query backends
//!
//! A [`Record`] is one row: an ordered list of column names shared by every
//! row of the same page, plus one [`FieldValue`] per column. Records
//! serialize to JSON objects with the columns in query order.

use std::cmp::Ordering;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision number kept in its decimal text form.
    Numeric(String),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render the value as plain text (CSV cells, Utf8 columns).
    ///
    /// Null renders as the empty string.
    pub fn to_plain_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Numeric(s) | FieldValue::Text(s) => s.clone(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Json(v) => v.to_string(),
            FieldValue::Bytes(b) => BASE64.encode(b),
            FieldValue::Uuid(u) => u.to_string(),
        }
    }

    /// Total order used when sorting rows by an ordering key.
    ///
    /// Values of different kinds order by kind; nulls sort first.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            (Numeric(a), Numeric(b)) | (Text(a), Text(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.cmp(b),
            (Json(a), Json(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 2,
            FieldValue::Numeric(_) => 3,
            FieldValue::Text(_) => 4,
            FieldValue::Timestamp(_) => 5,
            FieldValue::Date(_) => 6,
            FieldValue::Json(_) => 7,
            FieldValue::Bytes(_) => 8,
            FieldValue::Uuid(_) => 9,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Json(v) => v.serialize(serializer),
            other => serializer.serialize_str(&other.to_plain_text()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(ts)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<FieldValue>,
}

impl Record {
    /// Build a record from a shared column list and one value per column.
    ///
    /// Missing trailing values are filled with nulls; surplus values are
    /// dropped.
    pub fn new(columns: Arc<[String]>, mut values: Vec<FieldValue>) -> Self {
        values.resize(columns.len(), FieldValue::Null);
        Self { columns, values }
    }

    /// Build a record from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let (columns, values): (Vec<String>, Vec<FieldValue>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Keep only `fields`, in the given order.
    ///
    /// Returns the name of the first field the record does not have.
    pub fn project(&self, columns: &Arc<[String]>) -> std::result::Result<Record, String> {
        let mut values = Vec::with_capacity(columns.len());
        for name in columns.iter() {
            match self.get(name) {
                Some(v) => values.push(v.clone()),
                None => return Err(name.clone()),
            }
        }
        Ok(Record {
            columns: Arc::clone(columns),
            values,
        })
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_serializes_in_column_order() {
        let record = Record::from_pairs([
            ("zeta", FieldValue::Int(1)),
            ("alpha", FieldValue::from("a")),
            ("missing", FieldValue::Null),
        ]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"a","missing":null}"#);
    }

    #[test]
    fn test_timestamp_and_bytes_render_as_text() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(FieldValue::Timestamp(ts).to_plain_text(), "2024-01-01T00:30:00Z");
        assert_eq!(FieldValue::Bytes(vec![1, 2, 3]).to_plain_text(), "AQID");
        assert_eq!(FieldValue::Null.to_plain_text(), "");
    }

    #[test]
    fn test_project_reorders_and_reports_missing() {
        let record = Record::from_pairs([("a", 1i64), ("b", 2i64), ("c", 3i64)]);
        let wanted: Arc<[String]> = vec!["c".to_string(), "a".to_string()].into();
        let projected = record.project(&wanted).unwrap();
        assert_eq!(projected.columns(), &["c".to_string(), "a".to_string()]);
        assert_eq!(projected.get("a"), Some(&FieldValue::Int(1)));

        let bad: Arc<[String]> = vec!["nope".to_string()].into();
        assert_eq!(record.project(&bad), Err("nope".to_string()));
    }

    #[test]
    fn test_sort_cmp_orders_nulls_first() {
        assert_eq!(FieldValue::Null.sort_cmp(&FieldValue::Int(0)), Ordering::Less);
        assert_eq!(FieldValue::Int(2).sort_cmp(&FieldValue::Float(1.5)), Ordering::Greater);
        assert_eq!(
            FieldValue::from("b").sort_cmp(&FieldValue::from("a")),
            Ordering::Greater
        );
    }
}
