//! Query model: what to read from which table
//!
//! A [`QuerySpec`] names a table, its time field and ordering key (resolved
//! from the [`TableRegistry`]), an optional raw filter predicate and an
//! optional field projection. The time range is supplied separately per
//! window, see [`TimeRange`].

pub mod registry;
pub mod time;

pub use registry::TableRegistry;
pub use time::{TimeRange, format_timestamp, parse_timestamp};

use crate::error::{FetchError, Result};

/// Resolved description of one logical query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    table: String,
    time_field: String,
    order_by: Vec<String>,
    filter: Option<String>,
    fields: Option<Vec<String>>,
}

impl QuerySpec {
    /// Resolve `table` against the registry.
    pub fn new(registry: &TableRegistry, table: &str) -> Result<Self> {
        let config = registry.get(table)?;
        Ok(Self {
            table: table.to_string(),
            time_field: config.time_field.clone(),
            order_by: config.ordering_key(),
            filter: None,
            fields: None,
        })
    }

    /// Attach a filter predicate. The text is passed to the store verbatim
    /// and must come from a trusted operator.
    pub fn with_filter(mut self, filter: Option<&str>) -> Self {
        self.filter = filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        self
    }

    /// Restrict the returned columns to `fields`, in that order.
    pub fn with_fields(mut self, fields: Option<Vec<String>>) -> Result<Self> {
        if let Some(fields) = &fields {
            validate_fields(fields)?;
        }
        self.fields = fields;
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }
}

/// Split a comma separated `--fields` argument.
pub fn parse_field_list(input: &str) -> Result<Vec<String>> {
    let fields: Vec<String> = input.split(',').map(|f| f.trim().to_string()).collect();
    validate_fields(&fields)?;
    Ok(fields)
}

fn validate_fields(fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Err(FetchError::invalid_config("field list must not be empty"));
    }
    for (idx, field) in fields.iter().enumerate() {
        if field.trim().is_empty() {
            return Err(FetchError::invalid_config(format!(
                "field list contains an empty name at position {}",
                idx + 1
            )));
        }
        if fields[..idx].contains(field) {
            return Err(FetchError::invalid_config(format!(
                "field '{field}' is listed more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_resolves_registry_entry() {
        let registry = TableRegistry::builtin();
        let spec = QuerySpec::new(&registry, "following").unwrap();
        assert_eq!(spec.time_field(), "following_created_at_ts");
        assert_eq!(
            spec.order_by(),
            &["following_created_at_ts", "user_id", "following_id"]
        );
        assert!(spec.filter().is_none());
        assert!(spec.fields().is_none());
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let registry = TableRegistry::builtin();
        assert!(matches!(
            QuerySpec::new(&registry, "nope"),
            Err(FetchError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_blank_filter_is_dropped() {
        let registry = TableRegistry::builtin();
        let spec = QuerySpec::new(&registry, "tweets")
            .unwrap()
            .with_filter(Some("   "));
        assert!(spec.filter().is_none());

        let spec = spec.with_filter(Some(" lang = 'en' "));
        assert_eq!(spec.filter(), Some("lang = 'en'"));
    }

    #[test]
    fn test_field_list_validation() {
        assert_eq!(
            parse_field_list("tweet_id, text").unwrap(),
            vec!["tweet_id", "text"]
        );
        assert!(parse_field_list("tweet_id,,text").is_err());
        assert!(parse_field_list("a,b,a").is_err());

        let registry = TableRegistry::builtin();
        let spec = QuerySpec::new(&registry, "tweets").unwrap();
        assert!(spec.clone().with_fields(Some(vec![])).is_err());
        assert!(spec.with_fields(None).is_ok());
    }
}
