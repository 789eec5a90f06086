//! SQL text for page and count queries
//!
//! Identifiers are double-quoted (dotted names quote each part). The time
//! bounds are always bind parameters `$1` and `$2`. The filter predicate is
//! raw operator-supplied SQL and is inserted unchanged inside parentheses.

use crate::query::QuerySpec;

/// Quote an identifier, splitting `schema.table` into its parts.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

fn where_clause(spec: &QuerySpec) -> String {
    let time_field = quote_ident(spec.time_field());
    let mut clause = format!("{time_field} >= $1 AND {time_field} < $2");
    if let Some(filter) = spec.filter() {
        clause.push_str(" AND (");
        clause.push_str(filter);
        clause.push(')');
    }
    clause
}

/// `SELECT ... ORDER BY <ordering key> LIMIT n OFFSET o`
pub fn page_query(spec: &QuerySpec, limit: usize, offset: usize) -> String {
    let columns = match spec.fields() {
        Some(fields) => fields
            .iter()
            .map(|f| quote_ident(f))
            .collect::<Vec<_>>()
            .join(", "),
        None => "*".to_string(),
    };
    let order_by = spec
        .order_by()
        .iter()
        .map(|f| quote_ident(f))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {columns} FROM {} WHERE {} ORDER BY {order_by} LIMIT {limit} OFFSET {offset}",
        quote_ident(spec.table()),
        where_clause(spec),
    )
}

/// `SELECT COUNT(*)` over the same predicate as [`page_query`].
pub fn count_query(spec: &QuerySpec) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        quote_ident(spec.table()),
        where_clause(spec)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TableRegistry;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("tweets"), "\"tweets\"");
        assert_eq!(quote_ident("public.tweets"), "\"public\".\"tweets\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_page_query() {
        let registry = TableRegistry::builtin();
        let spec = QuerySpec::new(&registry, "tweets").unwrap();
        assert_eq!(
            page_query(&spec, 1000, 2000),
            "SELECT * FROM \"tweets\" WHERE \"created_at_ts\" >= $1 AND \"created_at_ts\" < $2 \
             ORDER BY \"created_at_ts\", \"tweet_id\" LIMIT 1000 OFFSET 2000"
        );
    }

    #[test]
    fn test_page_query_with_filter_and_fields() {
        let registry = TableRegistry::builtin();
        let spec = QuerySpec::new(&registry, "followers")
            .unwrap()
            .with_filter(Some("user_id = 42 OR user_id = 43"))
            .with_fields(Some(vec!["user_id".into(), "follower_id".into()]))
            .unwrap();
        let sql = page_query(&spec, 10, 0);
        assert!(sql.starts_with("SELECT \"user_id\", \"follower_id\" FROM \"followers\""));
        assert!(sql.contains("AND (user_id = 42 OR user_id = 43) ORDER BY"));
        assert!(sql.contains(
            "ORDER BY \"follower_created_at_ts\", \"user_id\", \"follower_id\" LIMIT 10 OFFSET 0"
        ));
    }

    #[test]
    fn test_count_query() {
        let registry = TableRegistry::builtin();
        let spec = QuerySpec::new(&registry, "users")
            .unwrap()
            .with_filter(Some("verified"));
        assert_eq!(
            count_query(&spec),
            "SELECT COUNT(*) FROM \"users\" WHERE \"updated_at\" >= $1 AND \"updated_at\" < $2 AND (verified)"
        );
    }
}
