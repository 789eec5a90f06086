//! Table registry: maps table names to their time field and ordering key

use std::collections::BTreeMap;

use crate::config::TableConfig;
use crate::error::{FetchError, Result};

/// Known tables, in name order.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableConfig>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the social-feed schema the tool ships with.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                "tweets",
                TableConfig::new("created_at_ts", "tweet_id").with_description("Tweets"),
            )
            .register(
                "replies",
                TableConfig::new("created_at_ts", "tweet_id").with_description("Replies"),
            )
            .register(
                "users",
                TableConfig::new("updated_at", "user_id").with_description("User profiles"),
            )
            .register(
                "followers",
                TableConfig::new("follower_created_at_ts", "follower_id")
                    .with_order_fields(&["follower_created_at_ts", "user_id", "follower_id"])
                    .with_description("Follower relations"),
            )
            .register(
                "following",
                TableConfig::new("following_created_at_ts", "following_id")
                    .with_order_fields(&["following_created_at_ts", "user_id", "following_id"])
                    .with_description("Following relations"),
            )
            .register(
                "quoted_status_summary",
                TableConfig::new("created_at_ts", "tweet_id")
                    .with_description("Quoted tweet summaries"),
            )
            .register(
                "retweeted_status_summary",
                TableConfig::new("created_at_ts", "tweet_id")
                    .with_description("Retweeted tweet summaries"),
            )
            .register(
                "kol_task_status",
                TableConfig::new("updated_at", "user_id").with_description("KOL task status"),
            );
        registry
    }

    /// Registry from configured tables, or the built-in one when none are
    /// configured.
    pub fn from_config(tables: &BTreeMap<String, TableConfig>) -> Self {
        if tables.is_empty() {
            return Self::builtin();
        }
        Self {
            tables: tables.clone(),
        }
    }

    pub fn register(&mut self, name: &str, table: TableConfig) -> &mut Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    /// Look up a table; a miss is `UnknownTable`.
    pub fn get(&self, name: &str) -> Result<&TableConfig> {
        self.tables
            .get(name)
            .ok_or_else(|| FetchError::UnknownTable(name.to_string()))
    }

    pub fn time_field(&self, name: &str) -> Result<&str> {
        self.get(name).map(|t| t.time_field.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &TableConfig)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
