//! Table formatting for the table registry using tabled

use tabled::{
    builder::Builder,
    settings::{Alignment, Color, Modify, Style, object::Columns, object::Rows, width::Width},
};

use crate::query::TableRegistry;

/// Maximum width for a single column (characters)
const DEFAULT_MAX_COLUMN_WIDTH: usize = 40;

const HEADERS: [&str; 5] = ["table", "description", "time field", "primary key", "order by"];

/// Table formatter for registry listings
pub struct TableFormatter {
    /// Maximum column width
    max_column_width: usize,

    /// Enable colored output
    use_colors: bool,
}

impl TableFormatter {
    /// Create a new table formatter
    ///
    /// # Arguments
    /// * `use_colors` - Enable colored header row
    pub fn new(use_colors: bool) -> Self {
        Self {
            max_column_width: DEFAULT_MAX_COLUMN_WIDTH,
            use_colors,
        }
    }

    /// Set maximum column width
    pub fn with_max_column_width(mut self, width: usize) -> Self {
        self.max_column_width = width;
        self
    }

    /// Render every registered table, in name order
    ///
    /// # Arguments
    /// * `registry` - Registry to list
    ///
    /// # Returns
    /// * `String` - Rendered table
    pub fn format_registry(&self, registry: &TableRegistry) -> String {
        if registry.is_empty() {
            return "(no tables configured)".to_string();
        }

        let mut builder = Builder::default();
        builder.push_record(HEADERS);

        for (name, table) in registry.list() {
            builder.push_record([
                name.to_string(),
                table.description.clone(),
                table.time_field.clone(),
                table.primary_key.clone(),
                table.ordering_key().join(", "),
            ]);
        }

        let mut table = builder.build();
        table.with(Style::modern());

        // Wrap long values instead of truncating them
        for i in 0..HEADERS.len() {
            table.with(Modify::new(Columns::new(i..=i)).with(Width::wrap(self.max_column_width)));
        }

        table.with(Modify::new(Rows::first()).with(Alignment::center()));

        if self.use_colors {
            table.modify(Rows::first(), Color::FG_CYAN | Color::BOLD);
        }

        table.to_string()
    }
}
