//! Tabular data sources for source lookups
//!
//! Laws read person/organization data from read-only tables (rows of named
//! columns). Tables are grouped per data source and addressed by table name;
//! when several sources carry the same table, the source with the highest
//! priority wins.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::{DataSourceRegistry, TableDataSource, Value};
//! use std::collections::BTreeMap;
//!
//! let mut row = BTreeMap::new();
//! row.insert("bsn".to_string(), Value::from("999993653"));
//! row.insert("income".to_string(), Value::Int(1_800_000));
//!
//! let source = TableDataSource::new("belastingdienst", 10).with_table("personen", vec![row]);
//!
//! let mut registry = DataSourceRegistry::new();
//! registry.add_source(Box::new(source));
//!
//! let rows = registry.table("personen").unwrap();
//! assert_eq!(rows.rows.len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, Result};
use crate::types::Value;

/// One table row: column name -> value.
pub type Row = BTreeMap<String, Value>;

/// Result of a successful table lookup.
#[derive(Debug, Clone)]
pub struct TableMatch<'a> {
    /// Rows of the table, in source order
    pub rows: &'a [Row],
    /// Name of the data source that provided the table
    pub source_name: &'a str,
    /// Type of the data source (e.g. "table", "database")
    pub source_type: &'a str,
}

/// Trait for data source implementations.
///
/// A data source owns a set of named tables. Each source has a priority
/// (higher = checked first).
pub trait DataSource: Send + Sync {
    /// Get the name of this data source.
    fn name(&self) -> &str;

    /// Get the priority of this data source (higher = checked first).
    fn priority(&self) -> i32;

    /// Get the type identifier for this data source.
    fn source_type(&self) -> &str;

    /// Check if this data source carries the given table.
    fn has_table(&self, table: &str) -> bool;

    /// Rows of a table, or None if the source does not carry it.
    fn rows(&self, table: &str) -> Option<&[Row]>;

    /// Names of all tables in this data source.
    fn tables(&self) -> Vec<&str>;
}

/// In-memory data source holding its tables as row lists.
#[derive(Debug, Clone, Default)]
pub struct TableDataSource {
    name: String,
    priority: i32,
    tables: BTreeMap<String, Vec<Row>>,
}

impl TableDataSource {
    /// Create an empty data source.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            tables: BTreeMap::new(),
        }
    }

    /// Add (or replace) a table.
    pub fn with_table(mut self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.insert_table(table, rows);
        self
    }

    /// Add (or replace) a table.
    pub fn insert_table(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(table.into(), rows);
    }

    /// Append a single row to a table, creating the table if needed.
    pub fn push_row(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Build a source from a JSON object of `table -> [row, ...]`.
    ///
    /// Rows must be objects; anything else is rejected.
    pub fn from_json(
        name: impl Into<String>,
        priority: i32,
        json: &serde_json::Value,
    ) -> Result<Self> {
        let name = name.into();
        let serde_json::Value::Object(tables) = json else {
            return Err(EngineError::LoadError(format!(
                "data source '{}' must be an object of tables",
                name
            )));
        };

        let mut source = Self::new(name, priority);
        for (table, rows) in tables {
            let serde_json::Value::Array(rows) = rows else {
                return Err(EngineError::LoadError(format!(
                    "table '{}' must be a list of rows",
                    table
                )));
            };
            let rows = rows
                .iter()
                .map(|row| match Value::from(row.clone()) {
                    Value::Object(map) => Ok(map),
                    other => Err(EngineError::LoadError(format!(
                        "row in table '{}' must be an object, got {}",
                        table,
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            source.insert_table(table.clone(), rows);
        }
        Ok(source)
    }

    /// Get the number of rows in a table (0 when absent).
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }
}

impl DataSource for TableDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn source_type(&self) -> &str {
        "table"
    }

    fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn rows(&self, table: &str) -> Option<&[Row]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    fn tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }
}

/// Registry for data sources with priority-based table lookup.
#[derive(Default)]
pub struct DataSourceRegistry {
    /// Data sources, sorted by priority (highest first)
    sources: Vec<Box<dyn DataSource>>,
}

impl DataSourceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Add a data source to the registry.
    ///
    /// Sources are kept sorted by priority (highest first); among equal
    /// priorities the earlier added source stays first.
    pub fn add_source(&mut self, source: Box<dyn DataSource>) {
        self.sources.push(source);
        self.sources.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// Remove a data source by name.
    ///
    /// # Returns
    /// `true` if a source was removed, `false` if not found.
    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.name() != name);
        self.sources.len() < before
    }

    /// Clear all data sources.
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Check if any data source carries the given table.
    pub fn has_table(&self, table: &str) -> bool {
        self.sources.iter().any(|s| s.has_table(table))
    }

    /// Find a table in the highest-priority source that carries it.
    pub fn table(&self, table: &str) -> Option<TableMatch<'_>> {
        self.sources.iter().find_map(|source| {
            source.rows(table).map(|rows| TableMatch {
                rows,
                source_name: source.name(),
                source_type: source.source_type(),
            })
        })
    }

    /// Get the number of registered data sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// List all registered source names, in priority order.
    pub fn list_sources(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// All table names across all sources.
    pub fn all_tables(&self) -> BTreeSet<String> {
        self.sources
            .iter()
            .flat_map(|s| s.tables())
            .map(str::to_string)
            .collect()
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("source_count", &self.sources.len())
            .field(
                "sources",
                &self
                    .sources
                    .iter()
                    .map(|s| format!("{}(priority={})", s.name(), s.priority()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
