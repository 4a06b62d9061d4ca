//! Database configuration.

use kvflow_storage::TableSchema;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the database.
    pub name: String,

    /// Version to open at. `None` opens the stored version.
    pub version: Option<u32>,

    /// Tables created during an upgrade if they do not exist yet.
    pub tables: Vec<TableSchema>,
}

impl Config {
    /// Creates a configuration for the named database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            tables: Vec::new(),
        }
    }

    /// Sets the version to open at.
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Declares a table.
    #[must_use]
    pub fn table(mut self, schema: TableSchema) -> Self {
        self.tables.push(schema);
        self
    }

    /// Declares a key/value table storing `{k, v}` records.
    #[must_use]
    pub fn keyed_table(self, name: impl Into<String>) -> Self {
        self.table(TableSchema::keyed(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::new("app");
        assert_eq!(config.name, "app");
        assert_eq!(config.version, None);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new("app")
            .version(3)
            .keyed_table("settings")
            .table(TableSchema::new("users", "id"));

        assert_eq!(config.version, Some(3));
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables[0].key_path(), "k");
        assert_eq!(config.tables[1].name(), "users");
    }
}
