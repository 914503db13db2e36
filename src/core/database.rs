use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::info;
use crate::core::error::{Error, Result};
use crate::core::types::ColumnType;
use crate::storage::table::{RowStoreTable, TableOptions};

/// Named set of tables
pub struct Database {
    name: String,
    tables: RwLock<HashMap<String, Arc<RowStoreTable>>>,
    options: TableOptions,
}

impl Database {
    pub fn new(name: impl Into<String>, options: TableOptions) -> Self {
        Database {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Existing table under `name`, or a new one built from `columns`.
    /// Re-declaring a name returns the existing table and ignores `columns`.
    pub fn get_or_create_table(&self, name: &str, columns: Vec<ColumnType>) -> Result<Arc<RowStoreTable>> {
        if let Some(table) = self.tables.read().get(name) {
            return Ok(table.clone());
        }

        let mut tables = self.tables.write();
        if let Some(table) = tables.get(name) {
            return Ok(table.clone());
        }
        let table = Arc::new(RowStoreTable::new(name, columns, self.options)?);
        tables.insert(name.to_string(), table.clone());
        info!(database = %self.name, table = name, "table created");
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Option<Arc<RowStoreTable>> {
        self.tables.read().get(name).cloned()
    }

    /// Fail-closed lookup
    pub fn security_get_table(&self, name: &str) -> Result<Arc<RowStoreTable>> {
        self.table(name).ok_or_else(|| {
            Error::not_found(format!("table `{}` in database `{}`", name, self.name))
        })
    }

    pub fn drop_table(&self, name: &str) -> Option<Arc<RowStoreTable>> {
        let dropped = self.tables.write().remove(name);
        if dropped.is_some() {
            info!(database = %self.name, table = name, "table dropped");
        }
        dropped
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}
