use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::storage::table::{RowStoreTable, TableOptions};

/// Names a database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
}

/// Names a table inside a database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableInfo {
    pub database: String,
    pub table: String,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseInfo { name: name.into() }
    }
}

impl TableInfo {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        TableInfo {
            database: database.into(),
            table: table.into(),
        }
    }

    pub fn database_info(&self) -> DatabaseInfo {
        DatabaseInfo::new(self.database.clone())
    }
}

/// Directory of databases. Built once at startup and shared by `Arc`.
pub struct Registry {
    databases: RwLock<HashMap<String, Arc<Database>>>,
    options: TableOptions,
}

impl Registry {
    pub fn new(options: TableOptions) -> Self {
        Registry {
            databases: RwLock::new(HashMap::new()),
            options,
        }
    }

    pub fn get_or_create_database(&self, name: &str) -> Result<Arc<Database>> {
        if name.is_empty() {
            return Err(Error::validation("database name must not be empty"));
        }
        if let Some(db) = self.databases.read().get(name) {
            return Ok(db.clone());
        }

        let mut databases = self.databases.write();
        let db = databases
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(database = name, "database created");
                Arc::new(Database::new(name, self.options))
            })
            .clone();
        Ok(db)
    }

    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name).cloned()
    }

    /// Fail-closed lookup used before any table operation
    pub fn security_get_database(&self, info: &DatabaseInfo) -> Result<Arc<Database>> {
        self.database(&info.name)
            .ok_or_else(|| Error::not_found(format!("database `{}`", info.name)))
    }

    pub fn security_get_table(&self, info: &TableInfo) -> Result<Arc<RowStoreTable>> {
        self.security_get_database(&info.database_info())?
            .security_get_table(&info.table)
    }

    pub fn drop_database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.write().remove(name)
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(TableOptions::default())
    }
}
