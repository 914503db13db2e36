use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{ColumnType, Id, Row, Value};
use crate::query::ast::{Aggregate, Filter, Projection};
use crate::query::matcher::Predicate;

/// Scan limits applied by a table
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    pub full_scan_limit: usize,
    pub parallel_scan_threshold: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            full_scan_limit: 1000,
            parallel_scan_threshold: 4096,
        }
    }
}

impl From<&Config> for TableOptions {
    fn from(config: &Config) -> Self {
        TableOptions {
            full_scan_limit: config.full_scan_limit,
            parallel_scan_threshold: config.parallel_scan_threshold,
        }
    }
}

/// Cells of one row. `removed` is set by delete so that writers holding a
/// stale handle retry against the live index.
#[derive(Debug, Default)]
struct RowSlot {
    cells: BTreeMap<String, Value>,
    removed: bool,
}

type SlotRef = Arc<RwLock<RowSlot>>;

/// Concurrent (row key × column) → value matrix.
///
/// The ordered index is locked only to snapshot the key set or to insert and
/// remove keys; cell access goes through the per-row lock. A scan therefore
/// sees the key set as of its start while values may keep changing beneath
/// it. A single `save` is atomic per row; there are no multi-row transactions.
pub struct RowStoreTable {
    name: String,
    columns: Vec<ColumnType>,
    primary_keys: Vec<String>,
    rows: RwLock<BTreeMap<Id, SlotRef>>,
    options: TableOptions,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<ColumnType>,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

impl RowStoreTable {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnType>, options: TableOptions) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::validation("table name must not be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(Error::validation(format!("table `{}`: empty column name", name)));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::validation(format!(
                    "table `{}`: duplicate column `{}`", name, column.name
                )));
            }
        }

        let primary_keys: Vec<String> = columns.iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if primary_keys.is_empty() {
            return Err(Error::validation(format!("table `{}` declares no primary key", name)));
        }

        Ok(RowStoreTable {
            name,
            columns,
            primary_keys,
            rows: RwLock::new(BTreeMap::new()),
            options,
            created_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnType] {
        &self.columns
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn describe(&self) -> TableSummary {
        TableSummary {
            name: self.name.clone(),
            columns: self.columns.clone(),
            row_count: self.len(),
            created_at: self.created_at,
        }
    }

    fn validate(&self, row: &Row) -> Result<()> {
        let id = row.id();
        if id.is_null() {
            return Err(Error::validation(format!("table `{}`: null row key", self.name)));
        }
        if !id.is_complete() {
            return Err(Error::validation(format!(
                "table `{}`: row key {} has a null part", self.name, id
            )));
        }
        if id.size() != self.primary_keys.len() {
            return Err(Error::validation(format!(
                "table `{}`: row key has {} parts, primary key has {} columns",
                self.name, id.size(), self.primary_keys.len()
            )));
        }
        for key in &self.primary_keys {
            match row.get(key) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(Error::validation(format!(
                        "table `{}`: primary-key column `{}` missing or null", self.name, key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Handle to the row's slot, creating it when absent
    fn slot_for(&self, id: &Id) -> SlotRef {
        if let Some(slot) = self.rows.read().get(id) {
            return slot.clone();
        }
        self.rows.write().entry(id.clone()).or_default().clone()
    }

    /// Write every cell of `row`, overwriting prior values per column.
    /// Rejected rows leave the table untouched.
    pub fn save(&self, row: Row) -> Result<Id> {
        self.validate(&row)?;
        let (id, cells) = row.into_parts();

        loop {
            let slot = self.slot_for(&id);
            let mut current = slot.write();
            if current.removed {
                // Deleted between lookup and lock; the index holds a fresh slot now
                continue;
            }
            for (column, value) in &cells {
                current.cells.insert(column.clone(), value.clone());
            }
            break;
        }

        debug!(table = %self.name, id = %id, "row saved");
        Ok(id)
    }

    /// Save each row in order. One result per input row; a failure never
    /// aborts the rest of the batch.
    pub fn save_batch(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Result<Id>> {
        rows.into_iter()
            .enumerate()
            .map(|(position, row)| {
                let result = self.save(row);
                if let Err(e) = &result {
                    warn!(table = %self.name, position, error = %e, "batch row rejected");
                }
                result
            })
            .collect()
    }

    pub fn get(&self, id: &Id) -> Option<Row> {
        let slot = self.rows.read().get(id).cloned()?;
        Self::materialize(id, &slot)
    }

    fn materialize(id: &Id, slot: &SlotRef) -> Option<Row> {
        let slot = slot.read();
        if slot.removed {
            return None;
        }
        Some(Row::from_cells(id.clone(), slot.cells.clone()))
    }

    /// Rows matching `filter` in ascending key order.
    ///
    /// An unconditioned filter is a full scan silently truncated to the
    /// configured limit; a conditioned filter is never capped.
    pub fn query(&self, filter: Option<&Filter>) -> Vec<Row> {
        match filter {
            Some(filter) if !filter.is_unconditioned() => self.matching(filter),
            _ => self.full_scan(self.options.full_scan_limit),
        }
    }

    fn full_scan(&self, limit: usize) -> Vec<Row> {
        let head: Vec<(Id, SlotRef)> = self.rows.read()
            .iter()
            .take(limit)
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        head.iter()
            .filter_map(|(id, slot)| Self::materialize(id, slot))
            .collect()
    }

    /// Uncapped matching pass shared by query, update, delete and aggregate
    fn matching(&self, filter: &Filter) -> Vec<Row> {
        let snapshot: Vec<(Id, SlotRef)> = self.rows.read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let test = |(id, slot): &(Id, SlotRef)| {
            Self::materialize(id, slot).filter(|row| filter.test(row))
        };

        if snapshot.len() >= self.options.parallel_scan_threshold {
            snapshot.par_iter().filter_map(test).collect()
        } else {
            snapshot.iter().filter_map(test).collect()
        }
    }

    fn matching_ids(&self, filter: Option<&Filter>) -> Vec<Id> {
        let rows = match filter {
            Some(filter) => self.matching(filter),
            None => self.matching(&Filter::new()),
        };
        rows.into_iter().map(|row| row.into_parts().0).collect()
    }

    /// Overwrite the `patch` columns of every matching row; other columns are
    /// untouched. Columns outside the declared schema are written as well.
    pub fn update(&self, filter: Option<&Filter>, patch: &BTreeMap<String, Value>) -> Vec<Id> {
        let mut updated = Vec::new();
        for id in self.matching_ids(filter) {
            let Some(slot) = self.rows.read().get(&id).cloned() else {
                continue;
            };
            let mut current = slot.write();
            if current.removed {
                continue;
            }
            for (column, value) in patch {
                current.cells.insert(column.clone(), value.clone());
            }
            updated.push(id);
        }

        debug!(table = %self.name, updated = updated.len(), "rows updated");
        updated
    }

    /// Remove every cell of each matching row
    pub fn delete(&self, filter: Option<&Filter>) -> Vec<Id> {
        let matched = self.matching_ids(filter);
        if matched.is_empty() {
            return matched;
        }

        let mut deleted = Vec::with_capacity(matched.len());
        let mut rows = self.rows.write();
        for id in matched {
            if let Some(slot) = rows.remove(&id) {
                let mut slot = slot.write();
                slot.removed = true;
                slot.cells.clear();
                deleted.push(id);
            }
        }
        drop(rows);

        debug!(table = %self.name, deleted = deleted.len(), "rows deleted");
        deleted
    }

    /// Evaluate the filter's projection over all matching rows (uncapped)
    pub fn aggregate(&self, filter: &Filter) -> Result<Value> {
        let Some(projection) = &filter.projection else {
            return Err(Error::validation("aggregate requires a projection"));
        };
        let rows = self.matching(filter);
        aggregate_rows(projection, &rows)
    }
}

fn aggregate_rows(projection: &Projection, rows: &[Row]) -> Result<Value> {
    if projection.aggregate == Aggregate::Count && projection.column == "*" {
        return Ok(Value::Int(rows.len() as i64));
    }

    let values: Vec<&Value> = rows.iter()
        .filter_map(|row| row.get(&projection.column))
        .filter(|v| !v.is_null())
        .collect();

    match projection.aggregate {
        Aggregate::Count => Ok(Value::Int(values.len() as i64)),
        Aggregate::Min => Ok(values.into_iter().min().cloned().unwrap_or(Value::Null)),
        Aggregate::Max => Ok(values.into_iter().max().cloned().unwrap_or(Value::Null)),
        Aggregate::Sum | Aggregate::Avg => {
            let numeric: Vec<&Value> = values.into_iter()
                .filter(|v| v.as_f64().is_some())
                .collect();
            if numeric.is_empty() {
                return Ok(Value::Null);
            }

            let sum = if numeric.iter().all(|v| matches!(v, Value::Int(_))) {
                let mut total: i64 = 0;
                for v in &numeric {
                    if let Value::Int(i) = v {
                        total = total.checked_add(*i).ok_or_else(|| {
                            Error::validation(format!("sum of `{}` overflows", projection.column))
                        })?;
                    }
                }
                Value::Int(total)
            } else {
                Value::Float(numeric.iter().filter_map(|v| v.as_f64()).sum())
            };

            if projection.aggregate == Aggregate::Sum {
                Ok(sum)
            } else {
                let total = sum.as_f64().unwrap_or(0.0);
                Ok(Value::Float(total / numeric.len() as f64))
            }
        }
    }
}

impl fmt::Display for RowStoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RowStoreTable {}", self.name)?;
        let header: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        writeln!(f, "{}", header.join("\t"))?;

        for row in self.full_scan(usize::MAX) {
            let line: Vec<String> = self.columns.iter()
                .map(|c| row.get(&c.name).map(|v| v.to_string()).unwrap_or_else(|| "null".to_string()))
                .collect();
            writeln!(f, "{}", line.join("\t"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::types::LogicalType;
    use crate::query::ast::Expression;

    fn table() -> RowStoreTable {
        RowStoreTable::new(
            "tickets",
            vec![
                ColumnType::key("id", LogicalType::Int),
                ColumnType::column("status", LogicalType::Str),
                ColumnType::column("points", LogicalType::Int),
            ],
            TableOptions::default(),
        ).unwrap()
    }

    fn ticket(id: i64, status: &str, points: i64) -> Row {
        Row::new(Id::from(id)).with("id", id).with("status", status).with("points", points)
    }

    #[test]
    fn rejects_tables_without_primary_key_or_with_duplicates() {
        let no_key = RowStoreTable::new("t", vec![ColumnType::column("a", LogicalType::Any)], TableOptions::default());
        assert_eq!(no_key.err().map(|e| e.kind), Some(ErrorKind::Validation));

        let dup = RowStoreTable::new(
            "t",
            vec![ColumnType::key("a", LogicalType::Any), ColumnType::column("a", LogicalType::Any)],
            TableOptions::default(),
        );
        assert_eq!(dup.err().map(|e| e.kind), Some(ErrorKind::Validation));
    }

    #[test]
    fn save_then_get() {
        let t = table();
        t.save(ticket(1, "open", 3)).unwrap();
        let row = t.get(&Id::from(1)).unwrap();
        assert_eq!(row.get("status"), Some(&Value::from("open")));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn deleted_row_cannot_be_updated_back_to_life() {
        let t = table();
        t.save(ticket(1, "open", 3)).unwrap();
        let filter = Filter::new().with(Expression::eq("id", 1));
        assert_eq!(t.delete(Some(&filter)), vec![Id::from(1)]);

        let patch = BTreeMap::from([("status".to_string(), Value::from("closed"))]);
        assert!(t.update(Some(&filter), &patch).is_empty());
        assert!(t.get(&Id::from(1)).is_none());
    }

    #[test]
    fn aggregates_over_matching_rows() {
        let t = table();
        t.save(ticket(1, "open", 3)).unwrap();
        t.save(ticket(2, "open", 5)).unwrap();
        t.save(ticket(3, "closed", 7)).unwrap();
        let open = Filter::new().with(Expression::eq("status", "open"));

        assert_eq!(t.aggregate(&open.clone().project(Aggregate::Count, "*")).unwrap(), Value::Int(2));
        assert_eq!(t.aggregate(&open.clone().project(Aggregate::Sum, "points")).unwrap(), Value::Int(8));
        assert_eq!(t.aggregate(&open.clone().project(Aggregate::Avg, "points")).unwrap(), Value::Float(4.0));
        assert_eq!(t.aggregate(&Filter::new().project(Aggregate::Max, "points")).unwrap(), Value::Int(7));
        assert_eq!(t.aggregate(&Filter::match_nothing().project(Aggregate::Min, "points")).unwrap(), Value::Null);
        assert!(t.aggregate(&open).is_err());
    }

    #[test]
    fn display_lists_declared_columns() {
        let t = table();
        t.save(Row::new(Id::from(1)).with("id", 1).with("status", "open")).unwrap();
        let rendered = t.to_string();
        assert!(rendered.starts_with("RowStoreTable tickets\nid\tstatus\tpoints\n"));
        assert!(rendered.contains("1\topen\tnull"));
    }

    #[test]
    fn parallel_matching_keeps_key_order() {
        let t = RowStoreTable::new(
            "wide",
            vec![ColumnType::key("id", LogicalType::Int), ColumnType::column("even", LogicalType::Bool)],
            TableOptions { full_scan_limit: 1000, parallel_scan_threshold: 16 },
        ).unwrap();
        for i in 0..200 {
            t.save(Row::new(Id::from(i)).with("id", i).with("even", i % 2 == 0)).unwrap();
        }
        let rows = t.query(Some(&Filter::new().with(Expression::eq("even", true))));
        let ids: Vec<Id> = rows.iter().map(|r| r.id().clone()).collect();
        let expected: Vec<Id> = (0..200i64).step_by(2).map(Id::from).collect();
        assert_eq!(ids, expected);
    }
}
