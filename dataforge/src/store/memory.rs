//! In-memory row store.
//!
//! Behaves like the PostgreSQL gateway for a single process: NULL cells are
//! absent map entries, claims pick the lowest pending key, and writes only
//! land on a NULL destination. Every claim is recorded so callers can
//! inspect processing order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{
    prompt_key, storage_error, ClaimedRow, ColumnInfo, RowKey, RowStore, StageCounts, StoreResult,
};
use crate::errors::{RowWriteError, StorageError};
use crate::pipeline::StageDescriptor;

type Row = HashMap<String, String>;

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: BTreeMap<RowKey, Row>,
}

impl Table {
    fn is_pending(row: &Row, stage: &StageDescriptor) -> bool {
        Self::is_eligible(row, stage) && !row.contains_key(stage.destination())
    }

    fn is_eligible(row: &Row, stage: &StageDescriptor) -> bool {
        stage.sources().iter().all(|s| row.contains_key(s))
    }
}

/// A claim observed by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvent {
    /// The processing table.
    pub table: String,
    /// The stage's destination column.
    pub stage: String,
    /// The claimed row.
    pub key: RowKey,
}

/// Row store backed by process memory.
#[derive(Debug)]
pub struct InMemoryRowStore {
    key_column: String,
    tables: Mutex<HashMap<String, Table>>,
    prompts: Mutex<HashMap<String, String>>,
    claims: Mutex<Vec<ClaimEvent>>,
}

impl Default for InMemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRowStore {
    /// Creates an empty store whose tables are keyed by `index`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key_column("index")
    }

    /// Creates an empty store with a custom key column name.
    #[must_use]
    pub fn with_key_column(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            tables: Mutex::new(HashMap::new()),
            prompts: Mutex::new(HashMap::new()),
            claims: Mutex::new(Vec::new()),
        }
    }

    /// Creates (or replaces) a table with the given non-key columns.
    pub fn add_table(&self, table: &str, columns: &[&str]) {
        let mut all = vec![self.key_column.clone()];
        all.extend(columns.iter().map(|c| (*c).to_string()));
        self.tables.lock().insert(
            table.to_string(),
            Table {
                columns: all,
                rows: BTreeMap::new(),
            },
        );
    }

    /// Inserts a row. `None` values are stored as NULL.
    ///
    /// Unknown tables are created on the fly with the row's columns.
    pub fn insert_row(&self, table: &str, key: RowKey, values: &[(&str, Option<&str>)]) {
        let mut tables = self.tables.lock();
        let entry = tables.entry(table.to_string()).or_insert_with(|| Table {
            columns: vec![self.key_column.clone()],
            rows: BTreeMap::new(),
        });

        let mut row = Row::new();
        for (column, value) in values {
            if !entry.columns.iter().any(|c| c == column) {
                entry.columns.push((*column).to_string());
            }
            if let Some(value) = value {
                row.insert((*column).to_string(), (*value).to_string());
            }
        }
        entry.rows.insert(key, row);
    }

    /// Removes a row.
    pub fn delete_row(&self, table: &str, key: RowKey) -> bool {
        self.tables
            .lock()
            .get_mut(table)
            .is_some_and(|t| t.rows.remove(&key).is_some())
    }

    /// Reads one cell. Returns `None` for NULL or missing rows.
    #[must_use]
    pub fn get_value(&self, table: &str, key: RowKey, column: &str) -> Option<String> {
        self.tables
            .lock()
            .get(table)
            .and_then(|t| t.rows.get(&key))
            .and_then(|r| r.get(column).cloned())
    }

    /// Stores a system prompt for `(table, stage)`.
    pub fn set_prompt(&self, table: &str, stage: &str, prompt: impl Into<String>) {
        self.prompts
            .lock()
            .insert(prompt_key(table, stage), prompt.into());
    }

    /// All claims made so far, in order.
    #[must_use]
    pub fn claim_log(&self) -> Vec<ClaimEvent> {
        self.claims.lock().clone()
    }

    fn missing_table(operation: &str, table: &str) -> crate::errors::DataforgeError {
        storage_error(
            operation,
            StorageError::schema(operation, format!("relation \"{table}\" does not exist")),
        )
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().contains_key(table))
    }

    async fn table_columns(&self, table: &str) -> StoreResult<Vec<ColumnInfo>> {
        let tables = self.tables.lock();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.columns
            .iter()
            .map(|name| {
                if *name == self.key_column {
                    ColumnInfo {
                        name: name.clone(),
                        data_type: "bigint".to_string(),
                        nullable: false,
                    }
                } else {
                    ColumnInfo::text(name.clone())
                }
            })
            .collect())
    }

    async fn ensure_column(&self, table: &str, column: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let Some(t) = tables.get_mut(table) else {
            return Err(Self::missing_table("ensure_column", table));
        };
        if t.columns.iter().any(|c| c == column) {
            return Ok(false);
        }
        t.columns.push(column.to_string());
        tracing::info!(table, column, "Created destination column");
        Ok(true)
    }

    async fn claim_next_unprocessed(
        &self,
        table: &str,
        stage: &StageDescriptor,
        exclude: &[RowKey],
    ) -> StoreResult<Option<ClaimedRow>> {
        let claimed = {
            let tables = self.tables.lock();
            let Some(t) = tables.get(table) else {
                return Err(Self::missing_table("claim_next_unprocessed", table));
            };
            t.rows
                .iter()
                .filter(|(key, _)| !exclude.contains(*key))
                .find(|(_, row)| Table::is_pending(row, stage))
                .map(|(key, row)| ClaimedRow {
                    key: *key,
                    sources: stage
                        .sources()
                        .iter()
                        .map(|s| row.get(s).cloned().unwrap_or_default())
                        .collect(),
                })
        };

        if let Some(ref row) = claimed {
            self.claims.lock().push(ClaimEvent {
                table: table.to_string(),
                stage: stage.destination().to_string(),
                key: row.key,
            });
        }
        Ok(claimed)
    }

    async fn write_result(
        &self,
        table: &str,
        key: RowKey,
        destination: &str,
        value: &str,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let Some(t) = tables.get_mut(table) else {
            return Err(Self::missing_table("write_result", table));
        };
        match t.rows.get_mut(&key) {
            Some(row) if !row.contains_key(destination) => {
                row.insert(destination.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(RowWriteError::new(table, key, destination).into()),
        }
    }

    async fn get_system_prompt(&self, table: &str, stage: &str) -> StoreResult<Option<String>> {
        Ok(self.prompts.lock().get(&prompt_key(table, stage)).cloned())
    }

    async fn stage_counts(&self, table: &str, stage: &StageDescriptor) -> StoreResult<StageCounts> {
        let tables = self.tables.lock();
        let Some(t) = tables.get(table) else {
            return Err(Self::missing_table("stage_counts", table));
        };
        let mut counts = StageCounts::default();
        for row in t.rows.values() {
            if Table::is_eligible(row, stage) {
                counts.eligible += 1;
                if row.contains_key(stage.destination()) {
                    counts.completed += 1;
                }
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DataforgeError;
    use tokio_test::{assert_err, assert_ok, block_on};

    fn stage(spec: &str) -> StageDescriptor {
        spec.parse().unwrap()
    }

    fn seeded() -> InMemoryRowStore {
        let store = InMemoryRowStore::new();
        store.add_table("docs", &["chunk", "summary"]);
        store.insert_row("docs", 1, &[("chunk", Some("one")), ("summary", None)]);
        store.insert_row("docs", 2, &[("chunk", Some("two")), ("summary", Some("done"))]);
        store.insert_row("docs", 3, &[("chunk", None), ("summary", None)]);
        store.insert_row("docs", 4, &[("chunk", Some("four")), ("summary", None)]);
        store
    }

    #[test]
    fn test_claim_skips_filled_and_ineligible_rows() {
        let store = seeded();
        let s = stage("chunk:summary");

        let first = block_on(store.claim_next_unprocessed("docs", &s, &[])).unwrap();
        assert_eq!(first.map(|r| r.key), Some(1));

        let next = block_on(store.claim_next_unprocessed("docs", &s, &[1])).unwrap();
        assert_eq!(
            next,
            Some(ClaimedRow {
                key: 4,
                sources: vec!["four".into()]
            })
        );

        let none = block_on(store.claim_next_unprocessed("docs", &s, &[1, 4])).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_write_result_only_fills_null() {
        let store = seeded();
        assert_ok!(block_on(store.write_result("docs", 1, "summary", "ok")));
        assert_eq!(store.get_value("docs", 1, "summary").as_deref(), Some("ok"));

        let err = assert_err!(block_on(store.write_result("docs", 1, "summary", "again")));
        assert!(matches!(err, DataforgeError::RowWrite(_)));
        assert_eq!(store.get_value("docs", 1, "summary").as_deref(), Some("ok"));
    }

    #[test]
    fn test_write_result_missing_row() {
        let store = seeded();
        assert!(store.delete_row("docs", 4));
        let err = assert_err!(block_on(store.write_result("docs", 4, "summary", "x")));
        assert!(matches!(err, DataforgeError::RowWrite(_)));
    }

    #[test]
    fn test_ensure_column_is_idempotent() {
        let store = seeded();
        assert!(block_on(store.ensure_column("docs", "analysis")).unwrap());
        assert!(!block_on(store.ensure_column("docs", "analysis")).unwrap());
        assert!(block_on(store.column_exists("docs", "analysis")).unwrap());
    }

    #[test]
    fn test_stage_counts() {
        let store = seeded();
        let counts = block_on(store.stage_counts("docs", &stage("chunk:summary"))).unwrap();
        assert_eq!(
            counts,
            StageCounts {
                eligible: 3,
                completed: 1
            }
        );
    }

    #[test]
    fn test_prompts_are_keyed_by_table_and_stage() {
        let store = seeded();
        store.set_prompt("docs", "summary", "Summarize.");
        assert_eq!(
            block_on(store.get_system_prompt("docs", "summary")).unwrap().as_deref(),
            Some("Summarize.")
        );
        assert!(block_on(store.get_system_prompt("other", "summary"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_table_is_schema_error() {
        let store = InMemoryRowStore::new();
        assert!(!block_on(store.table_exists("nope")).unwrap());
        let err = assert_err!(block_on(store.claim_next_unprocessed(
            "nope",
            &stage("a:b"),
            &[]
        )));
        assert!(err.is_fatal());
    }
}
