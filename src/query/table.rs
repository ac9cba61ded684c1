//! Flattening of buffered results into rows and columns.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::transform::Snapshot;

/// Label of the leftmost column.
pub const TIME_COLUMN: &str = "time";

/// Tabular view of a rolling buffer: one row per result, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    /// `"time"` followed by field names in first-seen order
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a Snapshot> + Clone) -> Self {
        let mut columns = vec![TIME_COLUMN.to_string()];
        for snapshot in snapshots.clone() {
            for field in snapshot.values.keys() {
                if !columns[1..].contains(field) {
                    columns.push(field.clone());
                }
            }
        }

        let rows = snapshots
            .into_iter()
            .map(|snapshot| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(Value::from(snapshot.ts));
                row.extend(
                    columns[1..]
                        .iter()
                        .map(|c| snapshot.values.get(c).cloned().unwrap_or(Value::Null)),
                );
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row)?.get(col)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Host collaborator that writes a table into an output region cell by cell.
pub trait TableWriter {
    fn write(&mut self, region: &str, table: &Table) -> Result<()>;
}

impl<F> TableWriter for F
where
    F: FnMut(&str, &Table) -> Result<()>,
{
    fn write(&mut self, region: &str, table: &Table) -> Result<()> {
        self(region, table)
    }
}
