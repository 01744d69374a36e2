use crate::cell::CellValue;
use crate::stats::{ColumnSummary, describe, missing_counts};
use crate::table::Table;
use serde::Serialize;

/// Rows shown in a preview unless configured otherwise
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

/// What the page shows after an upload or a processing step
#[derive(Clone, Debug, Serialize)]
pub struct Preview {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub column_names: Vec<String>,
    pub head: Vec<Vec<CellValue>>,
    pub statistics: Vec<ColumnSummary>,
    /// Empty cells per column, only for columns that have any
    pub missing: Vec<(String, usize)>,
    pub summary: String,
}

impl Preview {
    pub fn of(name: &str, table: &Table, limit: usize) -> Preview {
        let (rows, columns) = table.shape();
        Preview {
            name: name.to_string(),
            rows,
            columns,
            column_names: table.columns.clone(),
            head: table.head(limit).rows,
            statistics: describe(table),
            missing: missing_counts(table)
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .collect(),
            summary: shape_line(rows, columns),
        }
    }
}

/// "3 rows, 2 columns"
pub fn shape_line(rows: usize, columns: usize) -> String {
    format!(
        "{} {}, {} {}",
        rows,
        if rows == 1 { "row" } else { "rows" },
        columns,
        if columns == 1 { "column" } else { "columns" }
    )
}
