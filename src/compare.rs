//! Differences between two tables.

use crate::cell::CellValue;
use crate::error::Result;
use crate::table::Table;
use log::info;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One cell whose value differs between the two tables
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellChange {
    pub key: String,
    pub column: String,
    pub left: CellValue,
    pub right: CellValue,
}

/// Outcome of comparing a left (older) table with a right (newer) one
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Comparison {
    /// Key column used to pair rows; `None` means rows were paired by position
    pub key: Option<String>,
    /// Keys present only on the right
    pub added: Vec<String>,
    /// Keys present only on the left
    pub removed: Vec<String>,
    pub changed: Vec<CellChange>,
    pub unchanged: usize,
    pub columns_added: Vec<String>,
    pub columns_removed: Vec<String>,
}

impl Comparison {
    pub fn is_identical(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.columns_added.is_empty()
            && self.columns_removed.is_empty()
    }

    /// Flatten into a downloadable table: `CHANGE, KEY, COLUMN, LEFT, RIGHT`
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(
            ["CHANGE", "KEY", "COLUMN", "LEFT", "RIGHT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );

        for column in &self.columns_added {
            table.push_row(vec!["COLUMN ADDED".into(), CellValue::Empty, column.as_str().into()]);
        }
        for column in &self.columns_removed {
            table.push_row(vec!["COLUMN REMOVED".into(), CellValue::Empty, column.as_str().into()]);
        }
        for key in &self.added {
            table.push_row(vec!["ADDED".into(), key.as_str().into()]);
        }
        for key in &self.removed {
            table.push_row(vec!["REMOVED".into(), key.as_str().into()]);
        }
        for change in &self.changed {
            table.push_row(vec![
                "CHANGED".into(),
                change.key.as_str().into(),
                change.column.as_str().into(),
                change.left.clone(),
                change.right.clone(),
            ]);
        }

        table
    }
}

/// Compares two tables
pub trait Comparator: Send + Sync {
    /// Report how `right` differs from `left`
    ///
    /// # Arguments
    /// * `left` - The earlier table
    /// * `right` - The later table
    ///
    /// # Returns
    /// * `Result<Comparison>` - Added and removed keys plus changed cells, or
    ///   `MissingColumn` when the key column is absent from either table
    fn compare(&self, left: &Table, right: &Table) -> Result<Comparison>;
}

/// Pairs rows by a key column, or by position when no key is set
///
/// Key cells are compared as trimmed text, so `00123` and ` 00123 ` pair up
/// but `123` does not. When a key repeats within one table, its last row is
/// used. Cell values are compared loosely: `1` equals `1.0` and an empty cell
/// equals blank text.
#[derive(Clone, Debug, Default)]
pub struct KeyedComparator {
    pub key: Option<String>,
}

impl KeyedComparator {
    pub fn new(key: Option<String>) -> Self {
        KeyedComparator { key }
    }
}

impl Comparator for KeyedComparator {
    fn compare(&self, left: &Table, right: &Table) -> Result<Comparison> {
        let right_columns: HashSet<&str> = right.columns.iter().map(String::as_str).collect();
        let left_columns: HashSet<&str> = left.columns.iter().map(String::as_str).collect();

        let mut comparison = Comparison {
            key: self.key.clone(),
            columns_added: right
                .columns
                .iter()
                .filter(|c| !left_columns.contains(c.as_str()))
                .cloned()
                .collect(),
            columns_removed: left
                .columns
                .iter()
                .filter(|c| !right_columns.contains(c.as_str()))
                .cloned()
                .collect(),
            ..Default::default()
        };

        let pairs = match &self.key {
            Some(key) => keyed_rows(left, right, key, &mut comparison)?,
            None => positional_rows(left, right, &mut comparison),
        };

        // (left index, right index) for every column both tables carry
        let shared: Vec<(usize, usize, &str)> = left
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| Some(name.as_str()) != self.key.as_deref())
            .filter_map(|(li, name)| right.column_index(name).map(|ri| (li, ri, name.as_str())))
            .collect();

        for (key, left_row, right_row) in pairs {
            let before = comparison.changed.len();
            for &(li, ri, column) in &shared {
                let (l, r) = (&left_row[li], &right_row[ri]);
                if !l.loosely_eq(r) {
                    comparison.changed.push(CellChange {
                        key: key.clone(),
                        column: column.to_string(),
                        left: l.clone(),
                        right: r.clone(),
                    });
                }
            }
            if comparison.changed.len() == before {
                comparison.unchanged += 1;
            }
        }

        info!(
            "Compared tables: {} added, {} removed, {} changed cells",
            comparison.added.len(),
            comparison.removed.len(),
            comparison.changed.len()
        );
        Ok(comparison)
    }
}

type RowPair<'a> = (String, &'a [CellValue], &'a [CellValue]);

fn keyed_rows<'a>(
    left: &'a Table,
    right: &'a Table,
    key: &str,
    comparison: &mut Comparison,
) -> Result<Vec<RowPair<'a>>> {
    let left_key = left.require_column(key, "left table")?;
    let right_key = right.require_column(key, "right table")?;

    let left_index = last_row_per_key(left, left_key);
    let right_index = last_row_per_key(right, right_key);

    let mut pairs = Vec::new();
    for (key_text, left_row) in left_index.iter_ordered() {
        match right_index.get(key_text) {
            Some(right_row) => pairs.push((key_text.clone(), *left_row, *right_row)),
            None => comparison.removed.push(key_text.clone()),
        }
    }
    let left_keys: HashSet<&String> = left_index.iter_ordered().map(|(k, _)| k).collect();
    for (key_text, _) in right_index.iter_ordered() {
        if !left_keys.contains(key_text) {
            comparison.added.push(key_text.clone());
        }
    }

    Ok(pairs)
}

fn positional_rows<'a>(
    left: &'a Table,
    right: &'a Table,
    comparison: &mut Comparison,
) -> Vec<RowPair<'a>> {
    let common = left.height().min(right.height());
    let label = |i: usize| format!("row {}", i + 1);

    comparison.removed = (common..left.height()).map(label).collect();
    comparison.added = (common..right.height()).map(label).collect();

    (0..common)
        .map(|i| (label(i), left.rows[i].as_slice(), right.rows[i].as_slice()))
        .collect()
}

/// Rows indexed by key text in first-seen order; a repeated key keeps its last row
struct KeyIndex<'a> {
    order: Vec<String>,
    rows: HashMap<String, &'a [CellValue]>,
}

impl<'a> KeyIndex<'a> {
    fn get(&self, key: &str) -> Option<&&'a [CellValue]> {
        self.rows.get(key)
    }

    fn iter_ordered(&self) -> impl Iterator<Item = (&String, &&'a [CellValue])> + '_ {
        self.order
            .iter()
            .filter_map(move |k| self.rows.get(k).map(|row| (k, row)))
    }
}

fn last_row_per_key(table: &Table, key: usize) -> KeyIndex<'_> {
    let mut index = KeyIndex {
        order: Vec::new(),
        rows: HashMap::new(),
    };
    for row in &table.rows {
        let key_text = row[key].key_text();
        if index.rows.insert(key_text.clone(), row.as_slice()).is_none() {
            index.order.push(key_text);
        }
    }
    index
}
