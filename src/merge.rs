//! Combining several tables into one.

use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::table::Table;
use log::{info, warn};
use std::collections::{HashMap, HashSet};

/// Combines tables, in order, into one
pub trait Merger: Send + Sync {
    fn merge(&self, tables: &[&Table]) -> Result<Table>;
}

/// Keep every row of the first table and add the other tables' columns by key
///
/// Key cells match as trimmed text. A column whose name is already taken gets
/// the 1-based position of its table as suffix (`NAME_2`), bumped again
/// (`NAME_2_2`, `NAME_2_3`, ...) while that is taken too. Rows with no match
/// get empty cells; when a key repeats in a later table, its last row wins.
#[derive(Clone, Debug)]
pub struct LeftJoin {
    pub on: String,
}

impl LeftJoin {
    pub fn new(on: impl Into<String>) -> Self {
        LeftJoin { on: on.into() }
    }
}

impl Merger for LeftJoin {
    fn merge(&self, tables: &[&Table]) -> Result<Table> {
        let (first, rest) = tables.split_first().ok_or(SheetError::NothingToMerge)?;
        let base_key = first.require_column(&self.on, "table 1")?;
        let mut merged = (*first).clone();

        for (offset, other) in rest.iter().enumerate() {
            let position = offset + 2;
            let key = other.require_column(&self.on, &format!("table {}", position))?;

            let mut by_key: HashMap<String, &[CellValue]> = HashMap::new();
            for row in &other.rows {
                by_key.insert(row[key].key_text(), row.as_slice());
            }

            let contributed: Vec<usize> = (0..other.width()).filter(|&c| c != key).collect();
            let mut taken: HashSet<String> = merged.columns.iter().cloned().collect();
            let names: Vec<String> = contributed
                .iter()
                .map(|&c| {
                    let name = free_name(&other.columns[c], position, &taken);
                    taken.insert(name.clone());
                    name
                })
                .collect();

            let mut matched = 0;
            let mut columns: Vec<Vec<CellValue>> = vec![Vec::with_capacity(merged.height()); names.len()];
            for row in &merged.rows {
                let found = by_key.get(&row[base_key].key_text());
                if found.is_some() {
                    matched += 1;
                }
                for (slot, &c) in columns.iter_mut().zip(&contributed) {
                    slot.push(found.map(|r| r[c].clone()).unwrap_or_default());
                }
            }

            for (name, values) in names.into_iter().zip(columns) {
                merged.push_column(name, values);
            }

            info!(
                "Joined table {} on {}: {} of {} rows matched",
                position,
                self.on,
                matched,
                merged.height()
            );
        }

        Ok(merged)
    }
}

/// `name` if unused, otherwise `name_{position}` with a further counter until unused
fn free_name(name: &str, position: usize, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let base = format!("{}_{}", name, position);
    let mut candidate = base.clone();
    let mut bump = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, bump);
        bump += 1;
    }
    candidate
}

/// Stack tables vertically over the union of their columns
///
/// Columns appear in first-seen order; a table lacking a column contributes
/// empty cells. With a key, repeated keys keep their last row.
#[derive(Clone, Debug, Default)]
pub struct Concat {
    pub key: Option<String>,
}

impl Concat {
    pub fn new(key: Option<String>) -> Self {
        Concat { key }
    }
}

impl Merger for Concat {
    fn merge(&self, tables: &[&Table]) -> Result<Table> {
        if tables.is_empty() {
            return Err(SheetError::NothingToMerge);
        }

        let mut columns: Vec<String> = Vec::new();
        for table in tables {
            for name in &table.columns {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }

        let mut merged = Table::new(columns);
        for table in tables {
            let mapping: Vec<Option<usize>> = merged
                .columns
                .iter()
                .map(|name| table.column_index(name))
                .collect();
            for row in &table.rows {
                merged.push_row(
                    mapping
                        .iter()
                        .map(|source| source.map(|i| row[i].clone()).unwrap_or_default())
                        .collect(),
                );
            }
        }

        if let Some(key) = &self.key {
            let index = merged.require_column(key, "merged table")?;
            let dropped = merged.drop_duplicate_keys(index);
            if dropped > 0 {
                warn!("Dropped {} rows with a repeated {}", dropped, key);
            }
        }

        info!(
            "Concatenated {} tables into {} rows",
            tables.len(),
            merged.height()
        );
        Ok(merged)
    }
}

/// Merge method named on the command line or in a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeHow {
    LeftJoin,
    Concat,
}

impl MergeHow {
    pub fn parse(raw: &str) -> Option<MergeHow> {
        match raw.trim().to_lowercase().as_str() {
            "left-join" | "left" | "join" => Some(MergeHow::LeftJoin),
            "concat" | "stack" => Some(MergeHow::Concat),
            _ => None,
        }
    }

    /// Build the merger; a left join needs a key
    ///
    /// # Arguments
    /// * `on` - Join key for a left join, optional dedupe key for concat
    ///
    /// # Returns
    /// * `Result<Box<dyn Merger>>` - The merger, or `MissingColumn` for a
    ///   left join without a key
    ///
    /// # Examples
    /// ```
    /// use worklist::cell::CellValue;
    /// use worklist::merge::MergeHow;
    /// use worklist::table::Table;
    ///
    /// let monday = Table::from_rows(["LAN"], vec![vec![CellValue::from("1")]]);
    /// let tuesday = Table::from_rows(["LAN"], vec![vec![CellValue::from("2")]]);
    /// let merger = MergeHow::Concat.merger(Some("LAN".to_string())).unwrap();
    /// let both = merger.merge(&[&monday, &tuesday]).unwrap();
    /// assert_eq!(both.height(), 2);
    /// assert!(MergeHow::LeftJoin.merger(None).is_err());
    /// ```
    pub fn merger(self, on: Option<String>) -> Result<Box<dyn Merger>> {
        match self {
            MergeHow::LeftJoin => {
                let on = on.ok_or_else(|| SheetError::MissingColumn {
                    column: "(join key)".to_string(),
                    table: "request".to_string(),
                })?;
                Ok(Box::new(LeftJoin::new(on)))
            }
            MergeHow::Concat => Ok(Box::new(Concat::new(on))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endorsement() -> Table {
        Table::from_rows(
            ["LAN", "NAME"],
            vec![
                vec![CellValue::from("001"), CellValue::from("Ana")],
                vec![CellValue::from("002"), CellValue::from("Ben")],
            ],
        )
    }

    fn masterlist() -> Table {
        Table::from_rows(
            ["LAN", "NAME", "AGENT"],
            vec![
                vec![CellValue::from("002"), CellValue::from("Ben"), CellValue::from("X")],
                vec![CellValue::from(" 002"), CellValue::from("Ben"), CellValue::from("Y")],
            ],
        )
    }

    #[test]
    fn left_join_keeps_left_rows_and_suffixes_clashes() {
        let merged = LeftJoin::new("LAN")
            .merge(&[&endorsement(), &masterlist()])
            .unwrap();
        assert_eq!(merged.columns, vec!["LAN", "NAME", "NAME_2", "AGENT"]);
        assert_eq!(merged.height(), 2);
        assert_eq!(merged.rows[0][2], CellValue::Empty);
        assert_eq!(merged.rows[1][3], CellValue::from("Y"));
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let left = Table::from_rows(
            ["LAN", "NAME", "NAME_2"],
            vec![vec![CellValue::from("001"), CellValue::from("Ana"), CellValue::from("A.")]],
        );
        let merged = LeftJoin::new("LAN").merge(&[&left, &endorsement()]).unwrap();
        assert_eq!(merged.columns, vec!["LAN", "NAME", "NAME_2", "NAME_2_2"]);
        assert_eq!(merged.rows[0][2], CellValue::from("A."));
        assert_eq!(merged.rows[0][3], CellValue::from("Ana"));

        let unique: HashSet<&String> = merged.columns.iter().collect();
        assert_eq!(unique.len(), merged.width());
    }

    #[test]
    fn left_join_requires_key_everywhere() {
        let other = Table::from_rows(["ID"], vec![vec![CellValue::Int(1)]]);
        let result = LeftJoin::new("LAN").merge(&[&endorsement(), &other]);
        assert!(matches!(
            result,
            Err(SheetError::MissingColumn { table, .. }) if table == "table 2"
        ));
    }

    #[test]
    fn nothing_to_merge() {
        assert!(matches!(
            Concat::default().merge(&[]),
            Err(SheetError::NothingToMerge)
        ));
        assert!(matches!(
            LeftJoin::new("LAN").merge(&[]),
            Err(SheetError::NothingToMerge)
        ));
    }

    #[test]
    fn concat_unions_columns() {
        let merged = Concat::default()
            .merge(&[&endorsement(), &masterlist()])
            .unwrap();
        assert_eq!(merged.columns, vec!["LAN", "NAME", "AGENT"]);
        assert_eq!(merged.height(), 4);
        assert_eq!(merged.rows[0][2], CellValue::Empty);
    }

    #[test]
    fn concat_with_key_keeps_last() {
        let merged = Concat::new(Some("LAN".into()))
            .merge(&[&endorsement(), &masterlist()])
            .unwrap();
        assert_eq!(merged.height(), 2);
        assert_eq!(merged.rows[1][2], CellValue::from("Y"));
    }

    #[test]
    fn merge_methods_parse() {
        assert_eq!(MergeHow::parse("left-join"), Some(MergeHow::LeftJoin));
        assert_eq!(MergeHow::parse("CONCAT"), Some(MergeHow::Concat));
        assert_eq!(MergeHow::parse("outer"), None);
        assert!(MergeHow::LeftJoin.merger(None).is_err());
    }
}
