use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use std::collections::HashSet;

/// An in-memory table: named columns and rows of tagged cells
///
/// Every row holds exactly `width()` cells. Rows pushed with fewer cells are
/// padded with `CellValue::Empty`, longer ones are truncated.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Create a table with the given columns and no rows
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from string headers and rows of convertible values
    ///
    /// # Arguments
    /// * `columns` - Column names, in order
    /// * `rows` - Rows of anything convertible into [`CellValue`]; short rows are padded
    ///
    /// # Examples
    /// ```
    /// use worklist::table::Table;
    /// use worklist::cell::CellValue;
    ///
    /// let table = Table::from_rows(["id", "value"], vec![vec![CellValue::Int(1), CellValue::Int(10)]]);
    /// assert_eq!(table.shape(), (1, 2));
    /// ```
    pub fn from_rows<H, R, C>(columns: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator,
        R::Item: IntoIterator<Item = C>,
        C: Into<CellValue>,
    {
        let mut table = Table::new(columns.into_iter().map(Into::into).collect());
        for row in rows {
            table.push_row(row.into_iter().map(Into::into).collect());
        }
        table
    }

    /// Number of data rows (the header is not a row)
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row, padding or truncating it to `width()` cells
    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.width(), CellValue::Empty);
        self.rows.push(row);
    }

    /// Append a column filled from `values`, padding with empty cells
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<CellValue>) {
        self.columns.push(name.into());
        let mut values = values.into_iter();
        for row in self.rows.iter_mut() {
            row.push(values.next().unwrap_or_default());
        }
    }

    /// Replace the values of column `name`, appending the column if it is new
    ///
    /// # Arguments
    /// * `name` - Column to overwrite or create
    /// * `values` - One value per row; missing values become empty cells
    pub fn set_column(&mut self, name: &str, values: Vec<CellValue>) {
        match self.column_index(name) {
            Some(index) => {
                let mut values = values.into_iter();
                for row in self.rows.iter_mut() {
                    row[index] = values.next().unwrap_or_default();
                }
            }
            None => self.push_column(name, values),
        }
    }

    /// Set every cell of column `name` to `value`, appending the column if it is new
    pub fn fill_column(&mut self, name: &str, value: CellValue) {
        let values = vec![value; self.height()];
        self.set_column(name, values);
    }

    /// Rewrite each cell of a column in place
    pub fn map_column(&mut self, index: usize, mut f: impl FnMut(&CellValue) -> CellValue) {
        for row in self.rows.iter_mut() {
            row[index] = f(&row[index]);
        }
    }

    /// Rename column `from` to `to`
    ///
    /// # Returns
    /// * `bool` - false when `from` is absent or `to` is already taken
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if self.column_index(to).is_some() {
            return false;
        }
        match self.column_index(from) {
            Some(index) => {
                self.columns[index] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Append empty columns for each name the table lacks
    pub fn ensure_columns<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            if self.column_index(name.as_ref()).is_none() {
                self.push_column(name.as_ref(), Vec::new());
            }
        }
    }

    /// A table holding exactly `names`, in that order
    ///
    /// Columns this table lacks come out empty; columns not named are dropped.
    ///
    /// # Arguments
    /// * `names` - Output columns
    ///
    /// # Returns
    /// * `Table` - New table with the same number of rows
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Table {
        let sources: Vec<Option<usize>> = names
            .iter()
            .map(|name| self.column_index(name.as_ref()))
            .collect();
        let mut selected = Table::new(names.iter().map(|n| n.as_ref().to_string()).collect());
        for row in &self.rows {
            selected.push_row(
                sources
                    .iter()
                    .map(|source| source.map(|i| row[i].clone()).unwrap_or_default())
                    .collect(),
            );
        }
        selected
    }

    /// Rows for which `keep` returns true, with the same columns
    pub fn filter_rows(&self, mut keep: impl FnMut(&[CellValue]) -> bool) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    /// Position of the first column called `name`
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Like [`Table::column_index`] but reports a missing column as an error
    ///
    /// # Arguments
    /// * `name` - Column to look up
    /// * `table` - How the table is described in the error ("left table", "table 2")
    ///
    /// # Returns
    /// * `Result<usize>` - Column position or `MissingColumn`
    pub fn require_column(&self, name: &str, table: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| SheetError::MissingColumn {
                column: name.to_string(),
                table: table.to_string(),
            })
    }

    /// Cells of one column, top to bottom
    pub fn column(&self, index: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// Cell at `row`, `col`, if both are in range
    pub fn cell(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// First `n` rows with the same columns
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Strip surrounding whitespace from column names and upper-case them
    pub fn normalize_headers(&mut self) {
        for name in self.columns.iter_mut() {
            *name = name.trim().to_uppercase();
        }
    }

    /// Remove exact duplicate rows, keeping the first occurrence
    ///
    /// # Returns
    /// * `usize` - Number of rows removed
    pub fn drop_duplicate_rows(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows.retain(|row| {
            let fingerprint: Vec<String> = row.iter().map(fingerprint).collect();
            seen.insert(fingerprint)
        });
        before - self.rows.len()
    }

    /// Remove rows whose key repeats, keeping the last occurrence of each key
    ///
    /// Keys compare as trimmed text; the kept rows stay in their original order.
    ///
    /// # Returns
    /// * `usize` - Number of rows removed
    pub fn drop_duplicate_keys(&mut self, key: usize) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::new();
        let mut kept: Vec<Vec<CellValue>> = Vec::with_capacity(before);
        for row in self.rows.drain(..).rev() {
            if seen.insert(row[key].key_text()) {
                kept.push(row);
            }
        }
        kept.reverse();
        self.rows = kept;
        before - self.rows.len()
    }
}

// Tag the variant so Int(1) and Text("1") stay distinct
fn fingerprint(cell: &CellValue) -> String {
    let tag = match cell {
        CellValue::Empty => 'e',
        CellValue::Int(_) => 'i',
        CellValue::Float(_) => 'f',
        CellValue::Text(_) => 't',
        CellValue::Bool(_) => 'b',
        CellValue::Date(_) => 'd',
    };
    format!("{}{}", tag, cell)
}

/// Spreadsheet-style column letter for a 1-based column number (1 -> A, 27 -> AA)
pub fn column_to_letter(col: u16) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            ["id", "value"],
            vec![
                vec![CellValue::Int(1), CellValue::Int(10)],
                vec![CellValue::Int(2), CellValue::Int(20)],
                vec![CellValue::Int(3), CellValue::Int(30)],
            ],
        )
    }

    #[test]
    fn shape_excludes_header() {
        assert_eq!(sample().shape(), (3, 2));
        assert_eq!(Table::new(vec!["a".into()]).shape(), (0, 1));
    }

    #[test]
    fn rows_are_padded_and_truncated() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![CellValue::Int(1)]);
        table.push_row(vec![CellValue::Int(1), CellValue::Int(2), CellValue::Int(3)]);
        assert_eq!(table.rows[0], vec![CellValue::Int(1), CellValue::Empty]);
        assert_eq!(table.rows[1].len(), 2);
    }

    #[test]
    fn head_truncates() {
        assert_eq!(sample().head(2).height(), 2);
        assert_eq!(sample().head(10).height(), 3);
    }

    #[test]
    fn duplicate_rows_keep_first() {
        let mut table = Table::from_rows(
            ["k", "v"],
            vec![
                vec![CellValue::from("a"), CellValue::Int(1)],
                vec![CellValue::from("a"), CellValue::Int(1)],
                vec![CellValue::from("1"), CellValue::Int(1)],
                vec![CellValue::Int(1), CellValue::Int(1)],
            ],
        );
        assert_eq!(table.drop_duplicate_rows(), 1);
        assert_eq!(table.height(), 3);
    }

    #[test]
    fn duplicate_keys_keep_last() {
        let mut table = Table::from_rows(
            ["LAN", "v"],
            vec![
                vec![CellValue::from("A1"), CellValue::Int(1)],
                vec![CellValue::from("B2"), CellValue::Int(2)],
                vec![CellValue::from(" A1 "), CellValue::Int(3)],
            ],
        );
        assert_eq!(table.drop_duplicate_keys(0), 1);
        assert_eq!(table.rows[0][1], CellValue::Int(2));
        assert_eq!(table.rows[1][1], CellValue::Int(3));
    }

    #[test]
    fn headers_normalize() {
        let mut table = Table::new(vec!["  lan ".into(), "Name".into()]);
        table.normalize_headers();
        assert_eq!(table.columns, vec!["LAN", "NAME"]);
    }

    #[test]
    fn select_columns_reorders_and_fills() {
        let selected = sample().select_columns(&["value", "AGENT", "id"]);
        assert_eq!(selected.columns, vec!["value", "AGENT", "id"]);
        assert_eq!(
            selected.rows[0],
            vec![CellValue::Int(10), CellValue::Empty, CellValue::Int(1)]
        );
    }

    #[test]
    fn columns_are_set_renamed_and_filtered() {
        let mut table = sample();
        assert!(table.rename_column("id", "LAN"));
        assert!(!table.rename_column("value", "LAN"));
        assert!(!table.rename_column("missing", "other"));

        table.fill_column("ENDO DATE", CellValue::from("10/16/2025"));
        table.set_column("value", vec![CellValue::Int(0)]);
        assert_eq!(table.columns, vec!["LAN", "value", "ENDO DATE"]);
        assert_eq!(table.cell(0, 1), Some(&CellValue::Int(0)));
        assert_eq!(table.cell(2, 1), Some(&CellValue::Empty));
        assert_eq!(table.cell(2, 2), Some(&CellValue::from("10/16/2025")));
        assert_eq!(table.cell(3, 0), None);

        let kept = table.filter_rows(|row| row[0] != CellValue::Int(2));
        assert_eq!(kept.height(), 2);

        table.ensure_columns(&["LAN", "NAME"]);
        assert_eq!(table.width(), 4);
        table.map_column(0, |cell| CellValue::Text(cell.key_text()));
        assert_eq!(table.rows[0][0], CellValue::from("1"));
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_to_letter(1), "A");
        assert_eq!(column_to_letter(26), "Z");
        assert_eq!(column_to_letter(27), "AA");
        assert_eq!(column_to_letter(52), "AZ");
    }
}
