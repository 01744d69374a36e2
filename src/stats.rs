use crate::cell::CellValue;
use crate::table::Table;
use serde::Serialize;
use std::collections::HashMap;

/// Descriptive statistics for one numeric column
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two values
    pub std: Option<f64>,
    pub min: f64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub median: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub max: f64,
}

/// One distinct value of a column and how often it occurs
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Summaries for every numeric column, in column order
///
/// A column is numeric when it has at least one value and every non-missing
/// cell is an `Int` or a `Float`. Missing cells are skipped.
pub fn describe(table: &Table) -> Vec<ColumnSummary> {
    let mut summaries = Vec::new();

    for (index, name) in table.columns.iter().enumerate() {
        let mut values = Vec::with_capacity(table.height());
        let mut numeric = true;
        for cell in table.column(index) {
            if cell.is_missing() {
                continue;
            }
            match cell.as_f64() {
                Some(v) => values.push(v),
                None => {
                    numeric = false;
                    break;
                }
            }
        }

        if !numeric || values.is_empty() {
            continue;
        }

        if let Some(summary) = summarize(name, values) {
            summaries.push(summary);
        }
    }

    summaries
}

fn summarize(name: &str, mut values: Vec<f64>) -> Option<ColumnSummary> {
    values.sort_by(|a, b| a.total_cmp(b));
    let count = values.len();
    let first = *values.first()?;
    let last = *values.last()?;

    let mean = values.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        Some(variance.sqrt())
    } else {
        None
    };

    Some(ColumnSummary {
        column: name.to_string(),
        count,
        mean,
        std,
        min: first,
        q25: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        q75: quantile(&values, 0.75),
        max: last,
    })
}

/// Linear interpolation between closest ranks; `sorted` must not be empty
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Occurrences of each distinct value in a column, most frequent first.
///
/// Ties keep first-seen order. Missing cells are not counted.
pub fn value_counts(table: &Table, column: usize) -> Vec<ValueCount> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for cell in table.column(column) {
        if cell.is_missing() {
            continue;
        }
        let key = cell.key_text();
        let entry = counts.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            0
        });
        *entry += 1;
    }

    let mut result: Vec<ValueCount> = order
        .into_iter()
        .map(|value| {
            let count = counts.get(&value).copied().unwrap_or(0);
            ValueCount { value, count }
        })
        .collect();
    // stable sort keeps first-seen order among ties
    result.sort_by(|a, b| b.count.cmp(&a.count));
    result
}

/// Count of missing cells per column
pub fn missing_counts(table: &Table) -> Vec<(String, usize)> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let missing = table.column(i).filter(|c| CellValue::is_missing(c)).count();
            (name.clone(), missing)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Table {
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
    fn value_column_has_mean_twenty() {
        let summaries = describe(&scenario());
        assert_eq!(summaries.len(), 2);
        let value = &summaries[1];
        assert_eq!(value.column, "value");
        assert_eq!(value.count, 3);
        assert_eq!(value.mean, 20.0);
        assert_eq!(value.std, Some(10.0));
        assert_eq!(value.min, 10.0);
        assert_eq!(value.q25, 15.0);
        assert_eq!(value.median, 20.0);
        assert_eq!(value.q75, 25.0);
        assert_eq!(value.max, 30.0);
    }

    #[test]
    fn text_columns_are_not_described() {
        let table = Table::from_rows(
            ["name", "amount"],
            vec![
                vec![CellValue::from("a"), CellValue::Float(1.5)],
                vec![CellValue::from("b"), CellValue::Empty],
            ],
        );
        let summaries = describe(&table);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].column, "amount");
        assert_eq!(summaries[0].count, 1);
        assert_eq!(summaries[0].std, None);
    }

    #[test]
    fn header_only_table_has_no_statistics() {
        assert!(describe(&Table::new(vec!["id".into()])).is_empty());
    }

    #[test]
    fn counts_sorted_descending() {
        let table = Table::from_rows(
            ["CLASSIFICATION"],
            vec![
                vec![CellValue::from("NEW ENDO")],
                vec![CellValue::from("REENDO")],
                vec![CellValue::from("REENDO")],
                vec![CellValue::Empty],
            ],
        );
        let counts = value_counts(&table, 0);
        assert_eq!(
            counts,
            vec![
                ValueCount {
                    value: "REENDO".into(),
                    count: 2
                },
                ValueCount {
                    value: "NEW ENDO".into(),
                    count: 1
                },
            ]
        );
        assert_eq!(missing_counts(&table), vec![("CLASSIFICATION".to_string(), 1)]);
    }
}
