#![cfg(feature = "web")]
//! Bar charts of a column's value counts, rendered to PNG.

use crate::error::{Result, SheetError};
use crate::stats::{ValueCount, value_counts};
use crate::table::Table;
use log::warn;
use plotters::prelude::*;

/// Bars drawn at most; the least frequent values are left out
pub const MAX_BARS: usize = 20;

/// Size and caption of a rendered chart
#[derive(Clone, Debug)]
pub struct ChartOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        ChartOptions {
            title: String::new(),
            width: 800,
            height: 500,
        }
    }
}

/// Render the value counts of `column` as a PNG bar chart
///
/// Captions and axis labels need a system font. Without one the bars are
/// still drawn, unlabelled.
///
/// # Errors
/// * `MissingColumn` if the table has no such column
/// * `Chart` if the column has no values or drawing fails
pub fn value_count_chart(table: &Table, column: &str, options: &ChartOptions) -> Result<Vec<u8>> {
    let index = table.require_column(column, "table")?;
    let mut counts = value_counts(table, index);
    if counts.is_empty() {
        return Err(SheetError::Chart(format!("column '{}' has no values", column)));
    }
    counts.truncate(MAX_BARS);

    let title = if options.title.is_empty() {
        column.to_string()
    } else {
        options.title.clone()
    };
    render_bars(&counts, Some(&title), options.width, options.height).or_else(|err| {
        warn!("Drawing chart without labels: {}", err);
        render_bars(&counts, None, options.width, options.height)
    })
}

fn render_bars(
    counts: &[ValueCount],
    title: Option<&str>,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    // The bitmap backend picks its encoder from the file extension
    let file = tempfile::Builder::new().suffix(".png").tempfile()?;
    let path = file.path().to_path_buf();

    {
        let root = BitMapBackend::new(&path, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_error)?;

        let max_count = counts.iter().map(|c| c.count).max().unwrap_or(1);
        let labels: Vec<&str> = counts.iter().map(|c| c.value.as_str()).collect();

        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if let Some(title) = title {
            builder
                .caption(title, ("sans-serif", 26).into_font())
                .x_label_area_size(60)
                .y_label_area_size(50);
        }
        let mut chart = builder
            .build_cartesian_2d((0..counts.len()).into_segmented(), 0..max_count + 1)
            .map_err(chart_error)?;

        if title.is_some() {
            chart
                .configure_mesh()
                .disable_x_mesh()
                .x_labels(counts.len())
                .x_label_formatter(&|value| match value {
                    SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                        labels.get(*i).map(|s| s.to_string()).unwrap_or_default()
                    }
                    SegmentValue::Last => String::new(),
                })
                .y_desc("count")
                .draw()
                .map_err(chart_error)?;
        }

        chart
            .draw_series(
                Histogram::vertical(&chart)
                    .style(BLUE.filled())
                    .margin(4)
                    .data(counts.iter().enumerate().map(|(i, c)| (i, c.count))),
            )
            .map_err(chart_error)?;

        root.present().map_err(chart_error)?;
    }

    Ok(std::fs::read(&path)?)
}

fn chart_error<E: std::fmt::Display>(err: E) -> SheetError {
    SheetError::Chart(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;

    #[test]
    fn empty_column_cannot_be_charted() {
        let table = Table::from_rows(["STATUS"], vec![vec![CellValue::Empty]]);
        assert!(matches!(
            value_count_chart(&table, "STATUS", &ChartOptions::default()),
            Err(SheetError::Chart(_))
        ));
    }

    #[test]
    fn value_counts_render_as_png() {
        let rows: Vec<Vec<CellValue>> = ["PTP", "PTP", "RPC", "NIS", "PTP"]
            .iter()
            .map(|status| vec![CellValue::from(*status)])
            .collect();
        let table = Table::from_rows(["STATUS"], rows);
        let options = ChartOptions {
            title: "Dispositions".to_string(),
            width: 320,
            height: 200,
        };

        let png = value_count_chart(&table, "STATUS", &options).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        assert!(png.len() > 100);
    }

    #[test]
    fn unknown_column_is_reported() {
        let table = Table::from_rows(["STATUS"], vec![vec![CellValue::from("OK")]]);
        assert!(matches!(
            value_count_chart(&table, "AGENT", &ChartOptions::default()),
            Err(SheetError::MissingColumn { .. })
        ));
    }
}
