use crate::cell::{CellValue, datetime_to_excel_serial, is_midnight};
use crate::error::Result;
use crate::table::Table;
use rust_xlsxwriter::{Format, Workbook};

/// Formats a table can be downloaded in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DownloadFormat {
    #[default]
    Xlsx,
    Csv,
}

impl DownloadFormat {
    pub fn parse(raw: &str) -> Option<DownloadFormat> {
        match raw.trim().to_lowercase().as_str() {
            "xlsx" | "excel" => Some(DownloadFormat::Xlsx),
            "csv" => Some(DownloadFormat::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Xlsx => "xlsx",
            DownloadFormat::Csv => "csv",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DownloadFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            DownloadFormat::Csv => "text/csv",
        }
    }
}

/// Serialize a table in the requested format
pub fn export(table: &Table, format: DownloadFormat) -> Result<Vec<u8>> {
    match format {
        DownloadFormat::Xlsx => to_xlsx(table),
        DownloadFormat::Csv => Ok(to_csv(table)?.into_bytes()),
    }
}

/// Convert a table to CSV
///
/// The first line holds the column names; quoting follows RFC 4180 and is
/// handled by the `csv` writer.
///
/// # Examples
/// ```
/// use worklist::table::Table;
/// use worklist::cell::CellValue;
/// use worklist::downloader::to_csv;
///
/// let table = Table::from_rows(["id", "note"], vec![vec![CellValue::Int(1), CellValue::from("a,b")]]);
/// assert_eq!(to_csv(&table).unwrap(), "id,note\n1,\"a,b\"\n");
/// ```
pub fn to_csv(table: &Table) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Convert a table to an XLSX workbook with a single sheet
///
/// The header row is bold. Numbers, booleans and dates keep their cell
/// types; dates carry a short date number format so Excel shows them as
/// dates and a reload reads them back as dates.
pub fn to_xlsx(table: &Table) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format("mm/dd/yyyy");
    let datetime_format = Format::new().set_num_format("mm/dd/yyyy hh:mm:ss");

    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Sheet1")?;

    for (c, name) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, name, &header_format)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let c = c as u16;
            match cell {
                CellValue::Empty => {}
                CellValue::Int(i) => {
                    worksheet.write_number(r, c, *i as f64)?;
                }
                CellValue::Float(f) => {
                    worksheet.write_number(r, c, *f)?;
                }
                CellValue::Text(s) => {
                    worksheet.write_string(r, c, s)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(r, c, *b)?;
                }
                CellValue::Date(dt) => {
                    let format = if is_midnight(dt) {
                        &date_format
                    } else {
                        &datetime_format
                    };
                    worksheet.write_number_with_format(r, c, datetime_to_excel_serial(dt), format)?;
                }
            }
        }
    }

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_and_describe_themselves() {
        assert_eq!(DownloadFormat::parse("XLSX"), Some(DownloadFormat::Xlsx));
        assert_eq!(DownloadFormat::parse("csv"), Some(DownloadFormat::Csv));
        assert_eq!(DownloadFormat::parse("pdf"), None);
        assert_eq!(DownloadFormat::Csv.mime(), "text/csv");
        assert_eq!(DownloadFormat::Xlsx.extension(), "xlsx");
    }

    #[test]
    fn csv_writes_blank_for_empty_cells() {
        let table = Table::from_rows(
            ["a", "b"],
            vec![vec![CellValue::Empty, CellValue::Bool(true)]],
        );
        assert_eq!(to_csv(&table).unwrap(), "a,b\n,TRUE\n");
    }

    #[test]
    fn xlsx_output_is_a_zip_package() {
        let table = Table::from_rows(["id"], vec![vec![CellValue::Int(1)]]);
        let bytes = to_xlsx(&table).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }
}
