use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};
use worklist::cell::CellValue;
use worklist::downloader::{to_csv, to_xlsx};
use worklist::error::SheetError;
use worklist::loader::{LoadOptions, SheetSelector, load_table, sheet_names};
use worklist::preview::Preview;
use worklist::processing::{PassThrough, Processor};
use worklist::stats::describe;
use worklist::table::Table;

/// The 3x2 `id`/`value` workbook
fn scenario_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "id").unwrap();
    sheet.write_string(0, 1, "value").unwrap();
    for (r, (id, value)) in [(1.0, 10.0), (2.0, 20.0), (3.0, 30.0)].iter().enumerate() {
        sheet.write_number(r as u32 + 1, 0, *id).unwrap();
        sheet.write_number(r as u32 + 1, 1, *value).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

#[test]
fn scenario_preview_statistics_and_download() {
    let table = load_table(&scenario_workbook(), "data.xlsx", &LoadOptions::default()).unwrap();
    assert_eq!(table.columns, vec!["id", "value"]);
    assert_eq!(table.shape(), (3, 2));
    assert_eq!(table.rows[2], vec![CellValue::Int(3), CellValue::Int(30)]);

    let preview = Preview::of("data.xlsx", &table, 20);
    assert_eq!(preview.summary, "3 rows, 2 columns");
    let value = describe(&table).into_iter().find(|s| s.column == "value").unwrap();
    assert_eq!(value.mean, 20.0);

    let processed = PassThrough.process(&table).unwrap();
    assert_eq!(processed, table);

    let downloaded = to_xlsx(&processed).unwrap();
    let reloaded = load_table(&downloaded, "result.xlsx", &LoadOptions::default()).unwrap();
    assert_eq!(reloaded, table);
}

#[test]
fn header_only_workbook_has_zero_rows() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "id").unwrap();
    sheet.write_string(0, 1, "value").unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let table = load_table(&bytes, "empty.xlsx", &LoadOptions::default()).unwrap();
    assert_eq!(table.shape(), (0, 2));
    assert!(describe(&table).is_empty());
    assert_eq!(Preview::of("empty.xlsx", &table, 20).summary, "0 rows, 2 columns");
}

#[test]
fn plain_text_named_xlsx_is_a_parse_error() {
    let result = load_table(b"id,value\n1,10\n", "renamed.xlsx", &LoadOptions::default());
    assert!(matches!(result, Err(SheetError::Parse(_))));
}

#[test]
fn sheet_selection_and_header_row() {
    let mut workbook = Workbook::new();
    {
        let first = workbook.add_worksheet();
        first.set_name("Summary").unwrap();
        first.write_string(0, 0, "nothing here").unwrap();
    }
    {
        let second = workbook.add_worksheet();
        second.set_name("M1 AUTO SPM").unwrap();
        second.write_string(0, 0, "Daily TAD report").unwrap();
        second.write_string(3, 0, "LAN").unwrap();
        second.write_string(3, 1, "BALANCE").unwrap();
        second.write_string(4, 0, "00123").unwrap();
        second.write_number(4, 1, 1500.5).unwrap();
    }
    let bytes = workbook.save_to_buffer().unwrap();

    assert_eq!(sheet_names(&bytes, "tad.xlsx", None).unwrap(), vec!["Summary", "M1 AUTO SPM"]);

    let options = LoadOptions {
        sheet: SheetSelector::Name("M1 AUTO SPM".into()),
        header_row: 3,
        ..Default::default()
    };
    let table = load_table(&bytes, "tad.xlsx", &options).unwrap();
    assert_eq!(table.columns, vec!["LAN", "BALANCE"]);
    assert_eq!(
        table.rows,
        vec![vec![CellValue::from("00123"), CellValue::Float(1500.5)]]
    );

    let by_index = LoadOptions {
        sheet: SheetSelector::Index(1),
        header_row: 3,
        ..Default::default()
    };
    assert_eq!(load_table(&bytes, "tad.xlsx", &by_index).unwrap(), table);

    let missing = LoadOptions {
        sheet: SheetSelector::Name("Other".into()),
        ..Default::default()
    };
    assert!(matches!(
        load_table(&bytes, "tad.xlsx", &missing),
        Err(SheetError::SheetNotFound(_))
    ));
}

#[test]
fn header_row_is_relative_to_the_sheet() {
    // Nothing above the header, so the used range starts at row 3
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(3, 0, "LAN").unwrap();
    sheet.write_string(4, 0, "001").unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let options = LoadOptions {
        header_row: 3,
        ..Default::default()
    };
    let table = load_table(&bytes, "a4.xlsx", &options).unwrap();
    assert_eq!(table.columns, vec!["LAN"]);
    assert_eq!(table.height(), 1);
}

#[test]
fn dates_survive_a_download() {
    let referred = NaiveDate::from_ymd_opt(2025, 10, 16)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let table = Table::from_rows(
        ["LAN", "DATE REFERRED", "ACTIVE"],
        vec![vec![
            CellValue::from("001"),
            CellValue::Date(referred),
            CellValue::Bool(true),
        ]],
    );

    let reloaded = load_table(&to_xlsx(&table).unwrap(), "out.xlsx", &LoadOptions::default()).unwrap();
    assert_eq!(reloaded, table);
}

#[test]
fn workbook_dates_read_as_dates() {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("m/d/yyyy");
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "DATE REFERRED").unwrap();
    sheet.write_number_with_format(1, 0, 45946.0, &date_format).unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let table = load_table(&bytes, "dates.xlsx", &LoadOptions::default()).unwrap();
    assert_eq!(table.rows[0][0].to_string(), "10/16/2025");
}

#[test]
fn csv_round_trip_keeps_shape() {
    let table = load_table(b"id,value\n1,10\n2,20\n3,30\n", "data.csv", &LoadOptions::default()).unwrap();
    let csv = to_csv(&table).unwrap();
    let reloaded = load_table(csv.as_bytes(), "result.csv", &LoadOptions::default()).unwrap();
    assert_eq!(reloaded, table);
    assert_eq!(reloaded.shape(), (3, 2));
}
