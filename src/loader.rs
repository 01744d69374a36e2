use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::table::Table;
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto_from_rs};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;

/// Compound File Binary signature; an `.xlsx` starting with it is password protected
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Formats accepted on upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Workbook,
}

impl FileKind {
    /// Detect the format from a filename's extension
    pub fn from_filename(filename: &str) -> Result<FileKind> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(FileKind::Csv),
            Some("xlsx") | Some("xlsm") | Some("xls") | Some("xlsb") | Some("ods") => {
                Ok(FileKind::Workbook)
            }
            Some(ext) => Err(SheetError::UnsupportedFormat(format!(".{}", ext))),
            None => Err(SheetError::UnsupportedFormat(
                "file has no extension".to_string(),
            )),
        }
    }
}

/// Which worksheet of a workbook to read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

impl SheetSelector {
    /// Numbers select by position, anything else by name
    pub fn parse(raw: &str) -> SheetSelector {
        match raw.trim().parse::<usize>() {
            Ok(index) => SheetSelector::Index(index),
            Err(_) => SheetSelector::Name(raw.trim().to_string()),
        }
    }
}

/// How an upload is turned into a table
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub sheet: SheetSelector,
    /// 0-based row holding the column names; rows above it are skipped
    pub header_row: usize,
    /// Tried on password-protected workbooks
    pub password: Option<String>,
}

/// A parsed upload together with the sheet list of its workbook
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedFile {
    pub sheets: Vec<String>,
    pub table: Table,
}

/// Parse uploaded bytes into a table
///
/// The format comes from the filename. Empty uploads, unknown extensions,
/// encrypted workbooks and unreadable bytes are all reported as errors; the
/// caller decides how to show them.
///
/// # Arguments
/// * `bytes` - Raw upload
/// * `filename` - Original name, used for format detection and logging
/// * `options` - Sheet, header row and workbook password
///
/// # Examples
/// ```
/// use worklist::loader::{load_table, LoadOptions};
///
/// let table = load_table(b"id,value\n1,10\n", "data.csv", &LoadOptions::default()).unwrap();
/// assert_eq!(table.shape(), (1, 2));
/// ```
pub fn load_table(bytes: &[u8], filename: &str, options: &LoadOptions) -> Result<Table> {
    load_file(bytes, filename, options).map(|file| file.table)
}

/// Parse uploaded bytes, keeping the workbook's sheet names
///
/// The workbook is opened (and decrypted) once for both.
///
/// # Returns
/// * `Result<LoadedFile>` - The sheet names and the selected sheet as a table
pub fn load_file(bytes: &[u8], filename: &str, options: &LoadOptions) -> Result<LoadedFile> {
    if bytes.is_empty() {
        return Err(SheetError::EmptyUpload);
    }

    let file = match FileKind::from_filename(filename)? {
        FileKind::Csv => LoadedFile {
            sheets: vec!["Sheet1".to_string()],
            table: from_csv(bytes, options)?,
        },
        FileKind::Workbook => {
            let mut workbook = open_workbook(bytes, filename, options.password.as_deref())?;
            LoadedFile {
                sheets: workbook.sheet_names(),
                table: from_workbook(&mut workbook, options)?,
            }
        }
    };

    info!(
        "Parsed {}: {} rows x {} columns",
        filename,
        file.table.height(),
        file.table.width()
    );
    Ok(file)
}

/// Names of the worksheets in a workbook upload
pub fn sheet_names(bytes: &[u8], filename: &str, password: Option<&str>) -> Result<Vec<String>> {
    if bytes.is_empty() {
        return Err(SheetError::EmptyUpload);
    }
    match FileKind::from_filename(filename)? {
        FileKind::Csv => Ok(vec!["Sheet1".to_string()]),
        FileKind::Workbook => Ok(open_workbook(bytes, filename, password)?.sheet_names()),
    }
}

fn open_workbook(
    bytes: &[u8],
    filename: &str,
    password: Option<&str>,
) -> Result<Sheets<Cursor<Vec<u8>>>> {
    let lower = filename.to_lowercase();
    if bytes.starts_with(&OLE_MAGIC) && !lower.ends_with(".xls") {
        let password = password.ok_or_else(|| {
            SheetError::Encrypted("no workbook password is configured".to_string())
        })?;
        let plain = decrypt(bytes, password)?;
        info!("Decrypted {} with the configured password", filename);
        return Ok(open_workbook_auto_from_rs(Cursor::new(plain))?);
    }
    Ok(open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?)
}

/// Unwrap an Office-encrypted package into the plain workbook zip
fn decrypt(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    office_crypto::decrypt_from_bytes(bytes.to_vec(), password).map_err(|err| {
        debug!("Decryption failed: {:?}", err);
        SheetError::Encrypted("the configured password did not open it".to_string())
    })
}

fn from_workbook(workbook: &mut Sheets<Cursor<Vec<u8>>>, options: &LoadOptions) -> Result<Table> {
    let range = match &options.sheet {
        SheetSelector::Index(index) => workbook
            .worksheet_range_at(*index)
            .ok_or_else(|| SheetError::SheetNotFound(format!("#{}", index)))??,
        SheetSelector::Name(name) => {
            if !workbook.sheet_names().iter().any(|s| s == name) {
                return Err(SheetError::SheetNotFound(name.clone()));
            }
            workbook.worksheet_range(name)?
        }
    };

    Ok(range_to_table(&range, options.header_row))
}

fn range_to_table(range: &Range<Data>, header_row: usize) -> Table {
    // The range starts at the first used cell, not at A1
    let start_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
    let skip = header_row.saturating_sub(start_row);
    debug!(
        "Range starts at row {}, skipping {} rows before the header",
        start_row, skip
    );

    let mut rows = range.rows().skip(skip);
    let header: Vec<CellValue> = rows
        .next()
        .map(|row| row.iter().map(convert_cell).collect())
        .unwrap_or_default();
    let body: Vec<Vec<CellValue>> = rows
        .map(|row| row.iter().map(convert_cell).collect())
        .collect();

    build_table(header, body)
}

fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::from_float(*f),
        Data::String(s) => {
            if s.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(s.clone())
            }
        }
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => {
            if dt.is_duration() {
                CellValue::from_float(dt.as_f64())
            } else {
                CellValue::from_excel_serial(dt.as_f64())
            }
        }
        Data::DateTimeIso(s) => match CellValue::Text(s.clone()).to_datetime() {
            Some(dt) => CellValue::Date(dt),
            None => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

fn from_csv(bytes: &[u8], options: &LoadOptions) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records().skip(options.header_row);

    let header: Vec<CellValue> = match records.next() {
        Some(record) => record?
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect(),
        None => return Err(SheetError::Parse("no header row found".to_string())),
    };

    let mut body = Vec::new();
    for record in records {
        let record = record?;
        body.push(record.iter().map(CellValue::from_text).collect());
    }

    Ok(build_table(header, body))
}

fn build_table(header: Vec<CellValue>, body: Vec<Vec<CellValue>>) -> Table {
    let width = body
        .iter()
        .map(|row| row.len())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0);

    let mut table = Table::new(column_names(&header, width));
    for row in body {
        table.push_row(row);
    }
    table
}

/// Turn header cells into unique column names.
///
/// Blank headers become `Unnamed: {i}`, repeats get `.1`, `.2`, ... appended.
/// A suffixed name that is itself taken is bumped again.
fn column_names(header: &[CellValue], width: usize) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(width);

    for i in 0..width {
        let base = match header.get(i) {
            Some(cell) if !cell.is_missing() => cell.to_string().trim().to_string(),
            _ => format!("Unnamed: {}", i),
        };

        let mut name = base.clone();
        if used.contains(&name) {
            let count = counts.entry(base.clone()).or_insert(0);
            loop {
                *count += 1;
                name = format!("{}.{}", base, count);
                if !used.contains(&name) {
                    break;
                }
            }
        }
        used.insert(name.clone());
        names.push(name);
    }

    names
}
