use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;

/// Largest serial Excel accepts (9999-12-31)
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Text layouts tried when a text cell has to be read as a date
const DATE_FORMATS: [&str; 6] = [
    "%m/%d/%Y",
    "%Y-%m-%d",
    "%m-%d-%Y",
    "%d-%b-%Y",
    "%Y/%m/%d",
    "%B %d, %Y",
];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];

/// A single cell of a parsed table
///
/// The variant is decided once, when the file is read. Nothing downstream
/// coerces silently: statistics only look at `Int` and `Float`, exporters
/// write each variant with its own cell type.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDateTime),
}

impl CellValue {
    /// Build a numeric cell, folding whole numbers into `Int`.
    ///
    /// Excel stores every number as a double, so `3` comes back as `3.0`.
    /// Folding keeps an exported-then-reloaded table equal to the original.
    pub fn from_float(value: f64) -> Self {
        if value.is_finite()
            && value.fract() == 0.0
            && value >= i64::MIN as f64
            && value <= i64::MAX as f64
        {
            CellValue::Int(value as i64)
        } else {
            CellValue::Float(value)
        }
    }

    /// Detect the type of a raw text field (csv input)
    pub fn from_text(field: &str) -> Self {
        let trimmed = field.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if let Ok(n) = trimmed.parse::<i64>() {
            return CellValue::Int(n);
        }

        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return CellValue::from_float(f);
            }
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            _ => CellValue::Text(field.to_string()),
        }
    }

    /// Convert an Excel serial day number to a cell
    pub fn from_excel_serial(serial: f64) -> Self {
        match excel_serial_to_datetime(serial) {
            Some(dt) => CellValue::Date(dt),
            None => CellValue::from_float(serial),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, CellValue::Int(_) | CellValue::Float(_))
    }

    /// Empty cells and whitespace-only text both count as missing
    pub fn is_missing(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text used when this cell acts as a join or diff key
    pub fn key_text(&self) -> String {
        self.to_string().trim().to_string()
    }

    /// Equality the way a user reading the sheet would judge it
    pub fn loosely_eq(&self, other: &CellValue) -> bool {
        if self.is_missing() && other.is_missing() {
            return true;
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self.key_text() == other.key_text(),
        }
    }

    /// Interpret the cell as a date, if it plausibly is one.
    ///
    /// Numbers are taken as Excel serials, text is tried against the
    /// layouts seen in exported worklists.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Date(dt) => Some(*dt),
            CellValue::Int(i) => excel_serial_to_datetime(*i as f64),
            CellValue::Float(f) => excel_serial_to_datetime(*f),
            CellValue::Text(s) => parse_date_text(s.trim()),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
            CellValue::Date(dt) => {
                if is_midnight(dt) {
                    write!(f, "{}", dt.format("%m/%d/%Y"))
                } else {
                    write!(f, "{}", dt.format("%m/%d/%Y %H:%M:%S"))
                }
            }
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Empty => serializer.serialize_none(),
            CellValue::Int(i) => serializer.serialize_i64(*i),
            CellValue::Float(v) => serializer.serialize_f64(*v),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Date(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::from_float(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

pub fn is_midnight(dt: &NaiveDateTime) -> bool {
    dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0
}

fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Excel serial (1900 date system) to a timestamp
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_EXCEL_SERIAL {
        return None;
    }
    let days = serial.floor();
    let seconds = ((serial - days) * 86_400.0).round() as i64;
    excel_epoch()
        .checked_add_signed(Duration::days(days as i64))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Timestamp to Excel serial (1900 date system)
pub fn datetime_to_excel_serial(dt: &NaiveDateTime) -> f64 {
    let delta = *dt - excel_epoch();
    delta.num_seconds() as f64 / 86_400.0
}

fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    if text.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}
