//! Column header alignment.
//!
//! Worklists arrive from several systems, each with its own column names
//! ("ACCTNUM", "ACCOUNT NUMBER", "LAN", ...). Alignment maps them onto one
//! standard header list so the files can be stacked and uploaded.

use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::table::Table;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Standard headers in output order, with the input names each may come from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMap {
    pub standard_headers: Vec<String>,
    #[serde(default)]
    pub aliases: HashMap<String, Vec<String>>,
    /// Standard columns rewritten as `m/dd/yyyy`
    #[serde(default = "default_date_columns")]
    pub date_columns: Vec<String>,
}

fn default_date_columns() -> Vec<String> {
    vec!["DATE REFERRED".to_string()]
}

impl Default for AlignmentMap {
    fn default() -> Self {
        let entries: [(&str, &[&str]); 18] = [
            ("LAN", &["LAN", "ACCOUNT NUMBER", "ACCTNUM"]),
            ("CH CODE", &["LAN", "CH CODE"]),
            ("NAME", &["NAME", "DEBTOR NAME", "BORROWER NAME"]),
            ("CTL4", &["CTL4"]),
            ("PAST DUE", &["PAST DUE", "OVERDUE AMOUNT"]),
            ("PAYOFF AMOUNT", &["PAYOFF AMOUNT", "PAYOFF AMT"]),
            ("PRINCIPAL", &["PRINCIPAL", "PRINCIPAL AMOUNT"]),
            ("LPC", &["LPC", "LOAN PRINCIPAL CONTRACTED"]),
            ("ADA SHORTAGE", &["ADA SHORTAGE", "ADA SHORT"]),
            ("EMAIL", &["EMAIL", "EMAIL_ALS", "BORROWER EMAIL"]),
            ("MOBILE_ALS", &["MOBILE_ALS", "MOBILE NO ALS", "MOBILE NUMBER"]),
            ("MOBILE_ALFES", &["MOBILE_ALFES", "MOBILE NO ALFES"]),
            ("PRIMARY_NO_ALS", &["PRIMARY_NO_ALS", "PRIMARY NO"]),
            ("BUS_NO_ALS", &["BUS_NO_ALS", "BUSINESS NO"]),
            (
                "LANDLINE_NO_ALS",
                &["LANDLINE_NO_ALS", "LANDLINE NO ALFES", "LANDLINE"],
            ),
            ("DATE REFERRED", &["DATE REFERRED", "REFERRAL DATE"]),
            ("UNIT", &["UNIT", "SHORT DESCRIPTION", "UNIT DESCRIPTION"]),
            ("DPD", &["DPD", "DAYS PAST DUE"]),
        ];

        let standard_headers = entries.iter().map(|(name, _)| name.to_string()).collect();

        let aliases = entries
            .iter()
            .map(|(name, names)| {
                (
                    name.to_string(),
                    names.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect();

        AlignmentMap {
            standard_headers,
            aliases,
            date_columns: default_date_columns(),
        }
    }
}

/// Which input column feeds a standard column
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FoundMapping {
    pub standard: String,
    pub input: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub found: Vec<FoundMapping>,
    pub missing: Vec<String>,
    pub input_columns: Vec<String>,
    pub standard_columns: Vec<String>,
}

impl AlignmentMap {
    /// Read a map from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<AlignmentMap> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let map: AlignmentMap = serde_json::from_str(&contents)
            .map_err(|e| SheetError::Config(format!("{}: {}", path.display(), e)))?;
        if map.standard_headers.is_empty() {
            return Err(SheetError::Config(format!(
                "{}: standard_headers is empty",
                path.display()
            )));
        }
        Ok(map)
    }

    /// Candidate input names for a standard column, normalized.
    ///
    /// A standard column with no alias entry matches itself.
    fn candidates(&self, standard: &str) -> Vec<String> {
        match self.aliases.get(standard) {
            Some(names) => names.iter().map(|n| normalize(n)).collect(),
            None => vec![normalize(standard)],
        }
    }

    /// Index of the first input column matching any candidate, in input order
    fn find_input(&self, normalized_inputs: &[String], standard: &str) -> Option<usize> {
        let candidates = self.candidates(standard);
        normalized_inputs
            .iter()
            .position(|input| candidates.iter().any(|c| c == input))
    }

    /// Build a table with exactly the standard headers, in order
    pub fn align(&self, table: &Table) -> Table {
        let inputs: Vec<String> = table.columns.iter().map(|c| normalize(c)).collect();
        let sources: Vec<Option<usize>> = self
            .standard_headers
            .iter()
            .map(|standard| self.find_input(&inputs, standard))
            .collect();

        let mut aligned = Table::new(self.standard_headers.clone());
        for row in &table.rows {
            let cells = self
                .standard_headers
                .iter()
                .zip(&sources)
                .map(|(standard, source)| {
                    let cell = source.map(|i| row[i].clone()).unwrap_or_default();
                    if self.date_columns.iter().any(|d| d == standard) {
                        format_short_date(&cell)
                    } else {
                        cell
                    }
                })
                .collect();
            aligned.push_row(cells);
        }
        aligned
    }

    pub fn report(&self, table: &Table) -> AlignmentReport {
        let inputs: Vec<String> = table.columns.iter().map(|c| normalize(c)).collect();
        let mut found = Vec::new();
        let mut missing = Vec::new();

        for standard in &self.standard_headers {
            match self.find_input(&inputs, standard) {
                Some(i) => found.push(FoundMapping {
                    standard: standard.clone(),
                    input: inputs[i].clone(),
                }),
                None => missing.push(standard.clone()),
            }
        }

        AlignmentReport {
            found,
            missing,
            input_columns: inputs,
            standard_columns: self.standard_headers.clone(),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}

/// `m/dd/yyyy` text (no leading zero on the month); anything unreadable becomes empty
pub fn format_short_date(cell: &CellValue) -> CellValue {
    match cell.to_datetime() {
        Some(dt) => CellValue::Text(dt.format("%-m/%d/%Y").to_string()),
        None => CellValue::Empty,
    }
}

lazy_static! {
    static ref FOR_UPLOAD_REGEX: Regex = Regex::new(r"(?i)FOR\s*UPLOAD").unwrap();
    static ref FOR_UPDATE_REGEX: Regex = Regex::new(r"(?i)FOR\s*UPDATE").unwrap();
}

/// Kind of worklist, judged from the uploaded filename
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OutputKind {
    ForUpload,
    ForUpdate,
    Unknown,
}

impl OutputKind {
    pub fn detect(filename: &str) -> OutputKind {
        if FOR_UPLOAD_REGEX.is_match(filename) {
            OutputKind::ForUpload
        } else if FOR_UPDATE_REGEX.is_match(filename) {
            OutputKind::ForUpdate
        } else {
            OutputKind::Unknown
        }
    }
}

/// Download name (without extension) for an aligned file
pub fn output_basename(input_filename: &str, prefix: &str, date: NaiveDate) -> String {
    let stamp = date.format("%m%d%Y");
    match OutputKind::detect(input_filename) {
        OutputKind::ForUpload => format!("{}_FORUPLOADS_{}", prefix, stamp),
        OutputKind::ForUpdate => format!("{}_FORUPDATES_{}", prefix, stamp),
        OutputKind::Unknown => format!("{}_ALIGNED_{}", prefix, stamp),
    }
}
