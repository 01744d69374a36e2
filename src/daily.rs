//! Daily TAD update of the active worklist.
//!
//! Yesterday's active list is refreshed from today's TAD by LAN. Accounts
//! whose past due dropped to zero are pulled out, and TAD accounts with a
//! past due that yesterday's list did not have come back as revived
//! `REENDO` accounts, completed from the masterlist when one is uploaded.

use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::table::Table;
use crate::workflow::{
    InputSpec, Metric, NamedTable, REENDO, TEMPLATE_HEADERS, Workflow, WorkflowInputs,
    WorkflowOutput, amount, format_date_columns, lan_index, next_month, prepare_input, short_date,
    to_template, valid_date,
};
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use std::collections::HashSet;

/// Amount columns cleaned of currency signs and separators
pub const NUMERIC_COLUMNS: [&str; 10] = [
    "PAST DUE",
    "PAYOFF AMOUNT",
    "PRINCIPAL",
    "INTEREST",
    "LPC",
    "INSURANCE",
    "CU PAYMENT",
    "PREM AMT",
    "LPC YTD",
    "RATE",
];

/// Active list columns replaced from TAD
const UPDATE_COLUMNS: [&str; 15] = [
    "PAST DUE",
    "PAYOFF AMOUNT",
    "PRINCIPAL",
    "INTEREST",
    "LPC",
    "INSURANCE",
    "CU PAYMENT",
    "PREM AMT",
    "LAST PAYMENT DATE",
    "PROD TYPE",
    "LPC YTD",
    "RATE",
    "REPRICING DATE",
    "DPD",
    "ADA SHORTAGE",
];

const TAD_RENAMES: [(&str, &str); 3] = [
    ("LST BAL CHG DT", "LAST PAYMENT DATE"),
    ("CU PAYMENT AMT", "CU PAYMENT"),
    ("CU PAYMENT AMOUNT", "CU PAYMENT"),
];

/// Revive columns the masterlist never overwrites
const KEPT_ON_REVIVE: [&str; 6] = [
    "LAN",
    "CLASSIFICATION",
    "ENDO DATE",
    "OLDEST DUE DATE",
    "NEXT DUE DATE",
    "DUE DATE",
];

lazy_static! {
    static ref ACTIVE_FILENAME: Regex = Regex::new(r"^ACTIVE FILES \d{6}").unwrap();
    static ref TAD_FILENAME: Regex = Regex::new(r"^TAD_SPM M1_\d{2}\.\d{2}\.\d{4}").unwrap();
    static ref MASTERLIST_FILENAME: Regex = Regex::new(r"^MASTERLIST \d{8}").unwrap();
}

/// Check an upload's name against the naming rule for its role
///
/// `active` files are `ACTIVE FILES mmddyy`, `tad` files
/// `TAD_SPM M1_mm.dd.yyyy` and `masterlist` files `MASTERLIST mmddyyyy`.
/// Case is ignored. Other roles have no rule.
///
/// # Examples
/// ```
/// use worklist::daily::validate_filename;
///
/// assert!(validate_filename("tad", "tad_spm m1_10.16.2025.xlsx").is_ok());
/// assert!(validate_filename("active", "worklist.xlsx").is_err());
/// ```
pub fn validate_filename(role: &str, filename: &str) -> Result<()> {
    let (rule, expected): (&Regex, &str) = match role {
        "active" => (&*ACTIVE_FILENAME, "ACTIVE FILES mmddyy"),
        "tad" => (&*TAD_FILENAME, "TAD_SPM M1_mm.dd.yyyy"),
        "masterlist" => (&*MASTERLIST_FILENAME, "MASTERLIST mmddyyyy"),
        _ => return Ok(()),
    };
    if rule.is_match(&filename.to_uppercase()) {
        Ok(())
    } else {
        Err(SheetError::Validation(format!(
            "Invalid filename for the {} file: '{}' (expected {})",
            role, filename, expected
        )))
    }
}

/// Read an amount written with currency signs or thousands separators
///
/// `₱`, `$`, `,` and `-` are stripped from the cell's text before parsing.
/// Anything that still does not parse, including an empty cell, is zero.
///
/// # Examples
/// ```
/// use worklist::daily::clean_numeric;
/// use worklist::CellValue;
///
/// assert_eq!(clean_numeric(&CellValue::from("₱1,234.50")), CellValue::Float(1234.5));
/// assert_eq!(clean_numeric(&CellValue::from("n/a")), CellValue::Int(0));
/// ```
pub fn clean_numeric(cell: &CellValue) -> CellValue {
    let text: String = cell
        .to_string()
        .chars()
        .filter(|c| !matches!(c, '₱' | '$' | ',' | '-'))
        .collect();
    let value = text
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0);
    CellValue::from_float(value)
}

/// Apply [`clean_numeric`] to every amount column the table has
pub fn clean_numeric_columns(table: &mut Table) {
    for name in NUMERIC_COLUMNS {
        if let Some(index) = table.column_index(name) {
            table.map_column(index, clean_numeric);
        }
    }
}

fn lan_set(table: &Table, lan: usize) -> HashSet<String> {
    table.column(lan).map(CellValue::key_text).collect()
}

/// Refresh yesterday's active list from today's TAD
pub struct DailyTadUpdate;

impl Workflow for DailyTadUpdate {
    fn name(&self) -> &str {
        "daily-tad"
    }

    fn description(&self) -> &str {
        "Update the active list from TAD, split out pullouts and revive accounts"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::required("active", "Yesterday's active list (ACTIVE FILES mmddyy)"),
            InputSpec::required("tad", "Today's TAD (TAD_SPM M1_mm.dd.yyyy, header on row 4)"),
            InputSpec::optional("masterlist", "Masterlist for revive lookups (MASTERLIST mmddyyyy)"),
        ]
    }

    fn run(&self, inputs: &WorkflowInputs, today: NaiveDate) -> Result<WorkflowOutput> {
        let active_file = inputs.require("active")?;
        let tad_file = inputs.require("tad")?;
        validate_filename("active", &active_file.filename)?;
        validate_filename("tad", &tad_file.filename)?;
        let masterlist = match inputs.get("masterlist") {
            Some(file) => {
                validate_filename("masterlist", &file.filename)?;
                Some(prepare_input(&file.table))
            }
            None => None,
        };
        let mut warnings = Vec::new();

        let mut yesterday = prepare_input(&active_file.table);
        let mut tad = prepare_input(&tad_file.table);
        for (from, to) in TAD_RENAMES {
            tad.rename_column(from, to);
        }
        let yesterday_lan = yesterday.require_column("LAN", "active file")?;
        let tad_lan = tad.require_column("LAN", "TAD file")?;
        let tad_past_due = tad.require_column("PAST DUE", "TAD file")?;
        clean_numeric_columns(&mut tad);
        clean_numeric_columns(&mut yesterday);

        // Refresh the update columns from TAD by LAN
        let mut updated = yesterday.clone();
        updated.ensure_columns(&TEMPLATE_HEADERS);
        let tad_rows = lan_index(&tad, tad_lan);
        for name in UPDATE_COLUMNS {
            let Some(source) = tad.column_index(name) else {
                continue;
            };
            let values: Vec<CellValue> = updated
                .rows
                .iter()
                .map(|row| {
                    tad_rows
                        .get(&row[yesterday_lan].key_text())
                        .and_then(|&r| tad.cell(r, source))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            updated.set_column(name, values);
        }
        let past_due = updated.column_index("PAST DUE").unwrap_or_default();
        updated.map_column(past_due, |cell| CellValue::from_float(amount(cell)));

        let tad_with_past_due = tad.filter_rows(|row| amount(&row[tad_past_due]) > 0.0);
        let pullout = updated.filter_rows(|row| amount(&row[past_due]) <= 0.0);
        let mut updated = updated.filter_rows(|row| amount(&row[past_due]) > 0.0);
        let active_with_past_due = updated.height();

        let yesterday_lans = lan_set(&yesterday, yesterday_lan);
        let revive_lans: HashSet<String> = lan_set(&tad_with_past_due, tad_lan)
            .difference(&yesterday_lans)
            .cloned()
            .collect();
        let mut revive_raw = tad.filter_rows(|row| revive_lans.contains(&row[tad_lan].key_text()));

        let mut revive = revive_raw.clone();
        revive.ensure_columns(&TEMPLATE_HEADERS);
        revive.fill_column("CLASSIFICATION", CellValue::from(REENDO));
        revive.fill_column("ENDO DATE", short_date(today));
        match &masterlist {
            Some(masterlist) if masterlist.column_index("LAN").is_some() => {
                complete_from_masterlist(&mut revive, masterlist);
            }
            Some(_) => warnings
                .push("Masterlist has no LAN column; revive accounts were not looked up".to_string()),
            None if revive.height() > 0 => {
                warnings.push("No masterlist uploaded; revive accounts keep their TAD values".to_string())
            }
            None => {}
        }
        format_date_columns(&mut revive);
        for row in revive.select_columns(&updated.columns).rows {
            updated.push_row(row);
        }

        format_date_columns(&mut updated);
        let mut pullout = pullout;
        format_date_columns(&mut pullout);
        format_date_columns(&mut revive_raw);

        let updated_lan = updated.column_index("LAN").unwrap_or_default();
        let for_update = updated.filter_rows(|row| !revive_lans.contains(&row[updated_lan].key_text()));
        let new_lans: HashSet<String> = lan_set(&tad, tad_lan)
            .difference(&yesterday_lans)
            .cloned()
            .collect();
        let for_upload = updated.filter_rows(|row| new_lans.contains(&row[updated_lan].key_text()));

        info!(
            "Daily update: {} active, {} pulled out, {} revived",
            updated.height(),
            pullout.height(),
            revive_raw.height()
        );

        let stamp = today.format("%m%d%y");
        Ok(WorkflowOutput {
            metrics: vec![
                Metric::new("Total TAD", tad.height()),
                Metric::new("TAD with past due", tad_with_past_due.height()),
                Metric::new("Active with past due", active_with_past_due),
                Metric::new("Pullout", pullout.height()),
                Metric::new("Revive", revive_raw.height()),
                Metric::new("For update", for_update.height()),
            ],
            outputs: vec![
                NamedTable::new("active", format!("ACTIVE WORKLIST {}", stamp), to_template(&updated)),
                NamedTable::new("pullout", format!("PULLED OUT {}", stamp), to_template(&pullout)),
                NamedTable::new(
                    "revive",
                    format!("REVIVE ACCOUNTS RAW {}", stamp),
                    to_template(&revive_raw),
                ),
                NamedTable::new("for-update", format!("FOR UPDATE {}", stamp), to_template(&for_update)),
                NamedTable::new("for-upload", format!("FOR UPLOAD {}", stamp), to_template(&for_upload)),
            ],
            warnings,
        })
    }
}

/// Fill revive rows from the masterlist row with the same LAN
///
/// DATE REFERRED is taken from the masterlist when TAD's is not a real date.
/// OLDEST DUE DATE becomes the later of the two, and the due dates follow it.
/// Any other empty template column is copied over.
fn complete_from_masterlist(revive: &mut Table, masterlist: &Table) {
    let Some(master_lan) = masterlist.column_index("LAN") else {
        return;
    };
    let master_rows = lan_index(masterlist, master_lan);
    let lan = revive.column_index("LAN").unwrap_or_default();
    let referred = revive.column_index("DATE REFERRED").unwrap_or_default();
    let oldest = revive.column_index("OLDEST DUE DATE").unwrap_or_default();
    let next = revive.column_index("NEXT DUE DATE").unwrap_or_default();
    let due = revive.column_index("DUE DATE").unwrap_or_default();

    let master_referred = masterlist.column_index("DATE REFERRED");
    let master_oldest = masterlist.column_index("OLDEST DUE DATE");
    let fillable: Vec<(usize, usize)> = TEMPLATE_HEADERS
        .iter()
        .filter(|name| !KEPT_ON_REVIVE.contains(*name))
        .filter_map(|name| Some((revive.column_index(name)?, masterlist.column_index(name)?)))
        .collect();

    for row in revive.rows.iter_mut() {
        let Some(&m) = master_rows.get(&row[lan].key_text()) else {
            continue;
        };
        let master = &masterlist.rows[m];

        if let Some(mr) = master_referred {
            if valid_date(&row[referred]).is_none() {
                row[referred] = master[mr].clone();
            }
        }

        if let Some(mo) = master_oldest {
            let latest = valid_date(&row[oldest]).max(valid_date(&master[mo]));
            match latest {
                Some(date) => {
                    row[oldest] = short_date(date);
                    row[next] = next_month(date).map(short_date).unwrap_or_default();
                    row[due] = CellValue::Int(date.day() as i64);
                }
                None => {
                    row[oldest] = CellValue::Empty;
                    row[next] = CellValue::Empty;
                    row[due] = CellValue::Empty;
                }
            }
        }

        for &(to, from) in &fillable {
            if row[to].is_missing() {
                row[to] = master[from].clone();
            }
        }
    }
}
