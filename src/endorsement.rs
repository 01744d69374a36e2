//! Endorsement workflows: TAD plus the M1 endorsement file, classified against a masterlist.
//!
//! Both workflows build the active file the same way. TAD columns are mapped
//! onto the template, the endorsement file is left-joined on `LAN` to fill
//! contact and amortization columns, and every account is classified as
//! `NEW ENDO` or `REENDO` depending on whether the masterlist knows its LAN.
//! The weekly run also folds the new accounts into the masterlist.

use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::merge::{Concat, LeftJoin, Merger};
use crate::table::Table;
use crate::workflow::{
    InputSpec, Metric, NEW_ENDO, NamedTable, REENDO, Workflow, WorkflowInputs, WorkflowOutput,
    amount, derive_due_dates, format_date_columns, prepare_input, short_date,
    to_template, valid_date,
};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::HashMap;

/// TAD column and the template column it feeds
const TAD_COLUMNS: [(&str, &str); 21] = [
    ("DATE REFERRED", "DATE REFERRED"),
    ("CTL2", "CTL2"),
    ("CTL3", "CTL3"),
    ("CTL4", "CTL4"),
    ("LAN", "LAN"),
    ("PAST DUE", "PAST DUE"),
    ("PAYOFF AMOUNT", "PAYOFF AMOUNT"),
    ("PRINCIPAL", "PRINCIPAL"),
    ("INTEREST", "INTEREST"),
    ("LPC", "LPC"),
    ("INSURANCE", "INSURANCE"),
    ("PREPAYMENT", "PREPAYMENT"),
    ("CU PAYMENT AMT", "CU PAYMENT"),
    ("LST BAL CHG DT", "LAST PAYMENT DATE"),
    ("PREM AMT", "PREM AMT"),
    ("PROD TYPE", "PROD TYPE"),
    ("LPC YTD", "LPC YTD"),
    ("RATE", "RATE"),
    ("REPRICING DATE", "REPRICING DATE"),
    ("DPD", "DPD"),
    ("ADA SHORTAGE", "ADA SHORTAGE"),
];

/// Endorsement column and the template column it fills when that is empty
const ENDORSEMENT_COLUMNS: [(&str, &str); 15] = [
    ("MOAMORT_ALFES", "MONTHLY AMORTIZATION"),
    ("OLDEST_DUE_DATE", "OLDEST DUE DATE"),
    ("SHORT_DESCRIPTION", "UNIT"),
    ("EMAIL_ALS", "EMAIL"),
    ("EMAIL_ALFES", "ALTERNATIVE EMAIL ADDRESS"),
    ("MOBILE_NO_ALS", "MOBILE_ALS"),
    ("MOBILE_ALFES", "MOBILE_ALFES"),
    ("PRIMARY_NO_ALS", "PRIMARY_NO_ALS"),
    ("BUS_NO_ALS", "BUS_NO_ALS"),
    ("LANDLINE_NO_ALFES", "LANDLINE_NO_ALS"),
    ("COMAKER_NAME_ALFES", "CO BORROWER"),
    ("COMAKER_MOBILE_ALFES", "CO BORROWER MOBILE_ALFES"),
    ("COMAKER_LANDLINE_ALFES", "CO BORROWER LANDLINE__ALFES"),
    ("COMAKER_EMAIL_ALFES", "CO BORROWER EMAIL"),
    ("NAME_ALS", "NAME"),
];

/// Masterlist columns carried over for each new account
const MASTERLIST_COLUMNS: [&str; 5] = ["LAN", "NAME", "DATE REFERRED", "CLASSIFICATION", "ENDO DATE"];

/// Most LANs listed when REENDO dates do not add up
const MAX_LISTED_LANS: usize = 20;

/// TAD rows with their columns renamed to the template's
///
/// # Arguments
/// * `tad` - TAD upload as read
///
/// # Returns
/// * `Result<Table>` - One column per TAD mapping, in mapping order
pub fn tad_active(tad: &Table) -> Result<Table> {
    let tad = prepare_input(tad);
    tad.require_column("LAN", "TAD file")?;

    let sources: Vec<Option<usize>> = TAD_COLUMNS
        .iter()
        .map(|(source, _)| tad.column_index(source))
        .collect();
    let mut active = Table::new(TAD_COLUMNS.iter().map(|(_, target)| target.to_string()).collect());
    for row in &tad.rows {
        active.push_row(
            sources
                .iter()
                .map(|source| source.map(|i| row[i].clone()).unwrap_or_default())
                .collect(),
        );
    }
    Ok(active)
}

/// Left-join the endorsement file on LAN and fill template columns from it
pub fn attach_endorsement(active: &Table, endorsement: &Table) -> Result<Table> {
    let endorsement = prepare_input(endorsement);
    endorsement.require_column("LAN", "endorsement file")?;

    let mut merged = LeftJoin::new("LAN").merge(&[active, &endorsement])?;
    for (source, target) in ENDORSEMENT_COLUMNS {
        fill_missing(&mut merged, source, target);
    }
    Ok(merged)
}

/// Copy `source` into empty cells of `target`, creating `target` if needed
fn fill_missing(table: &mut Table, source: &str, target: &str) {
    let Some(from) = table.column_index(source) else {
        return;
    };
    table.ensure_columns(&[target]);
    let Some(to) = table.column_index(target) else {
        return;
    };
    if from == to {
        return;
    }
    for row in table.rows.iter_mut() {
        if row[to].is_missing() {
            row[to] = row[from].clone();
        }
    }
}

/// Set CLASSIFICATION, DATE REFERRED and ENDO DATE on every row
///
/// A LAN the masterlist knows is `REENDO` and keeps the masterlist's DATE
/// REFERRED when that is a real date. Everything else is `NEW ENDO`
/// referred today.
fn classify(active: &mut Table, masterlist: Option<&Table>, today: NaiveDate) {
    let referred: HashMap<String, CellValue> = match masterlist {
        Some(masterlist) => {
            let lan = masterlist.column_index("LAN");
            let date = masterlist.column_index("DATE REFERRED");
            masterlist
                .rows
                .iter()
                .filter_map(|row| {
                    let key = row[lan?].key_text();
                    let value = date.map(|d| row[d].clone()).unwrap_or_default();
                    Some((key, value))
                })
                .collect()
        }
        None => HashMap::new(),
    };

    let lan = active.column_index("LAN").unwrap_or_default();
    let mut classes = Vec::with_capacity(active.height());
    let mut dates = Vec::with_capacity(active.height());
    for row in &active.rows {
        match referred.get(&row[lan].key_text()) {
            Some(previous) => {
                classes.push(CellValue::from(REENDO));
                dates.push(short_date(valid_date(previous).unwrap_or(today)));
            }
            None => {
                classes.push(CellValue::from(NEW_ENDO));
                dates.push(short_date(today));
            }
        }
    }

    active.set_column("CLASSIFICATION", classes);
    active.set_column("DATE REFERRED", dates);
    active.fill_column("ENDO DATE", short_date(today));
}

/// Finish an active file: due dates, date formats, template layout
fn finish(mut active: Table) -> Table {
    derive_due_dates(&mut active);
    format_date_columns(&mut active);
    to_template(&active)
}

fn count_class(table: &Table, class: &str) -> usize {
    table
        .column_index("CLASSIFICATION")
        .map(|c| table.column(c).filter(|cell| cell.key_text() == class).count())
        .unwrap_or(0)
}

fn rows_of_class(table: &Table, class: &str) -> Table {
    match table.column_index("CLASSIFICATION") {
        Some(c) => table.filter_rows(|row| row[c].key_text() == class),
        None => table.head(0),
    }
}

/// First-time endorsement: TAD joined with the endorsement file
///
/// The masterlist is optional; without one every account is `NEW ENDO`.
pub struct NewEndorsement;

impl Workflow for NewEndorsement {
    fn name(&self) -> &str {
        "new-endorsement"
    }

    fn description(&self) -> &str {
        "Align TAD, join the endorsement file on LAN and classify accounts"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::required("tad", "TAD file (sheet 1, header on row 4)"),
            InputSpec::required("endorsement", "M1 AUTO SPM endorsement file"),
            InputSpec::optional("masterlist", "Masterlist for classification"),
        ]
    }

    fn run(&self, inputs: &WorkflowInputs, today: NaiveDate) -> Result<WorkflowOutput> {
        let tad = inputs.require("tad")?;
        let endorsement = inputs.require("endorsement")?;
        let mut warnings = Vec::new();

        let active = tad_active(&tad.table)?;
        let mut aligned_tad = active.clone();
        format_date_columns(&mut aligned_tad);

        let mut merged = attach_endorsement(&active, &endorsement.table)?;

        let masterlist = inputs.get("masterlist").map(|m| prepare_input(&m.table));
        match &masterlist {
            Some(table) if table.column_index("LAN").is_none() => {
                warnings.push("Masterlist has no LAN column; every account is NEW ENDO".to_string());
                classify(&mut merged, None, today);
            }
            Some(table) => classify(&mut merged, Some(table), today),
            None => {
                warnings.push("No masterlist uploaded; every account is NEW ENDO".to_string());
                classify(&mut merged, None, today);
            }
        }

        let final_table = finish(merged);
        let past_due = final_table.column_index("PAST DUE").unwrap_or_default();
        let with_past_due = final_table
            .column(past_due)
            .filter(|cell| amount(cell) > 0.0)
            .count();
        let pullout = final_table.height() - with_past_due;
        let endorsed = prepare_input(&endorsement.table).height();
        info!(
            "New endorsement: {} accounts, {} with past due",
            final_table.height(),
            with_past_due
        );

        Ok(WorkflowOutput {
            outputs: vec![
                NamedTable::new("merged", "merged_TAD_ENDORSEMENT", final_table),
                NamedTable::new("aligned-tad", "TAD_Aligned_Template", to_template(&aligned_tad)),
            ],
            metrics: vec![
                Metric::new("New ENDO", endorsed),
                Metric::new("With past due", with_past_due),
                Metric::new("POUT (0 past due)", pullout),
                Metric::new("Active", with_past_due),
            ],
            warnings,
        })
    }
}

/// Weekly endorsement against an existing masterlist
///
/// Fails when a `REENDO` account ends up referred on its endorsement date,
/// which means the masterlist lacks a usable DATE REFERRED for it.
pub struct WeeklyEndorsement;

impl Workflow for WeeklyEndorsement {
    fn name(&self) -> &str {
        "weekly-endorsement"
    }

    fn description(&self) -> &str {
        "Build the active file and consolidate the masterlist"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::required("tad", "TAD file (sheet 1, header on row 4)"),
            InputSpec::required("endorsement", "M1 AUTO SPM endorsement file"),
            InputSpec::required("masterlist", "Existing masterlist"),
        ]
    }

    fn run(&self, inputs: &WorkflowInputs, today: NaiveDate) -> Result<WorkflowOutput> {
        let tad = inputs.require("tad")?;
        let endorsement = inputs.require("endorsement")?;
        let masterlist = prepare_input(&inputs.require("masterlist")?.table);
        masterlist.require_column("LAN", "masterlist")?;

        let active = tad_active(&tad.table)?;
        let mut merged = attach_endorsement(&active, &endorsement.table)?;
        classify(&mut merged, Some(&masterlist), today);
        check_reendo_dates(&merged)?;

        let final_active = finish(merged);
        let new_accounts = rows_of_class(&final_active, NEW_ENDO).select_columns(&MASTERLIST_COLUMNS);
        let consolidated =
            Concat::new(Some("LAN".to_string())).merge(&[&masterlist, &new_accounts])?;

        let stamp = today.format("%Y%m%d");
        let metrics = vec![
            Metric::new("Total accounts", final_active.height()),
            Metric::new("NEW ENDO", count_class(&final_active, NEW_ENDO)),
            Metric::new("REENDO", count_class(&final_active, REENDO)),
            Metric::new("Masterlist size", consolidated.height()),
        ];
        let reendo = rows_of_class(&final_active, REENDO);

        Ok(WorkflowOutput {
            outputs: vec![
                NamedTable::new("active", format!("Active_File_{}", stamp), final_active.clone()),
                NamedTable::new("masterlist", format!("Masterlist_{}", stamp), consolidated),
                NamedTable::new("for-upload", format!("For_Upload_{}", stamp), final_active),
                NamedTable::new("reendo", format!("REENDO_Accounts_{}", stamp), reendo),
            ],
            metrics,
            warnings: Vec::new(),
        })
    }
}

/// Reject REENDO rows referred on their endorsement date
fn check_reendo_dates(active: &Table) -> Result<()> {
    let (Some(lan), Some(class), Some(referred), Some(endo)) = (
        active.column_index("LAN"),
        active.column_index("CLASSIFICATION"),
        active.column_index("DATE REFERRED"),
        active.column_index("ENDO DATE"),
    ) else {
        return Ok(());
    };

    let suspicious: Vec<String> = active
        .rows
        .iter()
        .filter(|row| row[class].key_text() == REENDO && row[referred] == row[endo])
        .map(|row| row[lan].key_text())
        .collect();
    if suspicious.is_empty() {
        return Ok(());
    }

    warn!("{} REENDO accounts referred today", suspicious.len());
    let listed: Vec<&str> = suspicious
        .iter()
        .take(MAX_LISTED_LANS)
        .map(String::as_str)
        .collect();
    Err(SheetError::Validation(format!(
        "{} REENDO accounts have DATE REFERRED equal to ENDO DATE; check the masterlist's DATE REFERRED for LAN {}",
        suspicious.len(),
        listed.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::lan_index;
    use std::sync::Arc;

    /// LANs in row order
    fn lans(table: &Table) -> Vec<String> {
        let lan = table.column_index("LAN").unwrap_or_default();
        let mut keys: Vec<(usize, String)> = lan_index(table, lan)
            .into_iter()
            .map(|(key, row)| (row, key))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, key)| key).collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 16).unwrap()
    }

    fn tad() -> Table {
        Table::from_rows(
            ["LAN", "PAST DUE", "CU PAYMENT AMT", "LST BAL CHG DT", "DPD", "CTL4"],
            vec![
                vec![
                    CellValue::Int(1001),
                    CellValue::Float(1500.5),
                    CellValue::Int(200),
                    CellValue::from("2025-09-30"),
                    CellValue::Int(12),
                    CellValue::from("T4"),
                ],
                vec![
                    CellValue::Int(1002),
                    CellValue::Int(0),
                    CellValue::Int(0),
                    CellValue::Empty,
                    CellValue::Int(0),
                    CellValue::Empty,
                ],
                vec![
                    CellValue::Int(1003),
                    CellValue::Int(900),
                    CellValue::Empty,
                    CellValue::Empty,
                    CellValue::Int(40),
                    CellValue::Empty,
                ],
            ],
        )
    }

    fn endorsement() -> Table {
        Table::from_rows(
            ["ACCTNUM", "NAME_ALS", "Oldest_Due_Date", "EMAIL_ALS", "MOBILE_ALFES", "CTL4"],
            vec![
                vec![
                    CellValue::from("1001"),
                    CellValue::from("ANA CRUZ"),
                    CellValue::from("01/31/2025"),
                    CellValue::from("ana@mail.ph"),
                    CellValue::from("0917"),
                    CellValue::from("E4"),
                ],
                vec![
                    CellValue::from("1003"),
                    CellValue::from("BEN REYES"),
                    CellValue::from("08/15/2025"),
                    CellValue::Empty,
                    CellValue::Empty,
                    CellValue::Empty,
                ],
            ],
        )
    }

    fn masterlist() -> Table {
        Table::from_rows(
            ["LAN", "NAME", "DATE REFERRED"],
            vec![
                vec![CellValue::from("1003"), CellValue::from("BEN REYES"), CellValue::from("05/02/2025")],
                vec![CellValue::from("0999"), CellValue::from("OLD ACCOUNT"), CellValue::from("01/10/2025")],
            ],
        )
    }

    fn inputs(with_masterlist: Option<Table>) -> WorkflowInputs {
        let mut inputs = WorkflowInputs::new();
        inputs.insert("tad", "TAD_SPM M1_10.16.2025.xlsx", Arc::new(tad()));
        inputs.insert("endorsement", "M1 AUTO SPM.xlsx", Arc::new(endorsement()));
        if let Some(masterlist) = with_masterlist {
            inputs.insert("masterlist", "MASTERLIST 10152025.xlsx", Arc::new(masterlist));
        }
        inputs
    }

    fn cell<'a>(table: &'a Table, row: usize, column: &str) -> &'a CellValue {
        let col = table.column_index(column).unwrap();
        table.cell(row, col).unwrap()
    }

    #[test]
    fn tad_columns_are_renamed_onto_the_template() {
        let active = tad_active(&tad()).unwrap();
        assert_eq!(active.width(), 21);
        assert_eq!(cell(&active, 0, "CU PAYMENT"), &CellValue::Int(200));
        assert_eq!(cell(&active, 0, "LAST PAYMENT DATE"), &CellValue::from("2025-09-30"));
        assert_eq!(cell(&active, 0, "LAN"), &CellValue::from("1001"));
        assert_eq!(cell(&active, 0, "PREPAYMENT"), &CellValue::Empty);
    }

    #[test]
    fn endorsement_fills_contact_columns_by_lan() {
        let active = tad_active(&tad()).unwrap();
        let merged = attach_endorsement(&active, &endorsement()).unwrap();
        assert_eq!(merged.height(), 3);
        assert_eq!(cell(&merged, 0, "NAME"), &CellValue::from("ANA CRUZ"));
        assert_eq!(cell(&merged, 0, "EMAIL"), &CellValue::from("ana@mail.ph"));
        assert_eq!(cell(&merged, 0, "OLDEST DUE DATE"), &CellValue::from("01/31/2025"));
        // TAD's CTL4 wins over the endorsement's
        assert_eq!(cell(&merged, 0, "CTL4"), &CellValue::from("T4"));
        assert_eq!(cell(&merged, 1, "NAME"), &CellValue::Empty);
    }

    #[test]
    fn new_endorsement_classifies_against_the_masterlist() {
        let output = NewEndorsement.run(&inputs(Some(masterlist())), today()).unwrap();
        assert!(output.warnings.is_empty());
        let merged = &output.output("merged").unwrap().table;
        assert_eq!(merged.width(), 46);
        assert_eq!(merged.columns[0], "LAST BARCODE DATE");

        assert_eq!(cell(merged, 0, "CLASSIFICATION"), &CellValue::from(NEW_ENDO));
        assert_eq!(cell(merged, 0, "DATE REFERRED"), &CellValue::from("10/16/2025"));
        assert_eq!(cell(merged, 2, "CLASSIFICATION"), &CellValue::from(REENDO));
        assert_eq!(cell(merged, 2, "DATE REFERRED"), &CellValue::from("05/02/2025"));
        assert_eq!(cell(merged, 2, "ENDO DATE"), &CellValue::from("10/16/2025"));

        assert_eq!(cell(merged, 0, "DUE DATE"), &CellValue::Int(31));
        assert_eq!(cell(merged, 0, "NEXT DUE DATE"), &CellValue::from("02/28/2025"));
        assert_eq!(cell(merged, 0, "LAST PAYMENT DATE"), &CellValue::from("09/30/2025"));
        assert_eq!(cell(merged, 1, "DUE DATE"), &CellValue::Empty);

        assert_eq!(output.metric("New ENDO"), Some(2));
        assert_eq!(output.metric("With past due"), Some(2));
        assert_eq!(output.metric("POUT (0 past due)"), Some(1));
        assert_eq!(output.metric("Active"), Some(2));

        let aligned = &output.output("aligned-tad").unwrap();
        assert_eq!(aligned.name, "TAD_Aligned_Template");
        assert_eq!(aligned.table.height(), 3);
    }

    #[test]
    fn new_endorsement_without_masterlist_warns() {
        let output = NewEndorsement.run(&inputs(None), today()).unwrap();
        assert_eq!(output.warnings.len(), 1);
        let merged = &output.outputs[0].table;
        assert_eq!(count_class(merged, NEW_ENDO), 3);

        let no_lan = Table::from_rows(["ACCOUNT"], vec![vec![CellValue::from("1003")]]);
        let output = NewEndorsement.run(&inputs(Some(no_lan)), today()).unwrap();
        assert!(output.warnings[0].contains("no LAN column"));
        assert_eq!(count_class(&output.outputs[0].table, REENDO), 0);
    }

    #[test]
    fn weekly_run_consolidates_the_masterlist() {
        let output = WeeklyEndorsement.run(&inputs(Some(masterlist())), today()).unwrap();
        let names: Vec<&str> = output.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Active_File_20251016",
                "Masterlist_20251016",
                "For_Upload_20251016",
                "REENDO_Accounts_20251016"
            ]
        );

        let consolidated = &output.output("masterlist").unwrap().table;
        assert_eq!(lans(consolidated), vec!["1003", "0999", "1001", "1002"]);
        assert_eq!(cell(consolidated, 2, "CLASSIFICATION"), &CellValue::from(NEW_ENDO));
        assert_eq!(cell(consolidated, 2, "NAME"), &CellValue::from("ANA CRUZ"));

        assert_eq!(output.output("reendo").unwrap().table.height(), 1);
        assert_eq!(
            output.output("for-upload").unwrap().table,
            output.output("active").unwrap().table
        );
        assert_eq!(output.metric("Total accounts"), Some(3));
        assert_eq!(output.metric("NEW ENDO"), Some(2));
        assert_eq!(output.metric("REENDO"), Some(1));
        assert_eq!(output.metric("Masterlist size"), Some(4));
    }

    #[test]
    fn weekly_run_rejects_reendo_referred_today() {
        let masterlist = Table::from_rows(
            ["LAN", "DATE REFERRED"],
            vec![vec![CellValue::from("1003"), CellValue::from("0/00/0000")]],
        );
        let result = WeeklyEndorsement.run(&inputs(Some(masterlist)), today());
        assert!(matches!(
            result,
            Err(SheetError::Validation(message)) if message.contains("1003")
        ));
    }

    #[test]
    fn weekly_run_needs_a_keyed_masterlist() {
        let masterlist = Table::from_rows(["ACCOUNT"], vec![vec![CellValue::from("1")]]);
        assert!(matches!(
            WeeklyEndorsement.run(&inputs(Some(masterlist)), today()),
            Err(SheetError::MissingColumn { column, .. }) if column == "LAN"
        ));
    }
}
