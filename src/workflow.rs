//! Multi-file worklist workflows.
//!
//! A [`Workflow`] takes several uploads by role (`tad`, `endorsement`,
//! `masterlist`, ...) and produces named output tables plus a few dashboard
//! counts. Like processors they are looked up by name through a
//! [`WorkflowRegistry`].
//!
//! The helpers here hold the rules every workflow shares: the upload
//! template, date formatting and the way input files are tidied before
//! they are matched on `LAN`.

use crate::cell::CellValue;
use crate::daily::DailyTadUpdate;
use crate::endorsement::{NewEndorsement, WeeklyEndorsement};
use crate::error::{Result, SheetError};
use crate::table::Table;
use chrono::{Datelike, Months, NaiveDate};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Columns of the upload template, in output order
pub const TEMPLATE_HEADERS: [&str; 46] = [
    "LAST BARCODE DATE",
    "LAST BARCODE",
    "PTP DATE",
    "AGENT",
    "CLASSIFICATION",
    "ENDO DATE",
    "DATE REFERRED",
    "CTL2",
    "CTL3",
    "CTL4",
    "DEBTOR ID",
    "LAN",
    "NAME",
    "PAST DUE",
    "PAYOFF AMOUNT",
    "PRINCIPAL",
    "MONTHLY AMORTIZATION",
    "INTEREST",
    "LPC",
    "INSURANCE",
    "PREPAYMENT",
    "CU PAYMENT",
    "LAST PAYMENT DATE",
    "PREM AMT",
    "PROD TYPE",
    "LPC YTD",
    "RATE",
    "REPRICING DATE",
    "DPD",
    "LOAN MATURITY",
    "DUE DATE",
    "OLDEST DUE DATE",
    "NEXT DUE DATE",
    "ADA SHORTAGE",
    "UNIT",
    "EMAIL",
    "ALTERNATIVE EMAIL ADDRESS",
    "MOBILE_ALS",
    "MOBILE_ALFES",
    "PRIMARY_NO_ALS",
    "BUS_NO_ALS",
    "LANDLINE_NO_ALS",
    "CO BORROWER",
    "CO BORROWER MOBILE_ALFES",
    "CO BORROWER LANDLINE__ALFES",
    "CO BORROWER EMAIL",
];

/// Columns written as `mm/dd/yyyy` text
pub const DATE_COLUMNS: [&str; 9] = [
    "DATE",
    "PTP DATE",
    "ENDO DATE",
    "DATE REFERRED",
    "LAST PAYMENT DATE",
    "LOAN MATURITY",
    "OLDEST DUE DATE",
    "NEXT DUE DATE",
    "REPRICING DATE",
];

/// Placeholders exported systems write instead of a real date
const INVALID_DATE_MARKERS: [&str; 10] = [
    "0",
    "0/00/0000",
    "00/00/00",
    "NaT",
    "nan",
    "None",
    "",
    "1970-01-01",
    "01/01/1970",
    "1/1/1970",
];

pub const NEW_ENDO: &str = "NEW ENDO";
pub const REENDO: &str = "REENDO";

/// One upload a workflow reads
#[derive(Clone, Debug, Serialize)]
pub struct InputSpec {
    pub role: &'static str,
    pub required: bool,
    pub description: &'static str,
}

impl InputSpec {
    pub const fn required(role: &'static str, description: &'static str) -> Self {
        InputSpec {
            role,
            required: true,
            description,
        }
    }

    pub const fn optional(role: &'static str, description: &'static str) -> Self {
        InputSpec {
            role,
            required: false,
            description,
        }
    }
}

/// An upload handed to a workflow
#[derive(Clone, Debug)]
pub struct InputFile {
    pub filename: String,
    pub table: Arc<Table>,
}

/// Uploads keyed by the role they play
#[derive(Clone, Debug, Default)]
pub struct WorkflowInputs {
    files: HashMap<String, InputFile>,
}

impl WorkflowInputs {
    pub fn new() -> Self {
        WorkflowInputs::default()
    }

    pub fn insert(&mut self, role: &str, filename: impl Into<String>, table: Arc<Table>) {
        self.files.insert(
            role.to_string(),
            InputFile {
                filename: filename.into(),
                table,
            },
        );
    }

    pub fn get(&self, role: &str) -> Option<&InputFile> {
        self.files.get(role)
    }

    pub fn require(&self, role: &str) -> Result<&InputFile> {
        self.get(role)
            .ok_or_else(|| SheetError::NoUpload(role.to_string()))
    }
}

/// An output table with a stable key and its download name (no extension)
#[derive(Clone, Debug)]
pub struct NamedTable {
    pub key: String,
    pub name: String,
    pub table: Table,
}

impl NamedTable {
    pub fn new(key: &str, name: impl Into<String>, table: Table) -> Self {
        NamedTable {
            key: key.to_string(),
            name: name.into(),
            table,
        }
    }
}

/// A dashboard count
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metric {
    pub label: String,
    pub value: usize,
}

impl Metric {
    pub fn new(label: &str, value: usize) -> Self {
        Metric {
            label: label.to_string(),
            value,
        }
    }
}

/// Everything a workflow run produces
#[derive(Clone, Debug, Default)]
pub struct WorkflowOutput {
    /// The first output is the primary one
    pub outputs: Vec<NamedTable>,
    pub metrics: Vec<Metric>,
    pub warnings: Vec<String>,
}

impl WorkflowOutput {
    pub fn output(&self, key: &str) -> Option<&NamedTable> {
        self.outputs.iter().find(|o| o.key == key)
    }

    pub fn metric(&self, label: &str) -> Option<usize> {
        self.metrics.iter().find(|m| m.label == label).map(|m| m.value)
    }
}

/// A named job turning several uploads into several outputs
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Uploads this workflow reads, by role
    fn inputs(&self) -> Vec<InputSpec>;

    /// Run over `inputs`; `today` stamps ENDO DATE and the output names
    fn run(&self, inputs: &WorkflowInputs, today: NaiveDate) -> Result<WorkflowOutput>;
}

/// Workflows by name
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Box<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn empty() -> Self {
        WorkflowRegistry {
            workflows: BTreeMap::new(),
        }
    }

    /// Registry holding the endorsement and daily update workflows
    pub fn with_defaults() -> Self {
        let mut registry = WorkflowRegistry::empty();
        registry.register(Box::new(NewEndorsement));
        registry.register(Box::new(WeeklyEndorsement));
        registry.register(Box::new(DailyTadUpdate));
        registry
    }

    pub fn register(&mut self, workflow: Box<dyn Workflow>) {
        self.workflows.insert(workflow.name().to_string(), workflow);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Workflow> {
        self.workflows
            .get(name)
            .map(|w| w.as_ref())
            .ok_or_else(|| SheetError::UnknownStrategy(name.to_string()))
    }

    /// Sorted by name
    pub fn list(&self) -> Vec<&dyn Workflow> {
        self.workflows.values().map(|w| w.as_ref()).collect()
    }

    /// Check required roles are present, then run the workflow
    ///
    /// # Arguments
    /// * `name` - Registered workflow name
    /// * `inputs` - Uploads by role
    /// * `today` - Date used for ENDO DATE and output names
    ///
    /// # Returns
    /// * `Result<WorkflowOutput>` - Outputs, metrics and warnings
    pub fn run(
        &self,
        name: &str,
        inputs: &WorkflowInputs,
        today: NaiveDate,
    ) -> Result<WorkflowOutput> {
        let workflow = self.get(name)?;
        for spec in workflow.inputs() {
            if spec.required && inputs.get(spec.role).is_none() {
                return Err(SheetError::NoUpload(spec.role.to_string()));
            }
        }

        let output = workflow.run(inputs, today)?;
        for warning in &output.warnings {
            warn!("{}: {}", name, warning);
        }
        info!(
            "Workflow {} produced {} outputs",
            name,
            output.outputs.len()
        );
        Ok(output)
    }
}

/// Tidy an input before matching on LAN
///
/// Headers are trimmed and upper-cased, `ACCTNUM` becomes `LAN`, LAN cells
/// become trimmed text and repeated LANs keep their last row.
pub fn prepare_input(table: &Table) -> Table {
    let mut prepared = table.clone();
    prepared.normalize_headers();
    prepared.rename_column("ACCTNUM", "LAN");
    if let Some(lan) = prepared.column_index("LAN") {
        prepared.map_column(lan, |cell| match cell.key_text() {
            text if text.is_empty() => CellValue::Empty,
            text => CellValue::Text(text),
        });
        let dropped = prepared.drop_duplicate_keys(lan);
        if dropped > 0 {
            info!("Dropped {} rows with a repeated LAN", dropped);
        }
    }
    prepared
}

/// Row position of each LAN
pub fn lan_index(table: &Table, lan: usize) -> HashMap<String, usize> {
    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row[lan].key_text(), i))
        .collect()
}

/// The date a cell holds, ignoring placeholder values and the Unix epoch
pub fn valid_date(cell: &CellValue) -> Option<NaiveDate> {
    if let CellValue::Text(text) = cell {
        if INVALID_DATE_MARKERS.contains(&text.trim()) {
            return None;
        }
    }
    let date = cell.to_datetime()?.date();
    if date == NaiveDate::from_ymd_opt(1970, 1, 1)? {
        None
    } else {
        Some(date)
    }
}

/// `mm/dd/yyyy` text
pub fn short_date(date: NaiveDate) -> CellValue {
    CellValue::Text(date.format("%m/%d/%Y").to_string())
}

/// Same day next month, clamped to the month's last day
pub fn next_month(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(1))
}

/// Rewrite every present date column as `mm/dd/yyyy`; unreadable dates become empty
pub fn format_date_columns(table: &mut Table) {
    for name in DATE_COLUMNS {
        if let Some(index) = table.column_index(name) {
            table.map_column(index, |cell| valid_date(cell).map(short_date).unwrap_or_default());
        }
    }
}

/// Fill DUE DATE (day of month) and NEXT DUE DATE from OLDEST DUE DATE
pub fn derive_due_dates(table: &mut Table) {
    table.ensure_columns(&["OLDEST DUE DATE", "DUE DATE", "NEXT DUE DATE"]);
    let oldest = table.column_index("OLDEST DUE DATE").unwrap_or_default();
    let due = table.column_index("DUE DATE").unwrap_or_default();
    let next = table.column_index("NEXT DUE DATE").unwrap_or_default();

    for row in table.rows.iter_mut() {
        match valid_date(&row[oldest]) {
            Some(date) => {
                row[due] = CellValue::Int(date.day() as i64);
                row[next] = next_month(date).map(short_date).unwrap_or_default();
            }
            None => {
                row[due] = CellValue::Empty;
                row[next] = CellValue::Empty;
            }
        }
    }
}

/// Numeric value of a cell; text is parsed, anything else counts as zero
pub fn amount(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Text(text) => text.trim().parse().unwrap_or(0.0),
        other => other.as_f64().unwrap_or(0.0),
    }
}

/// The table laid out as the upload template
pub fn to_template(table: &Table) -> Table {
    table.select_columns(&TEMPLATE_HEADERS)
}
