use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use worklist::alignment::output_basename;
use worklist::compare::{Comparator, KeyedComparator};
use worklist::config::Config;
use worklist::downloader::{DownloadFormat, export};
use worklist::loader::{LoadOptions, SheetSelector, load_table, sheet_names};
use worklist::merge::MergeHow;
use worklist::preview::{DEFAULT_PREVIEW_ROWS, shape_line};
use worklist::processing::StrategyRegistry;
use worklist::stats::describe;
use worklist::table::{Table, column_to_letter};
use worklist::workflow::{WorkflowInputs, WorkflowRegistry};

const USAGE: &str = "Usage: worklist-cli <command> [args] [options]

Commands:
  sheets   <file>                       List the sheets of a workbook
  preview  <file>                       Show shape and first rows
  describe <file>                       Statistics for numeric columns
  process  <file> <strategy>            Run a processing strategy
  align    <file>                       Align headers and report the mapping
  compare  <left> <right>               Compare two files
  merge    <left-join|concat> <file>... Merge files in order
  workflows                             List workflows and the files they read
  workflow <name> <role=file>...        Run a workflow; -o names the output folder

Options:
  --sheet <name|index>   Worksheet to read (default 0)
  --header-row <n>       0-based row holding the column names
  --rows <n>             Rows shown by preview
  --key <column>         Key column for compare, join key for merge
  -o, --output <file>    Write the result (.xlsx or .csv)

WORKLIST_WORKBOOK_PASSWORD opens encrypted workbooks.";

/// Positional arguments and `--name value` options
struct Args {
    positional: Vec<String>,
    options: HashMap<String, String>,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Args, String> {
        let mut positional = Vec::new();
        let mut options = HashMap::new();
        let mut iter = raw.iter();

        while let Some(arg) = iter.next() {
            let name = match arg.as_str() {
                "-o" => Some("output"),
                other => other.strip_prefix("--"),
            };
            match name {
                Some(name) => {
                    let value = iter
                        .next()
                        .ok_or_else(|| format!("Option --{} needs a value", name))?;
                    options.insert(name.to_string(), value.clone());
                }
                None => positional.push(arg.clone()),
            }
        }

        Ok(Args {
            positional,
            options,
        })
    }

    fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    fn positional(&self, index: usize, what: &str) -> Result<&str, String> {
        self.positional
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| format!("Missing {}\n\n{}", what, USAGE))
    }

    fn load_options(&self, password: Option<String>) -> Result<LoadOptions, String> {
        let header_row = match self.option("header-row") {
            Some(raw) => raw
                .parse()
                .map_err(|_| format!("Invalid header row: {}", raw))?,
            None => 0,
        };
        Ok(LoadOptions {
            sheet: self.option("sheet").map(SheetSelector::parse).unwrap_or_default(),
            header_row,
            password,
        })
    }
}

fn read(path: &str, options: &LoadOptions) -> Result<Table, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    Ok(load_table(&bytes, path, options)?)
}

/// Write `table` to `path`; the extension picks the format
fn write(table: &Table, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("xlsx");
    let format = DownloadFormat::parse(extension)
        .ok_or_else(|| format!("Cannot write .{} files", extension))?;
    fs::write(path, export(table, format)?)?;
    println!("Wrote {} ({})", path, shape_line(table.height(), table.width()));
    Ok(())
}

/// Print the first rows as a grid with spreadsheet column letters
fn print_grid(table: &Table, rows: usize) {
    let head = table.head(rows);
    let widths: Vec<usize> = (0..head.width())
        .map(|c| {
            head.column(c)
                .map(|cell| cell.to_string().chars().count())
                .chain([head.columns[c].chars().count(), 3])
                .max()
                .unwrap_or(3)
                .min(30)
        })
        .collect();

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(text, width)| {
                let text: String = text.chars().take(*width).collect();
                format!("{:<width$}", text, width = *width)
            })
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let letters = (1..=head.width()).map(|c| column_to_letter(c as u16)).collect();
    println!("     {}", line(letters));
    println!("     {}", line(head.columns.clone()));
    for (i, row) in head.rows.iter().enumerate() {
        println!("{:>4} {}", i + 1, line(row.iter().map(|c| c.to_string()).collect()));
    }
}

fn run(command: &str, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let load = args.load_options(config.workbook_password.clone())?;

    match command {
        "sheets" => {
            let path = args.positional(0, "file")?;
            let sheets = sheet_names(&fs::read(path)?, path, load.password.as_deref())?;
            for (i, name) in sheets.iter().enumerate() {
                println!("{}: {}", i, name);
            }
        }
        "preview" => {
            let path = args.positional(0, "file")?;
            let rows = match args.option("rows") {
                Some(raw) => raw.parse()?,
                None => DEFAULT_PREVIEW_ROWS,
            };
            let table = read(path, &load)?;
            println!("{}: {}", path, shape_line(table.height(), table.width()));
            print_grid(&table, rows);
        }
        "describe" => {
            let path = args.positional(0, "file")?;
            let summaries = describe(&read(path, &load)?);
            if summaries.is_empty() {
                println!("No numeric columns");
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        "process" => {
            let path = args.positional(0, "file")?;
            let strategy = args.positional(1, "strategy")?;
            let registry = StrategyRegistry::with_defaults(config.load_alignment_map()?.into());
            let result = registry.run(strategy, &read(path, &load)?)?;
            match args.option("output") {
                Some(out) => write(&result, out)?,
                None => print_grid(&result, DEFAULT_PREVIEW_ROWS),
            }
        }
        "align" => {
            let path = args.positional(0, "file")?;
            let map = config.load_alignment_map()?;
            let table = read(path, &load)?;
            let report = map.report(&table);
            for found in &report.found {
                println!("{:<16} <- {}", found.standard, found.input);
            }
            if !report.missing.is_empty() {
                println!("Missing: {}", report.missing.join(", "));
            }

            let default_name = format!(
                "{}.xlsx",
                output_basename(path, &config.output_prefix, chrono::Local::now().date_naive())
            );
            let out = args.option("output").unwrap_or(&default_name);
            write(&map.align(&table), out)?;
        }
        "compare" => {
            let left = read(args.positional(0, "left file")?, &load)?;
            let right = read(args.positional(1, "right file")?, &load)?;
            let comparator = KeyedComparator::new(args.option("key").map(str::to_string));
            let comparison = comparator.compare(&left, &right)?;
            println!(
                "{} added, {} removed, {} changed cells, {} unchanged rows",
                comparison.added.len(),
                comparison.removed.len(),
                comparison.changed.len(),
                comparison.unchanged
            );
            match args.option("output") {
                Some(out) => write(&comparison.to_table(), out)?,
                None => print_grid(&comparison.to_table(), usize::MAX),
            }
        }
        "merge" => {
            let how = args.positional(0, "merge method")?;
            let how = MergeHow::parse(how).ok_or_else(|| format!("Unknown merge method: {}", how))?;
            let tables = args.positional[1..]
                .iter()
                .map(|path| read(path, &load))
                .collect::<Result<Vec<_>, _>>()?;
            let refs: Vec<&Table> = tables.iter().collect();
            let merged = how.merger(args.option("key").map(str::to_string))?.merge(&refs)?;
            match args.option("output") {
                Some(out) => write(&merged, out)?,
                None => print_grid(&merged, DEFAULT_PREVIEW_ROWS),
            }
        }
        "workflows" => {
            for workflow in WorkflowRegistry::with_defaults().list() {
                println!("{:<20} {}", workflow.name(), workflow.description());
                for input in workflow.inputs() {
                    let need = if input.required { "required" } else { "optional" };
                    println!("    {:<12} {:<9} {}", input.role, need, input.description);
                }
            }
        }
        "workflow" => {
            let name = args.positional(0, "workflow name")?;
            let mut inputs = WorkflowInputs::new();
            for pair in &args.positional[1..] {
                let (role, path) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("Expected role=file, got {}", pair))?;
                let filename = Path::new(path)
                    .file_name()
                    .and_then(|f| f.to_str())
                    .unwrap_or(path);
                inputs.insert(role, filename, read(path, &load)?.into());
            }

            let today = chrono::Local::now().date_naive();
            let output = WorkflowRegistry::with_defaults().run(name, &inputs, today)?;
            for metric in &output.metrics {
                println!("{:<24} {}", metric.label, metric.value);
            }
            for warning in &output.warnings {
                println!("Warning: {}", warning);
            }

            let folder = PathBuf::from(args.option("output").unwrap_or("."));
            fs::create_dir_all(&folder)?;
            for named in &output.outputs {
                let path = folder.join(format!("{}.xlsx", named.name));
                write(&named.table, &path.to_string_lossy())?;
            }
        }
        other => return Err(format!("Unknown command: {}\n\n{}", other, USAGE).into()),
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let raw: Vec<String> = env::args().collect();
    if raw.len() < 2 || raw[1] == "help" || raw[1] == "--help" {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    let args = Args::parse(&raw[2..])?;
    run(&raw[1], &args)
}
