use rust_xlsxwriter::Workbook;
use std::path::Path;
use std::process::{Command, Output};
use worklist::cell::CellValue;
use worklist::loader::{LoadOptions, load_table};

fn cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_worklist-cli"))
        .args(args)
        .env("RUST_LOG", "error")
        .env_remove("WORKLIST_WORKBOOK_PASSWORD")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_workbook(path: &Path, headers: &[&str], rows: &[&[&str]]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (c, name) in headers.iter().enumerate() {
        sheet.write_string(0, c as u16, *name).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            sheet.write_string(r as u32 + 1, c as u16, *value).unwrap();
        }
    }
    workbook.save(path).unwrap();
}

#[test]
fn preview_prints_shape_and_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.xlsx");
    write_workbook(&path, &["id", "name"], &[&["1", "Ana"], &["2", "Ben"], &["2", "Ben"]]);

    let output = cli(&["preview", path.to_str().unwrap()]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("3 rows, 2 columns"));
    assert!(text.contains("Ana"));
}

#[test]
fn process_writes_the_result_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("data.xlsx");
    let out = dir.path().join("deduped.csv");
    write_workbook(&input, &["id", "name"], &[&["1", "Ana"], &["2", "Ben"], &["2", "Ben"]]);

    let output = cli(&[
        "process",
        input.to_str().unwrap(),
        "dedupe",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let bytes = std::fs::read(&out).unwrap();
    let table = load_table(&bytes, "deduped.csv", &LoadOptions::default()).unwrap();
    assert_eq!(table.height(), 2);
    assert_eq!(table.rows[1][1], CellValue::from("Ben"));
}

#[test]
fn workflow_writes_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let tad = dir.path().join("TAD_SPM M1.xlsx");
    let endorsement = dir.path().join("M1 AUTO SPM.xlsx");
    let folder = dir.path().join("out");
    write_workbook(&tad, &["LAN", "PAST DUE"], &[&["1001", "1500"], &["1002", "0"]]);
    write_workbook(&endorsement, &["ACCTNUM", "NAME_ALS"], &[&["1001", "ANA CRUZ"]]);

    let output = cli(&["workflows"]);
    assert!(output.status.success());
    let listing = stdout(&output);
    for name in ["daily-tad", "new-endorsement", "weekly-endorsement"] {
        assert!(listing.contains(name));
    }

    let output = cli(&[
        "workflow",
        "new-endorsement",
        &format!("tad={}", tad.display()),
        &format!("endorsement={}", endorsement.display()),
        "-o",
        folder.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Warning: No masterlist uploaded"));
    assert!(folder.join("merged_TAD_ENDORSEMENT.xlsx").exists());
    assert!(folder.join("TAD_Aligned_Template.xlsx").exists());
}

#[test]
fn unknown_command_fails() {
    let output = cli(&["transmogrify"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown command: transmogrify"));
}
