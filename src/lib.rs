/*!
# Worklist Helper

A browser-based utility for spreadsheet worklists, built in Rust.

## Overview

Users upload Excel or CSV files, see their shape, first rows and summary
statistics, run a processing strategy over them, compare two files or merge
several, run the endorsement and daily TAD workflows, and download the
results as XLSX or CSV. Every browser session keeps
its own uploads; nothing is written to disk.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, plain JavaScript
- A single upload page talking to the JSON API, plus an optional login page

### Backend Layer
- **Technologies**: Rust, axum, calamine, rust_xlsxwriter
- **Core Components**:
  - Loader - Parses `.xlsx`/`.xls`/`.xlsb`/`.ods`/`.csv` bytes into a typed table
  - Strategies - Named processors, a keyed comparator and two mergers
  - Alignment - Maps varying column names onto a standard header list
  - Workflows - Multi-file endorsement and daily update jobs with several outputs
  - Downloader - Writes tables back to XLSX or CSV
  - Sessions - Per-browser upload storage with idle expiry

## Modules

- **cell**: Typed cell values and Excel date serial conversion
- **table**: In-memory table of named columns and rows
- **loader**: Upload parsing (format detection, sheet selection, header row)
- **downloader**: Export to CSV and XLSX
- **stats**: Descriptive statistics and value counts
- **preview**: Shape, first rows and statistics of a table
- **alignment**: Header alignment map, report and output naming
- **processing**: `Processor` trait and the strategy registry
- **compare**: `Comparator` trait and keyed/positional differences
- **merge**: `Merger` trait, left join and concatenation
- **workflow**: `Workflow` trait, registry, upload template and date rules
- **endorsement**: New and weekly endorsement workflows
- **daily**: Daily TAD update workflow, filename rules and amount cleaning
- **config**: Environment configuration
- **error**: Shared error type
- **session**, **auth**, **chart**, **app**: Web layer (feature `web`)

## REST API Endpoints

- `POST /api/upload` - Upload one or more files into named slots
- `GET /api/preview` - Preview an upload or the current result
- `POST /api/process` - Run a strategy over an upload
- `POST /api/compare`, `POST /api/merge` - Combine uploads
- `GET /api/download` - Download an upload or the result
- `GET /api/chart` - Bar chart of a column's value counts
- `GET /api/workflows`, `POST /api/workflow` - List and run multi-file workflows
*/

pub mod alignment;
pub mod cell;
pub mod compare;
pub mod config;
pub mod daily;
pub mod downloader;
pub mod endorsement;
pub mod error;
pub mod loader;
pub mod merge;
pub mod preview;
pub mod processing;
pub mod stats;
pub mod table;
pub mod workflow;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod auth;
#[cfg(feature = "web")]
pub mod chart;
#[cfg(feature = "web")]
pub mod session;

pub use cell::CellValue;
pub use error::{Result, SheetError};
pub use table::Table;
