//! Runtime settings read from the environment (and a `.env` file, if present).

use crate::alignment::AlignmentMap;
use crate::error::Result;
use crate::preview::DEFAULT_PREVIEW_ROWS;
use log::{info, warn};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
/// 200 MB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;
const DEFAULT_SESSION_TTL: u64 = 24 * 60 * 60; // 24 hours in seconds
pub const DEFAULT_OUTPUT_PREFIX: &str = "AUTOCURING";

/// Server and processing settings
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Address the web server listens on
    pub bind: String,
    /// Rows shown in a preview
    pub preview_rows: usize,
    /// Largest request body accepted, in bytes
    pub max_upload_bytes: usize,
    /// Idle time after which a session and its uploads are dropped
    pub session_ttl: Duration,
    /// When set, the UI asks for this password first
    pub password: Option<String>,
    /// JSON file replacing the built-in alignment map
    pub alignment_map: Option<PathBuf>,
    /// Prefix of aligned output file names
    pub output_prefix: String,
    /// Tried on password-protected workbook uploads
    pub workbook_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: DEFAULT_BIND.to_string(),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL),
            password: None,
            alignment_map: None,
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            workbook_password: None,
        }
    }
}

impl Config {
    /// Read `WORKLIST_*` variables, loading `.env` first
    ///
    /// # Examples
    /// ```
    /// use worklist::config::Config;
    ///
    /// let config = Config::from_env();
    /// assert!(config.preview_rows > 0);
    /// ```
    pub fn from_env() -> Config {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset or blank keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        Config {
            bind: get("WORKLIST_BIND").unwrap_or(defaults.bind),
            preview_rows: parse_or("WORKLIST_PREVIEW_ROWS", get("WORKLIST_PREVIEW_ROWS"), defaults.preview_rows),
            max_upload_bytes: parse_or(
                "WORKLIST_MAX_UPLOAD_BYTES",
                get("WORKLIST_MAX_UPLOAD_BYTES"),
                defaults.max_upload_bytes,
            ),
            session_ttl: Duration::from_secs(parse_or(
                "WORKLIST_SESSION_TTL_SECS",
                get("WORKLIST_SESSION_TTL_SECS"),
                DEFAULT_SESSION_TTL,
            )),
            password: get("WORKLIST_PASSWORD"),
            alignment_map: get("WORKLIST_ALIGNMENT_MAP").map(PathBuf::from),
            output_prefix: get("WORKLIST_OUTPUT_PREFIX").unwrap_or(defaults.output_prefix),
            workbook_password: get("WORKLIST_WORKBOOK_PASSWORD"),
        }
    }

    /// The alignment map from `alignment_map`, or the built-in one
    pub fn load_alignment_map(&self) -> Result<AlignmentMap> {
        match &self.alignment_map {
            Some(path) => {
                info!("Loading alignment map from {}", path.display());
                AlignmentMap::load(path)
            }
            None => Ok(AlignmentMap::default()),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{}={:?} is not valid, using {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}
