use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrelError};

/// Delimiter/quoting/header settings for CSV reads and appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CsvDialect {
    pub delimiter: char,
    pub quote: char,
    pub header: bool,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            header: true,
        }
    }
}

impl CsvDialect {
    /// Byte forms of delimiter and quote, as the arrow/csv readers expect them.
    pub fn as_bytes(&self) -> Result<(u8, u8)> {
        Ok((ascii_byte("delimiter", self.delimiter)?, ascii_byte("quote", self.quote)?))
    }
}

fn ascii_byte(what: &str, c: char) -> Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(TrelError::InvalidConfig(format!(
            "csv {what} must be a single ASCII character, got {c:?}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    /// Dialect used by `read_csv` and by appends to new CSV files.
    pub csv: CsvDialect,
    /// Suffix appended to a CSV file name to locate its metadata sidecar.
    pub sidecar_suffix: String,
    /// Prefix of temporary files created next to a target during atomic replace.
    pub temp_prefix: String,
    /// Records sampled when inferring CSV/JSON schemas. `None` reads the whole file.
    pub schema_infer_max_records: Option<usize>,
    /// Suffix given to right-side duplicates when a join allows collisions.
    pub default_join_suffix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            csv: CsvDialect::default(),
            sidecar_suffix: ".trel.json".to_string(),
            temp_prefix: ".trel-tmp-".to_string(),
            schema_infer_max_records: Some(1000),
            default_join_suffix: "_right".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: SessionConfig =
            serde_json::from_str(&s).map_err(|e| TrelError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.csv.as_bytes()?;
        if self.sidecar_suffix.is_empty() {
            return Err(TrelError::InvalidConfig(
                "sidecar_suffix cannot be empty".to_string(),
            ));
        }
        if self.default_join_suffix.is_empty() {
            return Err(TrelError::InvalidConfig(
                "default_join_suffix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_path(prefix: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}_{nanos}.json"))
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let path = unique_path("trel_cfg_partial");
        fs::write(&path, r#"{"csv": {"delimiter": ";"}, "schema_infer_max_records": null}"#)
            .expect("write cfg");
        let cfg = SessionConfig::load_from_json(&path).expect("load");
        assert_eq!(cfg.csv.delimiter, ';');
        assert_eq!(cfg.csv.quote, '"');
        assert!(cfg.csv.header);
        assert_eq!(cfg.schema_infer_max_records, None);
        assert_eq!(cfg.sidecar_suffix, ".trel.json");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn unknown_fields_and_bad_delimiters_are_rejected() {
        let path = unique_path("trel_cfg_bad");
        fs::write(&path, r#"{"spill_dir": "/tmp"}"#).expect("write cfg");
        let err = SessionConfig::load_from_json(&path).expect_err("unknown field");
        assert!(matches!(err, TrelError::InvalidConfig(_)), "err={err}");

        fs::write(&path, r#"{"csv": {"delimiter": "é"}}"#).expect("write cfg");
        let err = SessionConfig::load_from_json(&path).expect_err("non-ascii delimiter");
        assert!(err.to_string().contains("single ASCII"), "err={err}");
        let _ = fs::remove_file(path);
    }
}
