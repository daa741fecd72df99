use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::error::{Error, Result};

/// A validated site identifier, always in its configured spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Substation(String);

impl Substation {
    /// Resolve `name` against the allow-list, ignoring case and surrounding
    /// whitespace on both sides.
    pub fn resolve(name: &str, allowed: &[String]) -> Result<Substation> {
        let wanted = name.trim();
        allowed
            .iter()
            .map(|s| s.trim())
            .find(|s| s.eq_ignore_ascii_case(wanted))
            .map(|s| Substation(s.to_string()))
            .ok_or_else(|| {
                let mut valid: Vec<String> = allowed.iter().map(|s| s.trim().to_string()).collect();
                valid.sort();
                Error::InvalidSubstation {
                    name: name.to_string(),
                    valid,
                }
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Substation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four layout templates rendered for every site and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayoutType {
    Internal,
    External,
    InternalOverview,
    ExternalOverview,
}

impl LayoutType {
    /// Render order; a failure stops the sequence.
    pub const ALL: [LayoutType; 4] = [
        LayoutType::Internal,
        LayoutType::External,
        LayoutType::InternalOverview,
        LayoutType::ExternalOverview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutType::Internal => "Internal",
            LayoutType::External => "External",
            LayoutType::InternalOverview => "InternalOverview",
            LayoutType::ExternalOverview => "ExternalOverview",
        }
    }
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two map document formats the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Legacy desktop map document (`.mxd`)
    Mxd,
    /// Project file (`.aprx`)
    Aprx,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Mxd, DocumentKind::Aprx];

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Mxd => "mxd",
            DocumentKind::Aprx => "aprx",
        }
    }

    /// Classify a path by extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<DocumentKind> {
        let ext = path.extension()?.to_str()?;
        DocumentKind::ALL
            .into_iter()
            .find(|k| k.extension().eq_ignore_ascii_case(ext))
    }
}

/// Data-store location holding the base layers and per-site tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Workspace { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn ensure_exists(&self) -> Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(Error::MissingWorkspace(self.path.clone()))
        }
    }

    /// Directory that holds the `MXD/{year}` template tree.
    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// A single cell value as exchanged with the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Text rendering used for key concatenation; `Null` renders as `None`
    /// to keep the keys of incomplete rows recognisable.
    pub fn to_text(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Null => "None".to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

/// One cursor row; values follow the field order requested from the cursor.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Text,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatKind {
    Sum,
}

/// `(field, statistic)` pair; the engine names the output column `SUM_{field}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatField {
    pub field: &'static str,
    pub stat: StatKind,
}

impl StatField {
    pub fn sum(field: &'static str) -> Self {
        StatField {
            field,
            stat: StatKind::Sum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputType {
    Point,
}

/// One line of the batch processing ledger.
#[derive(Debug, Serialize, Tabled, Clone)]
pub struct LedgerRow {
    #[serde(rename = "Input File")]
    #[tabled(rename = "Input File")]
    pub input_file: String,
    #[serde(rename = "Output File")]
    #[tabled(rename = "Output File")]
    pub output_file: String,
    #[serde(rename = "Status")]
    #[tabled(rename = "Status")]
    pub status: String,
    #[serde(rename = "Processing Time (s)")]
    #[tabled(rename = "Processing Time (s)")]
    pub processing_time: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerSummary {
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_seconds: f64,
}

/// JSON record written after a successful map run.
#[derive(Debug, Serialize)]
pub struct MapRunSummary {
    pub substation: String,
    pub year: String,
    pub circuits: Vec<String>,
    pub expression: String,
    pub outputs: Vec<PathBuf>,
    pub finished_at: chrono::DateTime<chrono::Local>,
}
