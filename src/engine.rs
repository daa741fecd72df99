// Adapter seams for the external GIS engine.
//
// The engine does every real unit of work (intersection, statistics, page
// rendering). The pipeline only sequences calls through these two traits, and
// every call names its workspace explicitly instead of relying on engine-wide
// environment settings.
use serde::Deserialize;
use std::path::Path;

use crate::types::{DocumentKind, FieldDef, OutputType, Row, StatField, Workspace};

/// Error reported by the engine for a single call.
#[derive(Debug, Clone, PartialEq, Deserialize, thiserror::Error)]
#[error("{}{message}", code_prefix(.code))]
pub struct EngineError {
    /// Vendor error number, when the engine supplied one.
    pub code: Option<u32>,
    pub message: String,
}

impl EngineError {
    pub fn new(code: Option<u32>, message: impl Into<String>) -> Self {
        EngineError {
            code,
            message: message.into(),
        }
    }
}

/// `ERROR 000464: ` style prefix for numbered errors.
fn code_prefix(code: &Option<u32>) -> String {
    code.map(|c| format!("ERROR {:06}: ", c)).unwrap_or_default()
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Tabular/spatial primitives over named tables in a workspace.
pub trait DataStore {
    fn exists(&self, ws: &Workspace, name: &str) -> EngineResult<bool>;

    fn delete(&self, ws: &Workspace, name: &str) -> EngineResult<()>;

    /// Spatial intersection of `inputs` into `output`.
    fn intersect(
        &self,
        ws: &Workspace,
        inputs: &[&str],
        output: &str,
        output_type: OutputType,
    ) -> EngineResult<()>;

    fn copy_features(&self, ws: &Workspace, source: &str, output: &str) -> EngineResult<()>;

    /// Create a filtered, in-memory view named `layer` over `source`.
    fn make_feature_layer(
        &self,
        ws: &Workspace,
        source: &str,
        layer: &str,
        where_clause: &str,
    ) -> EngineResult<()>;

    /// Aggregate `stats` over `input`, grouped by `case_fields`, into table `output`.
    fn statistics(
        &self,
        ws: &Workspace,
        input: &str,
        output: &str,
        stats: &[StatField],
        case_fields: &[&str],
    ) -> EngineResult<()>;

    fn list_fields(&self, ws: &Workspace, table: &str) -> EngineResult<Vec<String>>;

    fn add_field(&self, ws: &Workspace, table: &str, field: &FieldDef) -> EngineResult<()>;

    /// Read every row of `table`, projected onto `fields`.
    fn search_rows(&self, ws: &Workspace, table: &str, fields: &[&str]) -> EngineResult<Vec<Row>>;

    /// Walk `table` with an update cursor, writing back each row `apply`
    /// changed. Each row write is atomic; the scan as a whole is not, so an
    /// error part-way leaves earlier rows updated. Returns rows written.
    fn update_rows(
        &self,
        ws: &Workspace,
        table: &str,
        fields: &[&str],
        apply: &mut dyn FnMut(&mut Row),
    ) -> EngineResult<usize>;

    /// Whether `err` means another process holds a lock on the data.
    fn is_lock_contention(&self, err: &EngineError) -> bool;
}

/// Opaque handle to a document opened by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct DocumentHandle(pub u64);

/// Opens map documents and exports them to PDF.
pub trait DocumentRenderer {
    fn open(&self, path: &Path, kind: DocumentKind) -> EngineResult<DocumentHandle>;

    /// Layout names in document order.
    fn layouts(&self, doc: DocumentHandle) -> EngineResult<Vec<String>>;

    /// Export the document's page (legacy documents).
    fn export_document(&self, doc: DocumentHandle, output: &Path, resolution: u32)
        -> EngineResult<()>;

    /// Export one named layout (project documents).
    fn export_layout(
        &self,
        doc: DocumentHandle,
        layout: &str,
        output: &Path,
        resolution: u32,
    ) -> EngineResult<()>;

    fn close(&self, doc: DocumentHandle) -> EngineResult<()>;

    /// Engine version string; used by `verify`.
    fn ping(&self) -> EngineResult<String>;
}
