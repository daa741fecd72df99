// In-memory stand-ins for the GIS engine, used by unit tests.
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::engine::{DataStore, DocumentHandle, DocumentRenderer, EngineError, EngineResult};
use crate::types::{DocumentKind, FieldDef, OutputType, Row, StatField, Value, Workspace};

pub fn lock_error() -> EngineError {
    EngineError::new(
        Some(464),
        "Cannot get exclusive schema lock. Either being edited or in use by another application.",
    )
}

fn missing(name: &str) -> EngineError {
    EngineError::new(Some(732), format!("Dataset {} does not exist or is not supported", name))
}

fn already_exists(name: &str) -> EngineError {
    EngineError::new(Some(258), format!("Output {} already exists", name))
}

#[derive(Debug, Clone, Default)]
struct FakeTable {
    fields: Vec<String>,
    rows: Vec<Row>,
    filter: Option<String>,
}

impl FakeTable {
    fn new(fields: &[&str], rows: Vec<Row>) -> Self {
        FakeTable {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            rows,
            filter: None,
        }
    }

    fn indices(&self, fields: &[&str]) -> EngineResult<Vec<usize>> {
        fields
            .iter()
            .map(|f| {
                self.fields
                    .iter()
                    .position(|have| have.eq_ignore_ascii_case(f))
                    .ok_or_else(|| EngineError::new(Some(728), format!("Field {} does not exist", f)))
            })
            .collect()
    }
}

/// Workspace tables kept in memory, with call recording and scripted failures.
#[derive(Default)]
pub struct FakeStore {
    tables: RefCell<BTreeMap<String, FakeTable>>,
    statistics_results: HashMap<String, FakeTable>,
    failures: RefCell<HashMap<String, VecDeque<EngineError>>>,
    calls: RefCell<Vec<String>>,
    update_limit: Option<usize>,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore::default()
    }

    pub fn with_table(self, name: &str, fields: &[&str], rows: Vec<Row>) -> Self {
        self.tables
            .borrow_mut()
            .insert(name.to_string(), FakeTable::new(fields, rows));
        self
    }

    /// Table that `statistics` should produce for `output`.
    pub fn with_statistics_result(mut self, output: &str, fields: &[&str], rows: Vec<Row>) -> Self {
        self.statistics_results
            .insert(output.to_string(), FakeTable::new(fields, rows));
        self
    }

    /// Make the update cursor fail after writing `rows` rows.
    pub fn fail_update_after(mut self, rows: usize) -> Self {
        self.update_limit = Some(rows);
        self
    }

    /// Queue an error for the next call of `op`.
    pub fn fail_next(&self, op: &str, err: EngineError) {
        self.failures
            .borrow_mut()
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.borrow().contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.borrow().keys().cloned().collect()
    }

    pub fn layer_filter(&self, name: &str) -> Option<String> {
        self.tables.borrow().get(name).and_then(|t| t.filter.clone())
    }

    /// Rows of `table` projected onto `fields`; panics on unknown names.
    pub fn rows(&self, table: &str, fields: &[&str]) -> Vec<Row> {
        let tables = self.tables.borrow();
        let t = tables.get(table).expect("table exists");
        let idx = t.indices(fields).expect("fields exist");
        t.rows
            .iter()
            .map(|r| idx.iter().map(|i| r[*i].clone()).collect())
            .collect()
    }

    fn record(&self, op: &str, detail: &str) -> EngineResult<()> {
        self.calls.borrow_mut().push(format!("{} {}", op, detail));
        match self.failures.borrow_mut().get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn get(&self, name: &str) -> EngineResult<FakeTable> {
        self.tables
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| missing(name))
    }

    fn put(&self, name: &str, table: FakeTable) {
        self.tables.borrow_mut().insert(name.to_string(), table);
    }

    /// Writes never replace an existing dataset, as with the real engine.
    fn check_free(&self, output: &str) -> EngineResult<()> {
        if self.has_table(output) {
            return Err(already_exists(output));
        }
        Ok(())
    }
}

impl DataStore for FakeStore {
    fn exists(&self, _ws: &Workspace, name: &str) -> EngineResult<bool> {
        self.record("exists", name)?;
        Ok(self.has_table(name))
    }

    fn delete(&self, _ws: &Workspace, name: &str) -> EngineResult<()> {
        self.record("delete", name)?;
        self.tables
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing(name))
    }

    fn intersect(
        &self,
        _ws: &Workspace,
        inputs: &[&str],
        output: &str,
        _output_type: OutputType,
    ) -> EngineResult<()> {
        self.record("intersect", output)?;
        self.check_free(output)?;
        let mut fields = Vec::new();
        for input in inputs {
            for f in self.get(input)?.fields {
                if !fields.contains(&f) {
                    fields.push(f);
                }
            }
        }
        self.put(
            output,
            FakeTable {
                fields,
                ..FakeTable::default()
            },
        );
        Ok(())
    }

    fn copy_features(&self, _ws: &Workspace, source: &str, output: &str) -> EngineResult<()> {
        self.record("copy_features", output)?;
        self.check_free(output)?;
        let mut table = self.get(source)?;
        table.filter = None;
        self.put(output, table);
        Ok(())
    }

    fn make_feature_layer(
        &self,
        _ws: &Workspace,
        source: &str,
        layer: &str,
        where_clause: &str,
    ) -> EngineResult<()> {
        self.record("make_feature_layer", layer)?;
        self.check_free(layer)?;
        let mut table = self.get(source)?;
        table.filter = Some(where_clause.to_string());
        self.put(layer, table);
        Ok(())
    }

    fn statistics(
        &self,
        _ws: &Workspace,
        input: &str,
        output: &str,
        stats: &[StatField],
        case_fields: &[&str],
    ) -> EngineResult<()> {
        self.record("statistics", output)?;
        self.check_free(output)?;
        self.get(input)?;
        let table = self.statistics_results.get(output).cloned().unwrap_or_else(|| {
            let mut fields: Vec<String> = case_fields.iter().map(|f| f.to_string()).collect();
            fields.extend(stats.iter().map(|s| format!("SUM_{}", s.field)));
            FakeTable {
                fields,
                ..FakeTable::default()
            }
        });
        self.put(output, table);
        Ok(())
    }

    fn list_fields(&self, _ws: &Workspace, table: &str) -> EngineResult<Vec<String>> {
        self.record("list_fields", table)?;
        Ok(self.get(table)?.fields)
    }

    fn add_field(&self, _ws: &Workspace, table: &str, field: &FieldDef) -> EngineResult<()> {
        self.record("add_field", &format!("{} {}", table, field.name))?;
        let mut tables = self.tables.borrow_mut();
        let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
        t.fields.push(field.name.to_string());
        for row in t.rows.iter_mut() {
            row.push(Value::Null);
        }
        Ok(())
    }

    fn search_rows(&self, _ws: &Workspace, table: &str, fields: &[&str]) -> EngineResult<Vec<Row>> {
        self.record("search_rows", table)?;
        let t = self.get(table)?;
        let idx = t.indices(fields)?;
        Ok(t.rows
            .iter()
            .map(|r| idx.iter().map(|i| r[*i].clone()).collect())
            .collect())
    }

    fn update_rows(
        &self,
        _ws: &Workspace,
        table: &str,
        fields: &[&str],
        apply: &mut dyn FnMut(&mut Row),
    ) -> EngineResult<usize> {
        self.record("update_rows", table)?;
        let mut tables = self.tables.borrow_mut();
        let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
        let idx = t.indices(fields)?;
        let mut written = 0;
        for row in t.rows.iter_mut() {
            if self.update_limit == Some(written) {
                return Err(EngineError::new(Some(999999), "update cursor failed"));
            }
            let mut projected: Row = idx.iter().map(|i| row[*i].clone()).collect();
            apply(&mut projected);
            for (i, value) in idx.iter().zip(projected) {
                row[*i] = value;
            }
            written += 1;
        }
        Ok(written)
    }

    fn is_lock_contention(&self, err: &EngineError) -> bool {
        err.code == Some(464)
    }
}

/// Renderer that writes a stub PDF for every export.
pub struct FakeRenderer {
    layouts: Vec<String>,
    fail_pattern: Option<String>,
    offline: bool,
    broken_layouts: bool,
    calls: RefCell<Vec<String>>,
    open: RefCell<HashMap<u64, PathBuf>>,
    next_handle: Cell<u64>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        FakeRenderer {
            layouts: vec!["Layout".to_string()],
            fail_pattern: None,
            offline: false,
            broken_layouts: false,
            calls: RefCell::new(Vec::new()),
            open: RefCell::new(HashMap::new()),
            next_handle: Cell::new(1),
        }
    }

    pub fn with_layouts(mut self, layouts: &[&str]) -> Self {
        self.layouts = layouts.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Fail every export whose output path contains `pattern`.
    pub fn fail_exports_matching(mut self, pattern: &str) -> Self {
        self.fail_pattern = Some(pattern.to_string());
        self
    }

    /// Make `layouts` fail for every document.
    pub fn broken_layouts(mut self) -> Self {
        self.broken_layouts = true;
        self
    }

    /// Make `ping` fail as if the engine could not be started.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    pub fn open_documents(&self) -> usize {
        self.open.borrow().len()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn write_pdf(&self, output: &Path) -> EngineResult<()> {
        if let Some(pattern) = &self.fail_pattern {
            if output.to_string_lossy().contains(pattern.as_str()) {
                return Err(EngineError::new(None, "PDF export failed"));
            }
        }
        std::fs::write(output, b"%PDF-1.4\n%%EOF\n").map_err(|e| EngineError::new(None, e.to_string()))
    }
}

impl DocumentRenderer for FakeRenderer {
    fn open(&self, path: &Path, kind: DocumentKind) -> EngineResult<DocumentHandle> {
        self.record(format!("open {}", kind.extension()));
        let id = self.next_handle.get();
        self.next_handle.set(id + 1);
        self.open.borrow_mut().insert(id, path.to_path_buf());
        Ok(DocumentHandle(id))
    }

    fn layouts(&self, _doc: DocumentHandle) -> EngineResult<Vec<String>> {
        self.record("layouts".to_string());
        if self.broken_layouts {
            return Err(EngineError::new(None, "document is corrupt"));
        }
        Ok(self.layouts.clone())
    }

    fn export_document(&self, _doc: DocumentHandle, output: &Path, resolution: u32) -> EngineResult<()> {
        self.record(format!("export_document {}", resolution));
        self.write_pdf(output)
    }

    fn export_layout(
        &self,
        _doc: DocumentHandle,
        layout: &str,
        output: &Path,
        resolution: u32,
    ) -> EngineResult<()> {
        self.record(format!("export_layout {} {}", layout, resolution));
        self.write_pdf(output)
    }

    fn close(&self, doc: DocumentHandle) -> EngineResult<()> {
        self.record("close".to_string());
        self.open.borrow_mut().remove(&doc.0);
        Ok(())
    }

    fn ping(&self) -> EngineResult<String> {
        if self.offline {
            return Err(EngineError::new(None, "engine bridge: cannot start gis-engine"));
        }
        Ok("fake-engine 1.0".to_string())
    }
}
