// Process bridge to the external GIS engine.
//
// The engine runs as a child process that reads one JSON request per line on
// stdin and answers with one JSON response per line on stdout:
//
//   -> {"id":1,"op":"exists","params":{"workspace":"...","name":"XFMR_MCD"}}
//   <- {"ok":true,"result":true}
//   <- {"ok":false,"code":464,"message":"Cannot get exclusive schema lock"}
//
// The child is started on first use and restarted after a transport failure.
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use crate::config::EngineConfig;
use crate::engine::{DataStore, DocumentHandle, DocumentRenderer, EngineError, EngineResult};
use crate::types::{DocumentKind, FieldDef, OutputType, Row, StatField, Workspace};

/// Engine error numbers seen often enough to name in the log.
static KNOWN_CODES: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (258, "output already exists"),
        (358, "invalid expression"),
        (464, "cannot get exclusive schema lock"),
        (728, "field does not exist"),
        (732, "dataset does not exist"),
    ])
});

pub fn describe_code(code: u32) -> Option<&'static str> {
    KNOWN_CODES.get(&code).copied()
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CursorRow {
    oid: i64,
    values: Row,
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl Session {
    fn spawn(config: &EngineConfig) -> EngineResult<Session> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| transport(format!("spawn engine `{}` failed: {}", config.program, e)))?;
        let stdin = child.stdin.take().ok_or_else(|| transport("engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| transport("engine stdout unavailable"))?;
        debug!("Started engine process {} (pid {})", config.program, child.id());
        Ok(Session {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    fn exchange(&mut self, op: &str, params: serde_json::Value) -> EngineResult<Response> {
        let id = self.next_id;
        self.next_id += 1;
        let request = json!({ "id": id, "op": op, "params": params });
        let line = serde_json::to_string(&request).map_err(|e| transport(e.to_string()))?;
        writeln!(self.stdin, "{}", line).map_err(|e| transport(format!("write failed: {}", e)))?;
        self.stdin
            .flush()
            .map_err(|e| transport(format!("flush failed: {}", e)))?;

        let mut reply = String::new();
        let n = self
            .stdout
            .read_line(&mut reply)
            .map_err(|e| transport(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(transport("engine process closed its output"));
        }
        serde_json::from_str(reply.trim())
            .map_err(|e| transport(format!("malformed response to {}: {}", op, e)))
    }

    fn stop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to stop engine process: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

fn transport(message: impl Into<String>) -> EngineError {
    EngineError::new(None, format!("engine bridge: {}", message.into()))
}

/// `DataStore` and `DocumentRenderer` backed by an engine child process.
pub struct EngineBridge {
    config: EngineConfig,
    session: Mutex<Option<Session>>,
}

impl EngineBridge {
    pub fn new(config: EngineConfig) -> Self {
        EngineBridge {
            config,
            session: Mutex::new(None),
        }
    }

    fn request(&self, op: &str, params: serde_json::Value) -> EngineResult<serde_json::Value> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| transport("session lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(Session::spawn(&self.config)?);
        }
        let session = guard.as_mut().ok_or_else(|| transport("no session"))?;

        let response = match session.exchange(op, params) {
            Ok(response) => response,
            Err(e) => {
                // The stream may be out of step now; start over next time.
                session.stop();
                *guard = None;
                return Err(e);
            }
        };
        if response.ok {
            return Ok(response.result);
        }
        let err = EngineError::new(response.code, response.message);
        match err.code.and_then(describe_code) {
            Some(hint) => debug!("{} failed ({}): {}", op, hint, err),
            None => debug!("{} failed: {}", op, err),
        }
        Err(err)
    }

    fn call<T: DeserializeOwned>(&self, op: &str, params: serde_json::Value) -> EngineResult<T> {
        let result = self.request(op, params)?;
        serde_json::from_value(result)
            .map_err(|e| transport(format!("unexpected result for {}: {}", op, e)))
    }

    fn call_unit(&self, op: &str, params: serde_json::Value) -> EngineResult<()> {
        self.request(op, params).map(|_| ())
    }
}

impl Drop for EngineBridge {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.session.lock() {
            if let Some(mut session) = guard.take() {
                session.stop();
            }
        }
    }
}

impl DataStore for EngineBridge {
    fn exists(&self, ws: &Workspace, name: &str) -> EngineResult<bool> {
        self.call("exists", json!({ "workspace": ws.path().to_string_lossy(), "name": name }))
    }

    fn delete(&self, ws: &Workspace, name: &str) -> EngineResult<()> {
        self.call_unit("delete", json!({ "workspace": ws.path().to_string_lossy(), "name": name }))
    }

    fn intersect(
        &self,
        ws: &Workspace,
        inputs: &[&str],
        output: &str,
        output_type: OutputType,
    ) -> EngineResult<()> {
        self.call_unit(
            "intersect",
            json!({
                "workspace": ws.path().to_string_lossy(),
                "inputs": inputs,
                "output": output,
                "output_type": output_type,
            }),
        )
    }

    fn copy_features(&self, ws: &Workspace, source: &str, output: &str) -> EngineResult<()> {
        self.call_unit(
            "copy_features",
            json!({ "workspace": ws.path().to_string_lossy(), "source": source, "output": output }),
        )
    }

    fn make_feature_layer(
        &self,
        ws: &Workspace,
        source: &str,
        layer: &str,
        where_clause: &str,
    ) -> EngineResult<()> {
        self.call_unit(
            "make_feature_layer",
            json!({
                "workspace": ws.path().to_string_lossy(),
                "source": source,
                "layer": layer,
                "where": where_clause,
            }),
        )
    }

    fn statistics(
        &self,
        ws: &Workspace,
        input: &str,
        output: &str,
        stats: &[StatField],
        case_fields: &[&str],
    ) -> EngineResult<()> {
        self.call_unit(
            "statistics",
            json!({
                "workspace": ws.path().to_string_lossy(),
                "input": input,
                "output": output,
                "stats": stats,
                "case_fields": case_fields,
            }),
        )
    }

    fn list_fields(&self, ws: &Workspace, table: &str) -> EngineResult<Vec<String>> {
        self.call("list_fields", json!({ "workspace": ws.path().to_string_lossy(), "table": table }))
    }

    fn add_field(&self, ws: &Workspace, table: &str, field: &FieldDef) -> EngineResult<()> {
        self.call_unit(
            "add_field",
            json!({ "workspace": ws.path().to_string_lossy(), "table": table, "field": field }),
        )
    }

    fn search_rows(&self, ws: &Workspace, table: &str, fields: &[&str]) -> EngineResult<Vec<Row>> {
        let rows: Vec<CursorRow> = self.call(
            "search",
            json!({ "workspace": ws.path().to_string_lossy(), "table": table, "fields": fields }),
        )?;
        Ok(rows.into_iter().map(|r| r.values).collect())
    }

    fn update_rows(
        &self,
        ws: &Workspace,
        table: &str,
        fields: &[&str],
        apply: &mut dyn FnMut(&mut Row),
    ) -> EngineResult<usize> {
        let rows: Vec<CursorRow> = self.call(
            "search",
            json!({ "workspace": ws.path().to_string_lossy(), "table": table, "fields": fields }),
        )?;
        let mut written = 0;
        for mut row in rows {
            apply(&mut row.values);
            self.call_unit(
                "update_row",
                json!({
                    "workspace": ws.path().to_string_lossy(),
                    "table": table,
                    "fields": fields,
                    "oid": row.oid,
                    "values": row.values,
                }),
            )?;
            written += 1;
        }
        Ok(written)
    }

    fn is_lock_contention(&self, err: &EngineError) -> bool {
        err.code
            .map(|c| self.config.lock_error_codes.contains(&c))
            .unwrap_or(false)
    }
}

impl DocumentRenderer for EngineBridge {
    fn open(&self, path: &Path, kind: DocumentKind) -> EngineResult<DocumentHandle> {
        self.call("open", json!({ "path": path.to_string_lossy(), "kind": kind }))
    }

    fn layouts(&self, doc: DocumentHandle) -> EngineResult<Vec<String>> {
        self.call("layouts", json!({ "doc": doc.0 }))
    }

    fn export_document(&self, doc: DocumentHandle, output: &Path, resolution: u32) -> EngineResult<()> {
        self.call_unit(
            "export_document",
            json!({ "doc": doc.0, "output": output.to_string_lossy(), "resolution": resolution }),
        )
    }

    fn export_layout(
        &self,
        doc: DocumentHandle,
        layout: &str,
        output: &Path,
        resolution: u32,
    ) -> EngineResult<()> {
        self.call_unit(
            "export_layout",
            json!({
                "doc": doc.0,
                "layout": layout,
                "output": output.to_string_lossy(),
                "resolution": resolution,
            }),
        )
    }

    fn close(&self, doc: DocumentHandle) -> EngineResult<()> {
        self.call_unit("close", json!({ "doc": doc.0 }))
    }

    fn ping(&self) -> EngineResult<String> {
        self.call("ping", json!({}))
    }
}
