// Batch ledger: one entry per processed document, exported as CSV and
// summarised for the console.
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::output::write_csv;
use crate::types::{LedgerRow, LedgerSummary};
use crate::util::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    input: PathBuf,
    output: PathBuf,
    status: Status,
    elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct RunLedger {
    entries: Vec<Entry>,
}

impl RunLedger {
    pub fn new() -> Self {
        RunLedger::default()
    }

    pub fn add_entry(&mut self, input: &Path, output: &Path, status: Status, elapsed: Duration) {
        self.entries.push(Entry {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            status,
            elapsed,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == Status::Failed)
            .count()
    }

    pub fn rows(&self) -> Vec<LedgerRow> {
        self.entries
            .iter()
            .map(|e| LedgerRow {
                input_file: e.input.display().to_string(),
                output_file: e.output.display().to_string(),
                status: e.status.as_str().to_string(),
                processing_time: format_number(e.elapsed.as_secs_f64(), 2),
            })
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let failed = self.failures();
        LedgerSummary {
            total_files: self.entries.len(),
            succeeded: self.entries.len() - failed,
            failed,
            total_seconds: self.entries.iter().map(|e| e.elapsed.as_secs_f64()).sum(),
        }
    }

    pub fn export_csv(&self, path: &Path) -> Result<()> {
        write_csv(path, &self.rows())?;
        log::info!("Exported summary table to: {}", path.display());
        Ok(())
    }
}
