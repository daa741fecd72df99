// Single-file export: one map document in, one PDF out.
//
// Documents are a closed set of two kinds. Each kind opens through the
// renderer, exports in its own way, and is always closed afterwards whether
// or not the export worked.
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use crate::engine::{DocumentHandle, DocumentRenderer};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::reports::{RunLedger, Status};
use crate::types::DocumentKind;

/// An open map document.
#[derive(Debug)]
pub enum MapDocument {
    /// Legacy map document; exports its single page directly.
    Mxd { path: PathBuf, handle: DocumentHandle },
    /// Project document; exports through its first layout.
    Aprx {
        path: PathBuf,
        handle: DocumentHandle,
        layout: Option<String>,
    },
}

impl MapDocument {
    pub fn open<R>(renderer: &R, path: &Path, kind: DocumentKind) -> Result<MapDocument>
    where
        R: DocumentRenderer + ?Sized,
    {
        let handle = renderer.open(path, kind).map_err(|e| {
            error!("Failed to open {} file: {}", kind.extension().to_uppercase(), e);
            e
        })?;
        let doc = match kind {
            DocumentKind::Mxd => MapDocument::Mxd {
                path: path.to_path_buf(),
                handle,
            },
            DocumentKind::Aprx => {
                // Layouts are looked up eagerly so a missing one is reported at
                // export time, after the document is known to be openable.
                let layout = match renderer.layouts(handle) {
                    Ok(layouts) => layouts.into_iter().next(),
                    Err(e) => {
                        if let Err(close_err) = renderer.close(handle) {
                            warn!("Failed to close {}: {}", path.display(), close_err);
                        }
                        return Err(e.into());
                    }
                };
                MapDocument::Aprx {
                    path: path.to_path_buf(),
                    handle,
                    layout,
                }
            }
        };
        info!("Opened {} file: {}", kind.extension().to_uppercase(), path.display());
        Ok(doc)
    }

    pub fn path(&self) -> &Path {
        match self {
            MapDocument::Mxd { path, .. } | MapDocument::Aprx { path, .. } => path,
        }
    }

    fn handle(&self) -> DocumentHandle {
        match self {
            MapDocument::Mxd { handle, .. } | MapDocument::Aprx { handle, .. } => *handle,
        }
    }

    pub fn export_pdf<R>(&self, renderer: &R, output: &Path, resolution: u32) -> Result<()>
    where
        R: DocumentRenderer + ?Sized,
    {
        let result = match self {
            MapDocument::Mxd { handle, .. } => renderer
                .export_document(*handle, output, resolution)
                .map_err(Error::from),
            MapDocument::Aprx {
                path,
                handle,
                layout,
            } => match layout {
                Some(layout) => renderer
                    .export_layout(*handle, layout, output, resolution)
                    .map_err(Error::from),
                None => Err(Error::NoLayout(path.clone())),
            },
        };
        match &result {
            Ok(()) => info!("Exported PDF to: {}", output.display()),
            Err(e) => error!("Failed to export PDF: {}", e),
        }
        result
    }

    /// Release the document. Errors are logged; there is nothing to undo.
    pub fn close<R>(self, renderer: &R)
    where
        R: DocumentRenderer + ?Sized,
    {
        match renderer.close(self.handle()) {
            Ok(()) => debug!("Closed {}", self.path().display()),
            Err(e) => warn!("Failed to close {}: {}", self.path().display(), e),
        }
    }
}

/// Exports individual map documents to PDF.
pub struct FileProcessor<'a, R: DocumentRenderer + ?Sized> {
    renderer: &'a R,
}

impl<'a, R: DocumentRenderer + ?Sized> FileProcessor<'a, R> {
    pub fn new(renderer: &'a R) -> Self {
        FileProcessor { renderer }
    }

    /// True if `path` exists and is a supported document kind.
    pub fn validate_file(&self, path: &Path) -> bool {
        path.exists() && DocumentKind::from_path(path).is_some()
    }

    /// Export `input` to `output` at `resolution` DPI.
    pub fn process_file(&self, input: &Path, output: &Path, resolution: u32) -> Result<PathBuf> {
        let kind = match DocumentKind::from_path(input) {
            Some(kind) if input.exists() => kind,
            _ => {
                error!("Invalid file: {}", input.display());
                return Err(Error::InvalidFile(input.to_path_buf()));
            }
        };

        let doc = MapDocument::open(self.renderer, input, kind).map_err(|e| {
            error!("Error processing file {}: {}", input.display(), e);
            e
        })?;
        let exported = doc.export_pdf(self.renderer, output, resolution);
        doc.close(self.renderer);
        exported?;
        Ok(output.to_path_buf())
    }

    /// Export every supported document directly inside `input_dir` to
    /// `{output_dir}/{stem}.pdf`. Individual failures are recorded in the
    /// ledger and do not stop the batch.
    pub fn process_batch(&self, input_dir: &Path, output_dir: &Path, resolution: u32) -> Result<RunLedger> {
        std::fs::metadata(input_dir)?;
        std::fs::create_dir_all(output_dir)?;

        let inputs: Vec<PathBuf> = WalkDir::new(input_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                let supported = self.validate_file(path);
                if !supported {
                    debug!("Skipping unsupported file {}", path.display());
                }
                supported
            })
            .collect();

        info!("Processing {} documents from {}", inputs.len(), input_dir.display());
        let mut progress = ProgressTracker::new(inputs.len(), "Batch export");
        let mut ledger = RunLedger::new();
        for input in &inputs {
            let stem = input.file_stem().unwrap_or_default().to_string_lossy();
            let output = output_dir.join(format!("{}.pdf", stem));
            let started = Instant::now();
            let status = match self.process_file(input, &output, resolution) {
                Ok(_) => Status::Success,
                Err(_) => Status::Failed,
            };
            info!("Processed {}: {:?}", input.display(), status);
            ledger.add_entry(input, &output, status, started.elapsed());
            progress.update(&stem);
        }
        progress.complete(&format!("{} of {} succeeded", ledger.len() - ledger.failures(), ledger.len()));
        Ok(ledger)
    }
}
