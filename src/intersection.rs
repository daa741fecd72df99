// Intersection stage.
//
// Intersects the transformer points with the municipal boundary (MCD) layer and
// materializes a copy of the primary conductor layer, both under fixed names in
// the workspace. Outputs from an earlier run are deleted before they are
// recreated, so repeated runs converge on the same set of layers. Lock
// contention reported by the store restarts the whole stage, up to the
// configured number of attempts.
use log::{debug, error, info, warn};

use crate::engine::DataStore;
use crate::error::{Error, Result};
use crate::types::{OutputType, Substation, Workspace};

/// Base layer holding transformer points tagged with their municipality.
pub const XFMR_MCD: &str = "XFMR_MCD";
/// Base copy of the primary conductor layer.
pub const PRICOND_MCD: &str = "PriCond_MCD";

pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Remove `name` from the workspace if an earlier run left it there. The
/// engine refuses to write over an existing dataset.
pub fn delete_if_exists<S: DataStore + ?Sized>(store: &S, ws: &Workspace, name: &str) -> Result<()> {
    if store.exists(ws, name)? {
        debug!("Deleting previous output {}", name);
        store.delete(ws, name)?;
    }
    Ok(())
}

/// Names the stage writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntersectionOutputs {
    pub intersected: String,
    pub conductor_copy: String,
}

impl IntersectionOutputs {
    /// Workspace-wide base layers, produced by the standalone pre-step.
    pub fn base() -> Self {
        IntersectionOutputs {
            intersected: XFMR_MCD.to_string(),
            conductor_copy: PRICOND_MCD.to_string(),
        }
    }

    /// Per-site intermediates, removed again once statistics are computed.
    pub fn for_site(sub: &Substation) -> Self {
        IntersectionOutputs {
            intersected: format!("{}_{}_Int", XFMR_MCD, sub),
            conductor_copy: format!("{}_{}_Copy", PRICOND_MCD, sub),
        }
    }

    pub fn names(&self) -> [&str; 2] {
        [&self.intersected, &self.conductor_copy]
    }
}

pub struct IntersectionStage<'a, S: DataStore + ?Sized> {
    store: &'a S,
    workspace: &'a Workspace,
    mcd_layer: String,
    attempts: u32,
}

impl<'a, S: DataStore + ?Sized> IntersectionStage<'a, S> {
    pub fn new(store: &'a S, workspace: &'a Workspace, mcd_layer: impl Into<String>) -> Self {
        IntersectionStage {
            store,
            workspace,
            mcd_layer: mcd_layer.into(),
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Run the stage, retrying on lock contention. On final failure any output
    /// the stage may have created is removed.
    pub fn intersect(
        &self,
        transformer: &str,
        conductor: &str,
        outputs: &IntersectionOutputs,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.run_once(transformer, conductor, outputs) {
                Ok(()) => {
                    info!(
                        "Intersection complete: {} and {} written to {}",
                        outputs.intersected,
                        outputs.conductor_copy,
                        self.workspace.path().display()
                    );
                    return Ok(());
                }
                Err(Error::Engine(e)) if self.store.is_lock_contention(&e) => {
                    if attempt >= self.attempts {
                        error!(
                            "Giving up on intersection after {} attempts: {}",
                            attempt, e
                        );
                        self.cleanup(outputs);
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!(
                        "Data locked on attempt {}/{} ({}); retrying",
                        attempt, self.attempts, e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    error!("Intersection failed: {}", e);
                    self.cleanup(outputs);
                    return Err(e);
                }
            }
        }
    }

    fn run_once(&self, transformer: &str, conductor: &str, outputs: &IntersectionOutputs) -> Result<()> {
        let ws = self.workspace;
        for layer in [transformer, conductor, self.mcd_layer.as_str()] {
            if !self.store.exists(ws, layer)? {
                return Err(Error::MissingLayer(layer.to_string()));
            }
        }

        delete_if_exists(self.store, ws, &outputs.intersected)?;
        debug!("Intersecting {} with {}", transformer, self.mcd_layer);
        self.store.intersect(
            ws,
            &[transformer, self.mcd_layer.as_str()],
            &outputs.intersected,
            OutputType::Point,
        )?;

        delete_if_exists(self.store, ws, &outputs.conductor_copy)?;
        debug!("Copying {} to {}", conductor, outputs.conductor_copy);
        self.store
            .copy_features(ws, conductor, &outputs.conductor_copy)?;
        Ok(())
    }

    /// Best-effort removal of the stage outputs; failures are only logged.
    pub fn cleanup(&self, outputs: &IntersectionOutputs) {
        for name in outputs.names() {
            let removed = self
                .store
                .exists(self.workspace, name)
                .and_then(|present| match present {
                    true => self.store.delete(self.workspace, name),
                    false => Ok(()),
                });
            if let Err(e) = removed {
                warn!("Could not remove {}: {}", name, e);
            }
        }
    }
}
