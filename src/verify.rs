// Environment checks run by the `verify` command.
use log::{error, info};
use std::path::Path;

use crate::config::Config;
use crate::engine::DocumentRenderer;

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub ok: bool,
    pub message: String,
}

impl Check {
    fn pass(message: impl Into<String>) -> Self {
        Check {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Check {
            ok: false,
            message: message.into(),
        }
    }

    pub fn line(&self) -> String {
        format!("{} {}", if self.ok { "✓" } else { "✗" }, self.message)
    }
}

fn check_dir(dir: &Path) -> Check {
    if dir.is_dir() {
        Check::pass(format!("Directory exists: {}", dir.display()))
    } else {
        Check::fail(format!("Missing directory: {}", dir.display()))
    }
}

fn check_engine<R: DocumentRenderer + ?Sized>(renderer: &R) -> Check {
    match renderer.ping() {
        Ok(version) => Check::pass(format!("GIS engine available: {}", version)),
        Err(e) => Check::fail(format!("GIS engine unavailable: {}", e)),
    }
}

/// Every check in display order. The configuration check always passes here
/// since a `Config` only exists once it has loaded and validated.
pub fn run_checks<R>(config: &Config, renderer: &R, create_dirs: bool) -> Vec<Check>
where
    R: DocumentRenderer + ?Sized,
{
    let mut checks = vec![Check::pass(format!(
        "Configuration valid ({} substations)",
        config.substations.len()
    ))];
    if create_dirs {
        if let Err(e) = config.ensure_directories() {
            checks.push(Check::fail(format!("Cannot create directories: {}", e)));
        }
    }
    checks.extend(config.required_dirs().iter().map(|d| check_dir(d)));

    let workspace = config.workspace();
    checks.push(if workspace.exists() {
        Check::pass(format!("Workspace exists: {}", workspace.path().display()))
    } else {
        Check::fail(format!("Workspace does not exist: {}", workspace.path().display()))
    });
    checks.push(check_engine(renderer));
    checks
}

/// Log every check; true if all passed.
pub fn run_verification<R>(config: &Config, renderer: &R, create_dirs: bool) -> bool
where
    R: DocumentRenderer + ?Sized,
{
    let checks = run_checks(config, renderer, create_dirs);
    for check in &checks {
        if check.ok {
            info!("{}", check.line());
        } else {
            error!("{}", check.line());
        }
    }
    checks.iter().all(|c| c.ok)
}
