use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use loginer_rewrite::PLUGIN_FILE_NAME;

use crate::config::AppConfig;
use crate::errors::CtlError;
use crate::routing;

/// A file the readiness sequence found absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingComponent {
    RoutingExecutable,
    RoutingConfigFile,
    InterceptionExecutable,
    InterceptionPlugin,
}

impl fmt::Display for MissingComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RoutingExecutable => "routing executable",
            Self::RoutingConfigFile => "routing config file",
            Self::InterceptionExecutable => "interception executable",
            Self::InterceptionPlugin => "interception plugin",
        };
        f.write_str(label)
    }
}

pub fn missing_routing_components(config: &AppConfig) -> Vec<MissingComponent> {
    let mut missing = Vec::new();
    if !config.routing.executable.is_file() {
        missing.push(MissingComponent::RoutingExecutable);
    }
    if !config.routing.config_path.is_file() {
        missing.push(MissingComponent::RoutingConfigFile);
    }
    missing
}

pub fn missing_interception_components(config: &AppConfig) -> Vec<MissingComponent> {
    let mut missing = Vec::new();
    if !config.interception.executable.is_file() {
        missing.push(MissingComponent::InterceptionExecutable);
    }
    if !config.interception.plugin_path.is_file() {
        missing.push(MissingComponent::InterceptionPlugin);
    }
    missing
}

/// Repairs what can be regenerated locally. A missing executable cannot be
/// conjured up and fails the pass outright.
pub fn repair_routing(config: &AppConfig) -> Result<(), CtlError> {
    if !config.routing.executable.is_file() {
        return Err(CtlError::ExecutableMissing {
            name: "routing core".to_string(),
            path: config.routing.executable.clone(),
        });
    }
    routing::write_routing_config(config)
}

pub fn repair_interception(config: &AppConfig) -> Result<(), CtlError> {
    if !config.interception.executable.is_file() {
        return Err(CtlError::ExecutableMissing {
            name: "interception engine".to_string(),
            path: config.interception.executable.clone(),
        });
    }
    if config.interception.plugin_path.is_file() {
        return Ok(());
    }

    match resource_dir() {
        Some(dir) => install_plugin(&dir, config),
        None => {
            warn!("no resource directory available to restore the plugin from");
            Ok(())
        }
    }
}

/// Copies the rewrite plugin from the resource directory next to the
/// interception engine.
pub fn install_plugin(resource_dir: &Path, config: &AppConfig) -> Result<(), CtlError> {
    let source = resource_dir.join(PLUGIN_FILE_NAME);
    if !source.is_file() {
        warn!(source = %source.display(), "plugin not present in resource directory");
        return Ok(());
    }

    let target = &config.interception.plugin_path;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&source, target)?;
    info!(target = %target.display(), "plugin restored");
    Ok(())
}

/// Resource lookup: explicit override first, then a `resources` directory
/// next to the running binary.
fn resource_dir() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("LOGINER_RESOURCE_DIR") {
        return Some(PathBuf::from(path));
    }
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("resources"))
}
