use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ca;
use crate::config::AppConfig;
use crate::errors::CtlError;
use crate::provision;
use crate::supervisor::{CapturedOutput, ProcessSupervisor, SupervisorSpec};

const READY_WAIT: Duration = Duration::from_secs(15);

/// Drives the whole stack: readiness repair loop, then the routing core and
/// the interception engine in order.
pub struct Orchestrator {
    config: AppConfig,
    routing: ProcessSupervisor,
    interception: ProcessSupervisor,
}

pub(crate) fn routing_spec(config: &AppConfig) -> SupervisorSpec {
    let working_dir = config
        .routing
        .executable
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or_else(|| config.app_dir.clone());
    SupervisorSpec {
        name: "routing-core",
        executable: config.routing.executable.clone(),
        args: vec![
            "-d".to_string(),
            working_dir.display().to_string(),
            "-f".to_string(),
            config.routing.config_path.display().to_string(),
        ],
        working_dir,
        port: Some(config.proxy.routing_port),
        always_reap_port: false,
    }
}

pub(crate) fn interception_spec(config: &AppConfig) -> SupervisorSpec {
    let working_dir = config
        .interception
        .executable
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or_else(|| config.app_dir.clone());
    SupervisorSpec {
        name: "interception-engine",
        executable: config.interception.executable.clone(),
        args: vec![
            "--set".to_string(),
            format!("confdir={}", config.certs_path.trust_dir.display()),
            "-k".to_string(),
            "-p".to_string(),
            config.proxy.intercept_port.to_string(),
            "-s".to_string(),
            config.interception.plugin_path.display().to_string(),
        ],
        working_dir,
        port: Some(config.proxy.intercept_port),
        // The engine forks worker helpers that can outlive the parent.
        always_reap_port: true,
    }
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        let routing = ProcessSupervisor::new(routing_spec(&config));
        let interception = ProcessSupervisor::new(interception_spec(&config));
        Self {
            config,
            routing,
            interception,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check-repair-recheck. A pass that repairs nothing means the
    /// environment is ready; after a repairing pass the result is confirmed
    /// with a check-only look, and a still-broken environment is fatal.
    pub fn ensure_ready(&mut self) -> Result<(), CtlError> {
        if !self.readiness_pass()? {
            info!("environment ready");
            return Ok(());
        }
        debug!("repairs applied, confirming");

        if self.environment_incomplete() {
            return Err(CtlError::NotConverged(
                "repairs did not take effect; check trust store permissions and component files"
                    .to_string(),
            ));
        }
        info!("environment ready after repair");
        Ok(())
    }

    /// Check-only mirror of the repair pass.
    fn environment_incomplete(&self) -> bool {
        !ca::verify_installed()
            || !provision::missing_routing_components(&self.config).is_empty()
            || !provision::missing_interception_components(&self.config).is_empty()
    }

    fn readiness_pass(&mut self) -> Result<bool, CtlError> {
        let mut repaired = false;

        if !ca::verify_installed() {
            if !ca::verify_files_exist(&self.config.certs_path) {
                ca::build_ca_material(&mut self.config)?;
            }
            ca::install_to_trust_store(&self.config);
            repaired = true;
        }

        let missing = provision::missing_routing_components(&self.config);
        if !missing.is_empty() {
            for component in &missing {
                warn!(%component, "missing, repairing");
            }
            provision::repair_routing(&self.config)?;
            repaired = true;
        }

        let missing = provision::missing_interception_components(&self.config);
        if !missing.is_empty() {
            for component in &missing {
                warn!(%component, "missing, repairing");
            }
            provision::repair_interception(&self.config)?;
            repaired = true;
        }

        Ok(repaired)
    }

    /// Brings the stack up: readiness first, then the routing core, then
    /// the interception engine, waiting for its listener marker.
    pub async fn start_all(&mut self) -> Result<(), CtlError> {
        self.ensure_ready()?;

        self.routing.start()?;
        self.interception.start()?;

        let output = self.interception.get_output(READY_WAIT).await;
        if output.iter().any(|entry| *entry == CapturedOutput::Ready) {
            info!("interception engine is listening");
        } else {
            warn!("interception engine gave no readiness marker in time");
        }
        Ok(())
    }

    /// Tears the stack down in reverse order. Best effort throughout.
    pub async fn stop_all(&mut self) {
        self.interception.stop().await;
        self.routing.stop().await;
    }

    pub async fn get_output_routing(&mut self, wait: Duration) -> Vec<CapturedOutput> {
        self.routing.get_output(wait).await
    }

    pub async fn get_output_interception(&mut self, wait: Duration) -> Vec<CapturedOutput> {
        self.interception.get_output(wait).await
    }
}
