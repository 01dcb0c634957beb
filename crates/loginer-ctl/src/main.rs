use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use loginer_ctl::{default_app_dir, AppConfig, CtlError, Orchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitClass {
    Ok,
    ConfigInvalid,
    CaBuildFailed,
    StartupFailed,
}

impl ExitClass {
    fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ConfigInvalid => 20,
            Self::CaBuildFailed => 21,
            Self::StartupFailed => 22,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ConfigInvalid => "config_invalid",
            Self::CaBuildFailed => "ca_build_failed",
            Self::StartupFailed => "startup_failed",
        }
    }
}

#[derive(Debug)]
struct RunOutcome {
    class: ExitClass,
    detail: Option<String>,
}

impl RunOutcome {
    fn ok() -> Self {
        Self {
            class: ExitClass::Ok,
            detail: None,
        }
    }

    fn from_error(error: CtlError) -> Self {
        let class = match &error {
            CtlError::InvalidConfig(_) => ExitClass::ConfigInvalid,
            CtlError::CaBuildFailed(_) => ExitClass::CaBuildFailed,
            CtlError::ExecutableMissing { .. }
            | CtlError::NotConverged(_)
            | CtlError::Io(_)
            | CtlError::Join(_) => ExitClass::StartupFailed,
        };
        Self {
            class,
            detail: Some(error.to_string()),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let outcome = run().await;
    match (&outcome.class, &outcome.detail) {
        (ExitClass::Ok, _) => info!(exit_class = outcome.class.label(), "shutdown complete"),
        (_, Some(detail)) => error!(exit_class = outcome.class.label(), %detail, "exiting"),
        (_, None) => error!(exit_class = outcome.class.label(), "exiting"),
    }
    std::process::exit(outcome.class.code());
}

async fn run() -> RunOutcome {
    let app_dir = match default_app_dir() {
        Ok(dir) => dir,
        Err(error) => return RunOutcome::from_error(error),
    };
    let config = match AppConfig::load_or_create(&app_dir) {
        Ok(config) => config,
        Err(error) => return RunOutcome::from_error(error),
    };
    info!(app_dir = %config.app_dir.display(), "configuration loaded");

    let mut orchestrator = Orchestrator::new(config);
    if let Err(error) = orchestrator.start_all().await {
        orchestrator.stop_all().await;
        return RunOutcome::from_error(error);
    }
    info!("stack is up, waiting for interrupt");

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "interrupt listener failed, shutting down");
    }

    orchestrator.stop_all().await;
    RunOutcome::ok()
}
