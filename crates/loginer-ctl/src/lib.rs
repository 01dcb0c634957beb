//! Control plane for the local game-login interception stack.
//!
//! Owns the certificate material and OS trust state, generates the routing
//! core's configuration, and supervises the two external components (the
//! routing core and the interception engine) with async output capture.

pub mod ca;
mod ca_trust;
pub mod config;
mod errors;
pub mod orchestrator;
pub mod port_reaper;
pub mod provision;
pub mod routing;
pub mod supervisor;

pub use ca::{CertificateMaterial, ROOT_CA_COMMON_NAME};
pub use config::{default_app_dir, AppConfig};
pub use errors::{CaError, CtlError};
pub use orchestrator::Orchestrator;
pub use supervisor::{CapturedOutput, ProcessSupervisor, SupervisorSpec, READY_MARKER};
