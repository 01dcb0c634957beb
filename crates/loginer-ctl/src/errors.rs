use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtlError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("certificate material build failed: {0}")]
    CaBuildFailed(String),
    #[error("required executable '{name}' not found at {path}")]
    ExecutableMissing { name: String, path: PathBuf },
    #[error("environment did not converge after repair: {0}")]
    NotConverged(String),
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum CaError {
    #[error("permission denied while performing {operation}: {detail}")]
    PermissionDenied { operation: String, detail: String },
    #[error("certificate authority operation failed: {0}")]
    OperationFailed(String),
    #[error("invalid certificate authority material: {0}")]
    InvalidMaterial(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CaError> for CtlError {
    fn from(error: CaError) -> Self {
        match error {
            CaError::PermissionDenied { operation, detail } => {
                CtlError::CaBuildFailed(format!("permission denied for {operation}: {detail}"))
            }
            CaError::OperationFailed(detail)
            | CaError::InvalidMaterial(detail)
            | CaError::UnsupportedOperation(detail) => CtlError::CaBuildFailed(detail),
            CaError::Io(error) => CtlError::CaBuildFailed(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CaError, CtlError};

    #[test]
    fn ca_permission_denied_error_mapping() {
        let mapped = CtlError::from(CaError::PermissionDenied {
            operation: "install_ca_trust".to_string(),
            detail: "os error 13".to_string(),
        });
        match mapped {
            CtlError::CaBuildFailed(detail) => {
                assert!(detail.contains("permission denied"));
                assert!(detail.contains("install_ca_trust"));
            }
            other => panic!("unexpected mapped error: {other}"),
        }
    }
}
