use std::ffi::OsStr;
#[cfg(any(target_os = "macos", target_os = "windows"))]
use std::fs;
use std::io;
#[cfg(any(target_os = "macos", target_os = "windows"))]
use std::path::PathBuf;
use std::process::Command;
#[cfg(test)]
use std::sync::Mutex;

use crate::errors::CaError;

#[cfg(test)]
use crate::ca::{CertificateMaterial, ROOT_CA_COMMON_NAME};

/// Test double for the platform backends, keyed by common name the same way
/// the real store queries are.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct InMemoryTrustBackend {
    trusted_common_name: Mutex<Option<String>>,
}

#[cfg(test)]
impl InMemoryTrustBackend {
    pub(crate) fn install(&self, _material: &CertificateMaterial) -> Result<(), CaError> {
        let mut trusted = self
            .trusted_common_name
            .lock()
            .map_err(|_| lock_error("install"))?;
        if trusted.as_deref() == Some(ROOT_CA_COMMON_NAME) {
            return Ok(());
        }
        *trusted = Some(ROOT_CA_COMMON_NAME.to_string());
        Ok(())
    }

    pub(crate) fn uninstall(&self, common_name: &str) -> Result<(), CaError> {
        let mut trusted = self
            .trusted_common_name
            .lock()
            .map_err(|_| lock_error("uninstall"))?;
        if trusted.as_deref() == Some(common_name) {
            *trusted = None;
        }
        Ok(())
    }

    pub(crate) fn is_trusted(&self, common_name: &str) -> Result<bool, CaError> {
        let trusted = self
            .trusted_common_name
            .lock()
            .map_err(|_| lock_error("is_trusted"))?;
        Ok(trusted.as_deref() == Some(common_name))
    }
}

#[cfg(test)]
fn lock_error(operation: &str) -> CaError {
    CaError::Io(io::Error::other(format!(
        "trust backend lock poisoned during {operation}"
    )))
}

#[derive(Debug)]
pub(crate) struct CommandOutcome {
    pub success: bool,
    pub stderr: String,
}

pub(crate) fn run_command<I, S>(
    operation: &str,
    program: &str,
    args: I,
) -> Result<CommandOutcome, CaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program).args(args).output().map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            return CaError::UnsupportedOperation(format!(
                "{operation}: command '{program}' not found"
            ));
        }
        if error.kind() == io::ErrorKind::PermissionDenied {
            return CaError::PermissionDenied {
                operation: operation.to_string(),
                detail: error.to_string(),
            };
        }
        CaError::Io(error)
    })?;

    Ok(CommandOutcome {
        success: output.status.success(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Stages the root certificate in the state directory so the platform tools
/// can reference a stable path.
#[cfg(any(target_os = "macos", target_os = "windows"))]
pub(crate) fn write_staged_cert(namespace: &str, cert_pem: &str) -> Result<PathBuf, CaError> {
    let path = staged_cert_path(namespace)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, cert_pem)?;
    Ok(path)
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn staged_cert_path(namespace: &str) -> Result<PathBuf, CaError> {
    Ok(base_state_dir()?.join(namespace).join("root-ca.pem"))
}

pub(crate) fn operation_error(operation: &str, detail: impl Into<String>) -> CaError {
    let detail = detail.into();
    if permission_denied_hint(&detail) {
        return CaError::PermissionDenied {
            operation: operation.to_string(),
            detail,
        };
    }
    CaError::OperationFailed(format!("{operation}: {detail}"))
}

fn permission_denied_hint(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    lower.contains("permission denied")
        || lower.contains("not permitted")
        || lower.contains("user interaction is not allowed")
        || lower.contains("access is denied")
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn base_state_dir() -> Result<PathBuf, CaError> {
    if let Some(path) = std::env::var_os("LOGINER_APP_DIR") {
        return Ok(PathBuf::from(path));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".loginer"));
    }

    Err(CaError::UnsupportedOperation(
        "unable to determine state directory (set LOGINER_APP_DIR)".to_string(),
    ))
}
