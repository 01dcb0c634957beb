use std::path::PathBuf;

use crate::ca::CertificateMaterial;
use crate::errors::CaError;

use super::backend_common::{operation_error, run_command};

#[derive(Debug, Default)]
pub(crate) struct PlatformTrustBackend;

impl PlatformTrustBackend {
    pub(crate) fn install(&self, material: &CertificateMaterial) -> Result<(), CaError> {
        let trust_store_path = system_ca_path();
        if let Some(parent) = trust_store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&trust_store_path, &material.cert_pem).map_err(|error| {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                return CaError::PermissionDenied {
                    operation: "install_ca_trust".to_string(),
                    detail: error.to_string(),
                };
            }
            CaError::Io(error)
        })?;

        let outcome = run_command("install_ca_trust", "update-ca-certificates", ["--fresh"])?;
        if !outcome.success {
            return Err(operation_error("install_ca_trust", outcome.stderr));
        }
        Ok(())
    }

    pub(crate) fn uninstall(&self, _common_name: &str) -> Result<(), CaError> {
        let trust_store_path = system_ca_path();
        match std::fs::remove_file(&trust_store_path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(CaError::PermissionDenied {
                    operation: "uninstall_ca_trust".to_string(),
                    detail: error.to_string(),
                });
            }
            Err(error) => return Err(CaError::Io(error)),
        }

        let outcome = run_command("uninstall_ca_trust", "update-ca-certificates", ["--fresh"])?;
        if !outcome.success {
            return Err(operation_error("uninstall_ca_trust", outcome.stderr));
        }
        Ok(())
    }

    pub(crate) fn is_trusted(&self, _common_name: &str) -> Result<bool, CaError> {
        let trust_store_path = system_ca_path();
        if !trust_store_path.is_file() {
            return Ok(false);
        }

        let args = [
            "verify",
            "-CAfile",
            "/etc/ssl/certs/ca-certificates.crt",
            trust_store_path
                .to_str()
                .ok_or_else(|| operation_error("is_ca_trusted", "invalid trust store path"))?,
        ];
        let outcome = run_command("is_ca_trusted", "openssl", args)?;
        Ok(outcome.success)
    }
}

fn system_ca_path() -> PathBuf {
    if let Some(path) = std::env::var_os("LOGINER_LINUX_CA_PATH") {
        return PathBuf::from(path);
    }
    PathBuf::from("/usr/local/share/ca-certificates/netease-loginer-root-ca.crt")
}
