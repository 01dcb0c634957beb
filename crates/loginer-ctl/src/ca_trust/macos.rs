use std::path::PathBuf;

use crate::ca::CertificateMaterial;
use crate::errors::CaError;

use super::backend_common::{operation_error, run_command, write_staged_cert};

#[derive(Debug, Default)]
pub(crate) struct PlatformTrustBackend;

impl PlatformTrustBackend {
    pub(crate) fn install(&self, material: &CertificateMaterial) -> Result<(), CaError> {
        let cert_path = write_staged_cert("macos", &material.cert_pem)?;
        let keychain = login_keychain_path()?;

        let args = [
            "add-trusted-cert",
            "-d",
            "-r",
            "trustRoot",
            "-k",
            keychain
                .to_str()
                .ok_or_else(|| operation_error("install_ca_trust", "invalid keychain path"))?,
            cert_path
                .to_str()
                .ok_or_else(|| operation_error("install_ca_trust", "invalid cert path"))?,
        ];
        let outcome = run_command("install_ca_trust", "security", args)?;
        if !outcome.success {
            return Err(operation_error("install_ca_trust", outcome.stderr));
        }
        Ok(())
    }

    pub(crate) fn uninstall(&self, common_name: &str) -> Result<(), CaError> {
        let keychain = login_keychain_path()?;
        let outcome = run_command(
            "uninstall_ca_trust",
            "security",
            [
                "delete-certificate",
                "-c",
                common_name,
                keychain.to_str().ok_or_else(|| {
                    operation_error("uninstall_ca_trust", "invalid keychain path")
                })?,
            ],
        )?;
        if !outcome.success {
            let lower = outcome.stderr.to_ascii_lowercase();
            if !lower.contains("could not find") && !lower.contains("unable to delete") {
                return Err(operation_error("uninstall_ca_trust", outcome.stderr));
            }
        }
        Ok(())
    }

    pub(crate) fn is_trusted(&self, common_name: &str) -> Result<bool, CaError> {
        let keychain = login_keychain_path()?;
        let outcome = run_command(
            "is_ca_trusted",
            "security",
            [
                "find-certificate",
                "-c",
                common_name,
                keychain
                    .to_str()
                    .ok_or_else(|| operation_error("is_ca_trusted", "invalid keychain path"))?,
            ],
        )?;
        Ok(outcome.success)
    }
}

fn login_keychain_path() -> Result<PathBuf, CaError> {
    let Some(home) = std::env::var_os("HOME") else {
        return Err(CaError::UnsupportedOperation(
            "HOME is not set; cannot resolve macOS login keychain".to_string(),
        ));
    };
    Ok(PathBuf::from(home).join("Library/Keychains/login.keychain-db"))
}
