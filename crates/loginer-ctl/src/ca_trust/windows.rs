use crate::ca::CertificateMaterial;
use crate::errors::CaError;

use super::backend_common::{operation_error, run_command, write_staged_cert};

#[derive(Debug, Default)]
pub(crate) struct PlatformTrustBackend;

impl PlatformTrustBackend {
    pub(crate) fn install(&self, material: &CertificateMaterial) -> Result<(), CaError> {
        let cert_path = write_staged_cert("windows", &material.cert_pem)?;
        let cert_arg = cert_path
            .to_str()
            .ok_or_else(|| operation_error("install_ca_trust", "invalid staged cert path"))?;
        let outcome = run_command(
            "install_ca_trust",
            "certutil",
            ["-f", "-addstore", "Root", cert_arg],
        )?;
        if !outcome.success {
            return Err(operation_error("install_ca_trust", outcome.stderr));
        }
        Ok(())
    }

    pub(crate) fn uninstall(&self, common_name: &str) -> Result<(), CaError> {
        let outcome = run_command(
            "uninstall_ca_trust",
            "certutil",
            ["-delstore", "Root", common_name],
        )?;
        if !outcome.success {
            let lower = outcome.stderr.to_ascii_lowercase();
            if !lower.contains("cannot find") && !lower.contains("not found") {
                return Err(operation_error("uninstall_ca_trust", outcome.stderr));
            }
        }
        Ok(())
    }

    pub(crate) fn is_trusted(&self, common_name: &str) -> Result<bool, CaError> {
        let outcome = run_command(
            "is_ca_trusted",
            "certutil",
            ["-verifystore", "Root", common_name],
        )?;
        Ok(outcome.success)
    }
}
