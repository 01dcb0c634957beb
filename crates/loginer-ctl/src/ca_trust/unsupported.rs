use crate::ca::CertificateMaterial;
use crate::errors::CaError;

#[derive(Debug, Default)]
pub(crate) struct PlatformTrustBackend;

impl PlatformTrustBackend {
    pub(crate) fn install(&self, _material: &CertificateMaterial) -> Result<(), CaError> {
        Err(unsupported("install_ca_trust"))
    }

    pub(crate) fn uninstall(&self, _common_name: &str) -> Result<(), CaError> {
        Err(unsupported("uninstall_ca_trust"))
    }

    pub(crate) fn is_trusted(&self, _common_name: &str) -> Result<bool, CaError> {
        Err(unsupported("is_ca_trusted"))
    }
}

fn unsupported(operation: &str) -> CaError {
    CaError::UnsupportedOperation(format!(
        "{operation} is not available on this platform"
    ))
}
