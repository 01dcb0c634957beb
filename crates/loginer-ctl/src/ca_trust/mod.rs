use std::sync::OnceLock;

use crate::ca::CertificateMaterial;
use crate::errors::CaError;

mod backend_common;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod unsupported;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux::PlatformTrustBackend;
#[cfg(target_os = "macos")]
use macos::PlatformTrustBackend;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use unsupported::PlatformTrustBackend;
#[cfg(target_os = "windows")]
use windows::PlatformTrustBackend;

static TRUST_BACKEND: OnceLock<PlatformTrustBackend> = OnceLock::new();

fn backend() -> &'static PlatformTrustBackend {
    TRUST_BACKEND.get_or_init(PlatformTrustBackend::default)
}

pub(crate) fn install(material: &CertificateMaterial) -> Result<(), CaError> {
    backend().install(material)
}

pub(crate) fn uninstall(common_name: &str) -> Result<(), CaError> {
    backend().uninstall(common_name)
}

pub(crate) fn is_trusted(common_name: &str) -> Result<bool, CaError> {
    backend().is_trusted(common_name)
}
