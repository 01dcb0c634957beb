use std::fs;
use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use time::{Duration, OffsetDateTime};
use tracing::{error, info};

use crate::ca_trust;
use crate::config::{AppConfig, CertPaths};
use crate::errors::{CaError, CtlError};

/// Common name of the locally generated root. Trust-store queries key off
/// this name, so it must stay stable across releases.
pub const ROOT_CA_COMMON_NAME: &str = "Netease PC Game Loginer Root CA";

const ORGANIZATION_NAME: &str = "Netease PC Game Loginer Project";
const STATE_NAME: &str = "Zhejiang";
const LOCALITY_NAME: &str = "Hangzhou";

const ROOT_VALIDITY_DAYS: i64 = 3650;
const LEAF_VALIDITY_DAYS: i64 = 365;
const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generates a PKCS#8 RSA-2048 key usable by rcgen. The game client's SDK
/// rejects non-RSA chains, so the modern default curves are off the table.
fn generate_rsa_keypair() -> Result<KeyPair, CaError> {
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
        .map_err(|error| CaError::InvalidMaterial(format!("RSA key generation: {error}")))?;
    let pkcs8 = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|error| CaError::InvalidMaterial(format!("PKCS#8 encoding: {error}")))?;
    KeyPair::from_pkcs8_pem_and_sign_algo(&pkcs8, &rcgen::PKCS_RSA_SHA256)
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::StateOrProvinceName, STATE_NAME);
    dn.push(DnType::LocalityName, LOCALITY_NAME);
    dn.push(DnType::OrganizationName, ORGANIZATION_NAME);
    dn
}

/// Generates the self-signed root. KeyCertSign only; the root never serves
/// traffic itself.
pub fn generate_root_ca() -> Result<CertificateMaterial, CaError> {
    let key = generate_rsa_keypair()?;

    let mut params = CertificateParams::new(Vec::new())
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    params.distinguished_name = distinguished_name(ROOT_CA_COMMON_NAME);

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);

    let cert = params
        .self_signed(&key)
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))?;

    Ok(CertificateMaterial {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Issues the interception leaf for `domain`, signed by the root. Carries
/// the authority key identifier so chain building works in strict stores.
pub fn generate_leaf_certificate(
    ca: &CertificateMaterial,
    domain: &str,
) -> Result<CertificateMaterial, CaError> {
    let ca_key = KeyPair::from_pkcs8_pem_and_sign_algo(&ca.key_pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))?;
    let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, ca_key)
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))?;

    let mut params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))?;
    params.distinguished_name = distinguished_name(domain);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.use_authority_key_identifier_extension = true;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

    let leaf_key = generate_rsa_keypair()?;
    let cert = params
        .signed_by(&leaf_key, &issuer)
        .map_err(|error| CaError::InvalidMaterial(error.to_string()))?;

    Ok(CertificateMaterial {
        cert_pem: cert.pem(),
        key_pem: leaf_key.serialize_pem(),
    })
}

/// Renders the key-then-certificate bundle the interception engine loads as
/// its CA file. Order matters: key first.
pub fn combined_bundle(material: &CertificateMaterial) -> String {
    let mut bundle = String::with_capacity(material.key_pem.len() + material.cert_pem.len() + 1);
    bundle.push_str(&material.key_pem);
    if !bundle.ends_with('\n') {
        bundle.push('\n');
    }
    bundle.push_str(&material.cert_pem);
    bundle
}

/// Presence check only. Content corruption surfaces on the next trust-store
/// verification, which re-triggers a rebuild.
pub fn verify_files_exist(paths: &CertPaths) -> bool {
    [
        paths.ca_cert.as_path(),
        paths.ca_key.as_path(),
        paths.bundle.as_path(),
    ]
    .iter()
    .all(|path| path.is_file())
}

/// Builds the full certificate material set under the configured trust
/// directory: root pair, leaf pair for the governed domain, and the
/// combined bundle. Saves the configuration afterwards so the recorded
/// paths always describe material that exists on disk.
pub fn build_ca_material(config: &mut AppConfig) -> Result<(), CtlError> {
    let root = generate_root_ca().map_err(CtlError::from)?;
    let leaf = generate_leaf_certificate(&root, &config.domain).map_err(CtlError::from)?;

    let trust_dir = config.certs_path.trust_dir.clone();
    fs::create_dir_all(&trust_dir)?;

    config.certs_path.ca_cert = trust_dir.join("ca.crt");
    config.certs_path.ca_key = trust_dir.join("ca.key");
    config.certs_path.bundle = trust_dir.join("mitmproxy-ca.pem");

    fs::write(&config.certs_path.ca_cert, &root.cert_pem)?;
    fs::write(&config.certs_path.ca_key, &root.key_pem)?;
    fs::write(&config.certs_path.bundle, combined_bundle(&root))?;
    fs::write(trust_dir.join("server.crt"), &leaf.cert_pem)?;
    fs::write(trust_dir.join("server.key"), &leaf.key_pem)?;

    config.save()?;
    info!(dir = %trust_dir.display(), "certificate material rebuilt");
    Ok(())
}

pub fn load_root_ca(cert_path: &Path, key_path: &Path) -> Result<CertificateMaterial, CaError> {
    let cert_pem = read_pem(cert_path, "read_ca_cert")?;
    let key_pem = read_pem(key_path, "read_ca_key")?;
    if cert_pem.is_empty() {
        return Err(CaError::InvalidMaterial(
            "certificate PEM must not be empty".to_string(),
        ));
    }
    if key_pem.is_empty() {
        return Err(CaError::InvalidMaterial(
            "private key PEM must not be empty".to_string(),
        ));
    }
    Ok(CertificateMaterial { cert_pem, key_pem })
}

fn read_pem(path: &Path, operation: &str) -> Result<String, CaError> {
    fs::read_to_string(path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::PermissionDenied {
            return CaError::PermissionDenied {
                operation: operation.to_string(),
                detail: error.to_string(),
            };
        }
        CaError::Io(error)
    })
}

/// Installs the root into the OS trust store. Failures are logged and
/// reported as `false` so the caller can fall through to a repair pass.
pub fn install_to_trust_store(config: &AppConfig) -> bool {
    let material = match load_root_ca(&config.certs_path.ca_cert, &config.certs_path.ca_key) {
        Ok(material) => material,
        Err(err) => {
            error!(error = %err, "cannot load root certificate for trust install");
            return false;
        }
    };
    match ca_trust::install(&material) {
        Ok(()) => {
            info!(common_name = ROOT_CA_COMMON_NAME, "root certificate trusted");
            true
        }
        Err(err) => {
            error!(error = %err, "trust store install failed");
            false
        }
    }
}

pub fn verify_installed() -> bool {
    match ca_trust::is_trusted(ROOT_CA_COMMON_NAME) {
        Ok(trusted) => trusted,
        Err(err) => {
            error!(error = %err, "trust store lookup failed");
            false
        }
    }
}

pub fn uninstall_from_trust_store() -> bool {
    match ca_trust::uninstall(ROOT_CA_COMMON_NAME) {
        Ok(()) => true,
        Err(err) => {
            error!(error = %err, "trust store uninstall failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use x509_parser::pem::parse_x509_pem;
    use x509_parser::prelude::*;

    use super::{
        combined_bundle, generate_leaf_certificate, generate_root_ca, ROOT_CA_COMMON_NAME,
    };
    use crate::config::AppConfig;

    fn parse_cert(pem: &str) -> Vec<u8> {
        let (_, parsed) = parse_x509_pem(pem.as_bytes()).expect("parse pem");
        parsed.contents
    }

    #[test]
    fn root_ca_has_the_expected_subject_and_constraints() {
        let root = generate_root_ca().expect("generate root");
        let der = parse_cert(&root.cert_pem);
        let (_, cert) = X509Certificate::from_der(&der).expect("parse root der");

        let subject = cert.subject().to_string();
        assert!(subject.contains(ROOT_CA_COMMON_NAME));
        assert!(subject.contains("Zhejiang"));
        assert!(subject.contains("Hangzhou"));
        assert!(cert.is_ca());

        let key_usage = cert
            .key_usage()
            .expect("key usage lookup")
            .expect("key usage present");
        assert!(key_usage.value.key_cert_sign());
    }

    #[test]
    fn leaf_is_signed_by_the_root_and_names_the_domain() {
        let root = generate_root_ca().expect("generate root");
        let leaf =
            generate_leaf_certificate(&root, "service.mkey.163.com").expect("generate leaf");

        let root_der = parse_cert(&root.cert_pem);
        let (_, root_cert) = X509Certificate::from_der(&root_der).expect("parse root");
        let leaf_der = parse_cert(&leaf.cert_pem);
        let (_, leaf_cert) = X509Certificate::from_der(&leaf_der).expect("parse leaf");

        assert!(!leaf_cert.is_ca());
        assert_eq!(leaf_cert.issuer(), root_cert.subject());
        leaf_cert
            .verify_signature(Some(root_cert.public_key()))
            .expect("leaf signature chains to root");

        let san = leaf_cert
            .subject_alternative_name()
            .expect("san lookup")
            .expect("san present");
        assert!(san
            .value
            .general_names
            .iter()
            .any(|name| matches!(name, GeneralName::DNSName("service.mkey.163.com"))));
    }

    #[test]
    fn bundle_is_exactly_key_then_certificate() {
        let root = generate_root_ca().expect("generate root");
        let bundle = combined_bundle(&root);

        assert_eq!(bundle.matches("-----BEGIN ").count(), 2);
        let cert_at = bundle.find("-----BEGIN CERTIFICATE").expect("cert block");
        let key_part = &bundle[..cert_at];
        let cert_part = &bundle[cert_at..];
        assert_eq!(key_part.trim_end(), root.key_pem.trim_end());
        assert_eq!(cert_part.trim_end(), root.cert_pem.trim_end());
    }

    #[test]
    fn material_build_writes_every_expected_file_and_saves_config() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = AppConfig::for_app_dir(dir.path());
        super::build_ca_material(&mut config).expect("build material");

        assert!(super::verify_files_exist(&config.certs_path));
        assert!(config.certs_path.trust_dir.join("server.crt").is_file());
        assert!(config.certs_path.trust_dir.join("server.key").is_file());
        assert!(config.config_file().is_file());
    }
}
