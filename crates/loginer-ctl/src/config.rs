use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use loginer_rewrite::{GOVERNED_DOMAIN, PLUGIN_FILE_NAME};

use crate::CtlError;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Persistent control-plane configuration, stored as TOML under the
/// application directory and regenerated with defaults when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_dir: PathBuf,
    pub domain: String,
    pub proxy: ProxyConfig,
    pub certs_path: CertPaths,
    pub routing: RoutingComponent,
    pub interception: InterceptionComponent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Local port the interception engine listens on.
    pub intercept_port: u16,
    /// Mixed HTTP/SOCKS port the routing core listens on.
    pub routing_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPaths {
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    /// Combined key-then-certificate bundle the interception engine loads.
    pub bundle: PathBuf,
    /// Directory the interception engine uses as its confdir.
    pub trust_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingComponent {
    pub executable: PathBuf,
    pub config_path: PathBuf,
    /// Game client process names that must route through the interceptor.
    pub process_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionComponent {
    pub executable: PathBuf,
    pub plugin_path: PathBuf,
}

impl AppConfig {
    pub fn for_app_dir(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        let certs = app_dir.join("certs");
        Self {
            domain: GOVERNED_DOMAIN.to_string(),
            proxy: ProxyConfig {
                intercept_port: 8443,
                routing_port: 7890,
            },
            certs_path: CertPaths {
                ca_cert: certs.join("ca.crt"),
                ca_key: certs.join("ca.key"),
                bundle: certs.join("mitmproxy-ca.pem"),
                trust_dir: certs.clone(),
            },
            routing: RoutingComponent {
                executable: app_dir.join("mihomo").join(routing_binary_name()),
                config_path: app_dir.join("mihomo").join("config.yaml"),
                process_names: Vec::new(),
            },
            interception: InterceptionComponent {
                executable: app_dir.join("mitmproxy").join(interception_binary_name()),
                plugin_path: app_dir.join("mitmproxy").join(PLUGIN_FILE_NAME),
            },
            app_dir,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.app_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads the stored configuration, or writes and returns the defaults
    /// when no configuration exists yet.
    pub fn load_or_create(app_dir: impl Into<PathBuf>) -> Result<Self, CtlError> {
        let app_dir = app_dir.into();
        let path = app_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Self::load(&path);
        }
        let config = Self::for_app_dir(app_dir);
        config.save()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CtlError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|error| CtlError::InvalidConfig(format!("{}: {error}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), CtlError> {
        self.validate()?;
        fs::create_dir_all(&self.app_dir)?;
        let rendered = toml::to_string_pretty(self)
            .map_err(|error| CtlError::InvalidConfig(error.to_string()))?;
        fs::write(self.config_file(), rendered)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CtlError> {
        if self.domain.is_empty() {
            return Err(CtlError::InvalidConfig(
                "domain must not be empty".to_string(),
            ));
        }
        if self.proxy.intercept_port == 0 {
            return Err(CtlError::InvalidConfig(
                "proxy.intercept_port must be greater than zero".to_string(),
            ));
        }
        if self.proxy.routing_port == 0 {
            return Err(CtlError::InvalidConfig(
                "proxy.routing_port must be greater than zero".to_string(),
            ));
        }
        if self.proxy.intercept_port == self.proxy.routing_port {
            return Err(CtlError::InvalidConfig(
                "proxy.intercept_port and proxy.routing_port must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolves the application directory: an explicit override first, then a
/// dot-directory under the user's home.
pub fn default_app_dir() -> Result<PathBuf, CtlError> {
    if let Some(path) = std::env::var_os("LOGINER_APP_DIR") {
        return Ok(PathBuf::from(path));
    }
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".loginer"));
    }
    Err(CtlError::InvalidConfig(
        "unable to determine application directory (set LOGINER_APP_DIR)".to_string(),
    ))
}

fn routing_binary_name() -> &'static str {
    if cfg!(windows) {
        "mihomo.exe"
    } else {
        "mihomo"
    }
}

fn interception_binary_name() -> &'static str {
    if cfg!(windows) {
        "mitmdump.exe"
    } else {
        "mitmdump"
    }
}
