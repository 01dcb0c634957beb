use std::fs;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppConfig;
use crate::errors::CtlError;

/// Name of the proxy entry that funnels governed traffic into the
/// interception engine.
pub const INTERCEPT_PROXY_NAME: &str = "loginer-intercept";

/// Routing-core configuration rendered to YAML. Field names follow the
/// core's own schema, hence the kebab-case renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(rename = "mixed-port")]
    pub mixed_port: u16,
    #[serde(rename = "allow-lan")]
    pub allow_lan: bool,
    pub mode: String,
    #[serde(rename = "log-level")]
    pub log_level: String,
    pub proxies: Vec<ProxyEntry>,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub server: String,
    pub port: u16,
}

impl RoutingConfig {
    /// Builds the rule set: per-process overrides first so a game client is
    /// always captured, then the governed domain, then direct for the rest.
    pub fn for_app(config: &AppConfig) -> Self {
        let mut rules = Vec::with_capacity(config.routing.process_names.len() + 2);
        for process in &config.routing.process_names {
            rules.push(format!("PROCESS-NAME,{process},{INTERCEPT_PROXY_NAME}"));
        }
        rules.push(format!(
            "DOMAIN-SUFFIX,{},{INTERCEPT_PROXY_NAME}",
            config.domain
        ));
        rules.push("MATCH,DIRECT".to_string());

        Self {
            mixed_port: config.proxy.routing_port,
            allow_lan: false,
            mode: "rule".to_string(),
            log_level: "info".to_string(),
            proxies: vec![ProxyEntry {
                name: INTERCEPT_PROXY_NAME.to_string(),
                proxy_type: "http".to_string(),
                server: "127.0.0.1".to_string(),
                port: config.proxy.intercept_port,
            }],
            rules,
        }
    }
}

/// Regenerates the routing core's config file from the current application
/// configuration.
pub fn write_routing_config(config: &AppConfig) -> Result<(), CtlError> {
    let routing = RoutingConfig::for_app(config);
    let rendered = serde_yaml::to_string(&routing)
        .map_err(|error| CtlError::InvalidConfig(format!("routing config: {error}")))?;

    let path = &config.routing.config_path;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, rendered)?;
    info!(path = %path.display(), "routing config written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{write_routing_config, RoutingConfig, INTERCEPT_PROXY_NAME};
    use crate::config::AppConfig;

    fn config_with_processes() -> AppConfig {
        let mut config = AppConfig::for_app_dir("/tmp/loginer-test");
        config.routing.process_names = vec!["game.exe".to_string(), "launcher.exe".to_string()];
        config
    }

    #[test]
    fn rules_are_ordered_process_then_domain_then_direct() {
        let routing = RoutingConfig::for_app(&config_with_processes());
        assert_eq!(
            routing.rules,
            vec![
                "PROCESS-NAME,game.exe,loginer-intercept",
                "PROCESS-NAME,launcher.exe,loginer-intercept",
                "DOMAIN-SUFFIX,service.mkey.163.com,loginer-intercept",
                "MATCH,DIRECT",
            ]
        );
    }

    #[test]
    fn proxy_entry_points_at_the_interception_port() {
        let config = config_with_processes();
        let routing = RoutingConfig::for_app(&config);
        assert_eq!(routing.mixed_port, config.proxy.routing_port);
        assert_eq!(routing.proxies.len(), 1);
        assert_eq!(routing.proxies[0].name, INTERCEPT_PROXY_NAME);
        assert_eq!(routing.proxies[0].port, config.proxy.intercept_port);
    }

    #[test]
    fn rendered_yaml_uses_the_core_schema_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = AppConfig::for_app_dir(dir.path());
        config.routing.config_path = dir.path().join("mihomo").join("config.yaml");
        write_routing_config(&config).expect("write routing config");

        let raw = std::fs::read_to_string(&config.routing.config_path).expect("read back");
        assert!(raw.contains("mixed-port: 7890"));
        assert!(raw.contains("mode: rule"));
        assert!(raw.contains("type: http"));

        let parsed: RoutingConfig = serde_yaml::from_str(&raw).expect("parse yaml");
        assert_eq!(parsed, RoutingConfig::for_app(&config));
    }
}
