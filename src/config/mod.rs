//! Configuration module

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DNS configuration
    pub dns: DnsConfig,

    /// Proxy definitions
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,

    /// Named proxy sets referenced by groups through `use`
    #[serde(default, rename = "proxy-providers")]
    pub proxy_providers: HashMap<String, ProviderConfig>,

    /// Proxy groups
    #[serde(default, rename = "proxy-groups")]
    pub proxy_groups: Vec<ProxyGroupConfig>,

    /// Log level
    #[serde(default = "default_log_level", rename = "log-level")]
    pub log_level: Option<String>,

    /// Reject UDP through hops that cannot carry it instead of falling back
    #[serde(rename = "udp-fallback-match")]
    pub udp_fallback_match: bool,

    /// Default outbound interface
    #[serde(rename = "interface-name")]
    pub interface_name: Option<String>,

    /// Default routing mark (Linux SO_MARK)
    #[serde(rename = "routing-mark")]
    pub routing_mark: Option<u32>,
}

impl Config {
    /// Load configuration from file (synchronous)
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from file (async)
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        names.insert("DIRECT");
        names.insert("REJECT");

        for proxy in &self.proxies {
            proxy.validate()?;
            if !names.insert(proxy.name.as_str()) {
                return Err(Error::config(format!("Duplicate proxy name: {}", proxy.name)));
            }
        }

        for (name, provider) in &self.proxy_providers {
            provider.validate(name)?;
        }

        for group in &self.proxy_groups {
            group.validate()?;
            if !names.insert(group.name.as_str()) {
                return Err(Error::config(format!("Duplicate proxy group name: {}", group.name)));
            }
            for provider in &group.use_provider {
                if !self.proxy_providers.contains_key(provider) {
                    return Err(Error::config(format!(
                        "Group {} uses unknown provider {}",
                        group.name, provider
                    )));
                }
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dns: DnsConfig::default(),
            proxies: Vec::new(),
            proxy_providers: HashMap::new(),
            proxy_groups: Vec::new(),
            log_level: Some("info".to_string()),
            udp_fallback_match: false,
            interface_name: None,
            routing_mark: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> Option<String> {
    Some("info".to_string())
}

/// DNS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DnsConfig {
    /// Upstream nameservers; the system configuration is used when empty
    #[serde(default)]
    pub nameserver: Vec<String>,

    /// IPv6
    #[serde(default)]
    pub ipv6: bool,

    /// Hosts
    #[serde(default)]
    pub hosts: HashMap<String, String>,

    /// Cache size
    #[serde(rename = "cache-size", default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_cache_size() -> usize {
    4096
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy name
    pub name: String,

    /// Proxy type
    #[serde(rename = "type")]
    pub proxy_type: String,

    /// Server address
    pub server: String,

    /// Server port
    pub port: u16,

    /// All other fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Proxy name cannot be empty"));
        }
        if self.server.is_empty() {
            return Err(Error::config("Proxy server cannot be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("Proxy port cannot be 0"));
        }
        Ok(())
    }

    /// Server address as `host:port`
    pub fn addr(&self) -> String {
        if self.server.contains(':') && !self.server.starts_with('[') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }

    /// Get string field
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.extra.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    /// Get bool field
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(|v| v.as_bool())
    }

    /// Get integer field
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.extra.get(key).and_then(|v| v.as_i64())
    }

    /// Get string list field
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        self.extra
            .get(key)
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Proxy provider configuration
///
/// Only `inline` providers are built here: a named list of proxies declared
/// in the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,

    /// Proxy names
    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(rename = "health-check")]
    pub health_check: Option<HealthCheckConfig>,
}

fn default_provider_type() -> String {
    "inline".to_string()
}

impl ProviderConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.provider_type.eq_ignore_ascii_case("inline") {
            return Err(Error::unsupported(format!(
                "Provider {} has type {}, only inline providers are supported",
                name, self.provider_type
            )));
        }
        if let Some(health_check) = &self.health_check {
            health_check.validate()?;
        }
        Ok(())
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enable: bool,

    pub url: String,

    /// Check interval in seconds
    #[serde(default = "default_health_check_interval")]
    pub interval: u64,

    #[serde(default = "default_true")]
    pub lazy: bool,
}

fn default_health_check_interval() -> u64 {
    300
}

impl HealthCheckConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enable && self.url.is_empty() {
            return Err(Error::config("Health check url cannot be empty"));
        }
        Ok(())
    }
}

/// Proxy group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyGroupConfig {
    /// Group name
    pub name: String,

    /// Group type (relay, fallback)
    #[serde(rename = "type")]
    pub group_type: String,

    /// Proxies in group
    #[serde(default)]
    pub proxies: Vec<String>,

    /// Use provider
    #[serde(default, rename = "use")]
    pub use_provider: Vec<String>,

    /// URL for testing
    pub url: Option<String>,

    /// Test interval in seconds
    pub interval: Option<u64>,

    /// Lazy
    #[serde(default = "default_true")]
    pub lazy: bool,

    #[serde(rename = "interface-name")]
    pub interface_name: Option<String>,

    #[serde(rename = "routing-mark")]
    pub routing_mark: Option<u32>,

    #[serde(default, rename = "disable-udp")]
    pub disable_udp: bool,

    #[serde(default, rename = "disable-dns")]
    pub disable_dns: bool,
}

impl ProxyGroupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Proxy group name cannot be empty"));
        }
        match self.group_type.to_lowercase().as_str() {
            "relay" | "fallback" => {}
            other => {
                return Err(Error::unsupported(format!(
                    "Proxy group {} has unsupported type {}",
                    self.name, other
                )))
            }
        }
        if self.proxies.is_empty() && self.use_provider.is_empty() {
            return Err(Error::config(format!(
                "Proxy group {} has neither proxies nor use",
                self.name
            )));
        }
        Ok(())
    }
}
