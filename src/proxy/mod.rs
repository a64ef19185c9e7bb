//! Proxy Groups (Fallback, Relay)
//!
//! A group is itself an [`OutboundProxy`]: it draws members from its
//! providers through a [`ProxyCache`] and either picks one of them
//! ([`Fallback`]) or stacks all of them into one tunnel ([`Relay`]).

mod fallback;
mod relay;

pub use fallback::Fallback;
pub use relay::{capabilities, classify_udp_chain, HopCapability, Relay, UdpTopology};

use crate::common::Single;
use crate::config::{Config, ProxyGroupConfig};
use crate::dns::DnsLookup;
use crate::outbound::{DialOptions, Dialer, OutboundProxy, ProxyManager};
use crate::provider::{
    get_providers_proxies, HealthCheck, InlineProvider, ProxyProvider, VehicleType,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long a flattened member list stays fresh
pub const DEFAULT_GET_PROXIES_DURATION: Duration = Duration::from_secs(5);

/// Per-hop budget of a relay chain build
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest `unwrap_proxy` chain followed before giving up
pub const MAX_UNWRAP_DEPTH: usize = 16;

/// Default test URL
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// Default health check interval of a fallback group, in seconds
const DEFAULT_FALLBACK_INTERVAL: u64 = 300;

/// Type of proxy group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    Fallback,
    Relay,
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupType::Fallback => write!(f, "Fallback"),
            GroupType::Relay => write!(f, "Relay"),
        }
    }
}

impl TryFrom<&str> for GroupType {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fallback" => Ok(GroupType::Fallback),
            "relay" => Ok(GroupType::Relay),
            _ => Err(Error::config(format!("Unknown group type: {}", s))),
        }
    }
}

/// Settings shared by every group kind
#[derive(Debug, Clone, Default)]
pub struct GroupCommonOption {
    pub name: String,
    /// Interface and routing mark applied to every dial the group makes
    pub dial_options: DialOptions,
    pub disable_udp: bool,
    pub disable_dns: bool,
}

impl GroupCommonOption {
    pub fn new(name: impl Into<String>) -> Self {
        GroupCommonOption {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_config(config: &ProxyGroupConfig) -> Self {
        GroupCommonOption {
            name: config.name.clone(),
            dial_options: DialOptions {
                interface: config.interface_name.clone(),
                routing_mark: config.routing_mark,
            },
            disable_udp: config.disable_udp,
            disable_dns: config.disable_dns,
        }
    }

    /// Caller options with the group's own settings taking precedence
    pub fn dial_options(&self, caller: &DialOptions) -> DialOptions {
        caller.overlay(&self.dial_options)
    }
}

/// Status payload reported for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now: Option<String>,
    pub all: Vec<String>,
}

/// Member list of a group, flattened from its providers and refreshed at
/// most once per [`DEFAULT_GET_PROXIES_DURATION`].
pub struct ProxyCache {
    providers: Vec<Arc<dyn ProxyProvider>>,
    single: Single<Arc<[Arc<dyn OutboundProxy>]>>,
}

impl ProxyCache {
    pub fn new(providers: Vec<Arc<dyn ProxyProvider>>) -> Self {
        Self::with_ttl(providers, DEFAULT_GET_PROXIES_DURATION)
    }

    pub fn with_ttl(providers: Vec<Arc<dyn ProxyProvider>>, ttl: Duration) -> Self {
        ProxyCache {
            providers,
            single: Single::new(ttl),
        }
    }

    /// Current members in provider order.
    ///
    /// `touch` is forwarded to the providers only when this call performs
    /// the refresh; callers served from the cache or from an in-flight
    /// refresh share its result as is.
    pub async fn proxies(&self, touch: bool) -> Arc<[Arc<dyn OutboundProxy>]> {
        let (proxies, shared) = self
            .single
            .run(|| async { Arc::from(get_providers_proxies(&self.providers, touch)) })
            .await;

        if !shared {
            debug!("Refreshed proxy list: {} members", proxies.len());
        }
        proxies
    }

    /// Drop the cached list so the next access refetches
    pub fn reset(&self) {
        self.single.reset();
    }

    pub fn providers(&self) -> &[Arc<dyn ProxyProvider>] {
        &self.providers
    }
}

/// Trait for proxy groups
#[async_trait]
pub trait ProxyGroup: OutboundProxy {
    /// Get group type
    fn group_type(&self) -> GroupType;

    /// Name of the member currently in use, for groups that pick one
    async fn now(&self) -> Option<String>;

    /// Get all proxy names in this group
    async fn all(&self) -> Vec<String>;

    /// Get providers
    fn providers(&self) -> &[Arc<dyn ProxyProvider>];

    /// Whether callers should skip resolving destinations for this group
    fn disable_dns(&self) -> bool;

    /// Forget cached members (teardown or reload)
    fn cleanup(&self);

    /// Touch providers (update last access time)
    fn touch(&self) {
        for provider in self.providers() {
            provider.touch();
        }
    }

    async fn status(&self) -> GroupStatus {
        GroupStatus {
            group_type: self.group_type().to_string(),
            now: self.now().await,
            all: self.all().await,
        }
    }
}

fn resolve_members(
    manager: &ProxyManager,
    owner: &str,
    names: &[String],
) -> Result<Vec<Arc<dyn OutboundProxy>>> {
    names
        .iter()
        .map(|name| {
            manager.get(name).cloned().ok_or_else(|| {
                Error::config(format!("{}: proxy {} not found", owner, name))
            })
        })
        .collect()
}

fn group_health_check(group_type: GroupType, config: &ProxyGroupConfig) -> HealthCheck {
    match group_type {
        GroupType::Fallback => HealthCheck::new(
            config.url.clone().unwrap_or_else(|| DEFAULT_TEST_URL.to_string()),
            Duration::from_secs(config.interval.unwrap_or(DEFAULT_FALLBACK_INTERVAL)),
            config.lazy,
        ),
        GroupType::Relay => HealthCheck::new(
            config.url.clone().unwrap_or_default(),
            Duration::from_secs(config.interval.unwrap_or(0)),
            config.lazy,
        ),
    }
}

/// Build every configured group in declaration order.
///
/// Members are looked up in `manager`, so a group may reference proxies
/// and the groups declared before it. Each built group is registered in
/// `manager` under its own name.
pub fn build_groups(
    config: &Config,
    manager: &mut ProxyManager,
    dialer: Arc<dyn Dialer>,
    resolver: Arc<dyn DnsLookup>,
) -> Result<Vec<Arc<dyn ProxyGroup>>> {
    let mut providers: HashMap<String, Arc<dyn ProxyProvider>> = HashMap::new();
    for (name, provider_config) in &config.proxy_providers {
        let members = resolve_members(manager, name, &provider_config.proxies)?;
        let health_check = match &provider_config.health_check {
            Some(hc) if hc.enable => {
                HealthCheck::new(hc.url.clone(), Duration::from_secs(hc.interval), hc.lazy)
            }
            _ => HealthCheck::new(String::new(), Duration::ZERO, true),
        };
        providers.insert(
            name.clone(),
            Arc::new(InlineProvider::new(
                name.clone(),
                VehicleType::Inline,
                members,
                Arc::new(health_check),
            )),
        );
    }

    let global = DialOptions {
        interface: config.interface_name.clone(),
        routing_mark: config.routing_mark,
    };

    let mut groups: Vec<Arc<dyn ProxyGroup>> = Vec::with_capacity(config.proxy_groups.len());
    for group_config in &config.proxy_groups {
        let group_type = GroupType::try_from(group_config.group_type.as_str())?;

        let mut group_providers: Vec<Arc<dyn ProxyProvider>> = Vec::new();
        if !group_config.proxies.is_empty() {
            let members = resolve_members(manager, &group_config.name, &group_config.proxies)?;
            group_providers.push(Arc::new(InlineProvider::new(
                group_config.name.clone(),
                VehicleType::Compatible,
                members,
                Arc::new(group_health_check(group_type, group_config)),
            )));
        }
        for name in &group_config.use_provider {
            let provider = providers.get(name).ok_or_else(|| {
                Error::config(format!("{}: provider {} not found", group_config.name, name))
            })?;
            group_providers.push(provider.clone());
        }

        let mut option = GroupCommonOption::from_config(group_config);
        option.dial_options = global.overlay(&option.dial_options);

        match group_type {
            GroupType::Fallback => {
                let group = Arc::new(Fallback::new(option, group_providers));
                manager.insert(group.clone());
                groups.push(group);
            }
            GroupType::Relay => {
                let group = Arc::new(
                    Relay::new(option, group_providers, dialer.clone(), resolver.clone())
                        .with_udp_fallback_match(config.udp_fallback_match),
                );
                manager.insert(group.clone());
                groups.push(group);
            }
        }
        info!("Loaded {} group {}", group_type, group_config.name);
    }

    Ok(groups)
}
