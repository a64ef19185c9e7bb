//! DNS resolver implementation

use super::{DnsCache, DnsLookup};
use crate::config::DnsConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info};

/// DNS resolver with hosts mapping, caching and configurable upstreams
pub struct Resolver {
    resolver: TokioAsyncResolver,
    cache: DnsCache,
    hosts: HashMap<String, IpAddr>,
}

impl Resolver {
    /// Create new resolver from config
    pub fn new(config: &DnsConfig) -> Result<Self> {
        let mut hosts = HashMap::new();
        for (domain, ip_str) in &config.hosts {
            match ip_str.parse() {
                Ok(ip) => {
                    hosts.insert(domain.clone(), ip);
                }
                Err(_) => debug!("Ignoring invalid hosts entry {} -> {}", domain, ip_str),
            }
        }

        let resolver = Self::build_resolver(&config.nameserver, config.ipv6)?;

        Ok(Resolver {
            resolver,
            cache: DnsCache::new(config.cache_size),
            hosts,
        })
    }

    fn build_resolver(nameservers: &[String], ipv6: bool) -> Result<TokioAsyncResolver> {
        let strategy = if ipv6 {
            LookupIpStrategy::Ipv4AndIpv6
        } else {
            LookupIpStrategy::Ipv4Only
        };

        if nameservers.is_empty() {
            let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
                .map_err(|e| Error::dns(format!("Failed to read system resolver config: {}", e)))?;
            opts.ip_strategy = strategy;
            return Ok(TokioAsyncResolver::tokio(config, opts));
        }

        let mut config = ResolverConfig::new();
        for ns in nameservers {
            match Self::parse_nameserver(ns) {
                Some(ns_config) => config.add_name_server(ns_config),
                None => debug!("Ignoring unsupported nameserver {}", ns),
            }
        }

        let mut opts = ResolverOpts::default();
        opts.cache_size = 0; // We use our own cache
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        opts.ip_strategy = strategy;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    /// Parse nameserver string
    ///
    /// Accepts `8.8.8.8`, `8.8.8.8:53`, `udp://8.8.8.8` and `tcp://8.8.8.8:53`.
    fn parse_nameserver(ns: &str) -> Option<NameServerConfig> {
        let (protocol, addr) = if let Some(rest) = ns.strip_prefix("tcp://") {
            (Protocol::Tcp, rest)
        } else if let Some(rest) = ns.strip_prefix("udp://") {
            (Protocol::Udp, rest)
        } else if ns.contains("://") {
            return None;
        } else {
            (Protocol::Udp, ns)
        };

        let socket_addr: SocketAddr = match addr.parse() {
            Ok(addr) => addr,
            Err(_) => SocketAddr::new(addr.parse().ok()?, 53),
        };

        Some(NameServerConfig::new(socket_addr, protocol))
    }

    /// Clear DNS cache
    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("DNS cache cleared");
    }
}

#[async_trait]
impl DnsLookup for Resolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        if let Some(ip) = self.hosts.get(host) {
            debug!("DNS {} -> {} (hosts)", host, ip);
            return Ok(vec![*ip]);
        }

        if let Some(ips) = self.cache.get(host) {
            return Ok(ips);
        }

        let ips: Vec<IpAddr> = self.resolver.lookup_ip(host).await?.iter().collect();
        if !ips.is_empty() {
            debug!("DNS {} -> {:?}", host, ips);
            self.cache.put(host.to_string(), ips.clone());
        }
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_config() -> DnsConfig {
        let mut config = DnsConfig::default();
        config.nameserver = vec!["127.0.0.1:5353".to_string()];
        config
            .hosts
            .insert("relay.local".to_string(), "10.9.8.7".to_string());
        config
    }

    #[tokio::test]
    async fn test_resolver_ip_passthrough() {
        let resolver = Resolver::new(&test_config()).unwrap();

        let ips = resolver.lookup_ip("8.8.8.8").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))]);
    }

    #[tokio::test]
    async fn test_resolver_hosts() {
        let resolver = Resolver::new(&test_config()).unwrap();

        let ips = resolver.lookup_ip("relay.local").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(10, 9, 8, 7))]);
    }

    #[test]
    fn test_parse_nameserver() {
        let ns = Resolver::parse_nameserver("8.8.8.8").unwrap();
        assert_eq!(ns.protocol, Protocol::Udp);
        assert_eq!(ns.socket_addr.port(), 53);

        let ns = Resolver::parse_nameserver("tcp://8.8.8.8:5353").unwrap();
        assert_eq!(ns.protocol, Protocol::Tcp);
        assert_eq!(ns.socket_addr.port(), 5353);

        assert!(Resolver::parse_nameserver("https://dns.google/dns-query").is_none());
    }
}
