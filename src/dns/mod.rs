//! DNS resolution for chain hops

mod cache;
mod resolver;

pub use cache::DnsCache;
pub use resolver::Resolver;

use crate::common::Metadata;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use tracing::debug;

/// Host name lookup used when pinning hop addresses
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Pin `metadata` to a concrete IP.
///
/// Does nothing when the destination is already an IP or there is no host
/// to resolve. Otherwise the first returned address is stored in `dst_ip`.
pub async fn resolve_dns(metadata: &mut Metadata, resolver: &dyn DnsLookup) -> Result<()> {
    if metadata.resolved() || metadata.host.is_empty() {
        return Ok(());
    }

    let ips = resolver
        .lookup_ip(&metadata.host)
        .await
        .map_err(|e| Error::dns(format!("cannot resolve ip: {}", e)))?;

    match ips.first() {
        Some(ip) => {
            debug!("Pinned {} to {}", metadata.host, ip);
            metadata.dst_ip = Some(*ip);
            Ok(())
        }
        None => Err(Error::dns(format!("cannot resolve ip: {}", metadata.host))),
    }
}
