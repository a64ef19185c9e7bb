//! Proxy providers
//!
//! A provider owns an ordered set of proxies. Groups never hold proxies
//! directly; they read them from their providers through
//! [`get_providers_proxies`] and cache the flattened result.

mod healthcheck;
mod proxy;

pub use healthcheck::HealthCheck;
pub use proxy::InlineProvider;

use crate::outbound::OutboundProxy;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Vehicle type (how data is loaded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VehicleType {
    /// Declared under `proxy-providers` with `type: inline`
    Inline,
    /// A group's own `proxies:` list
    Compatible,
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleType::Inline => write!(f, "Inline"),
            VehicleType::Compatible => write!(f, "Compatible"),
        }
    }
}

/// Trait for proxy providers
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Vehicle type (how proxies are loaded)
    fn vehicle_type(&self) -> VehicleType;

    /// Get proxies
    fn proxies(&self) -> Vec<Arc<dyn OutboundProxy>>;

    /// Proxy count
    fn count(&self) -> usize;

    /// Mark the provider as in use, keeping lazy health checks running
    fn touch(&self);

    /// Start background work
    async fn initial(&self) -> Result<()>;

    /// Health check all proxies
    async fn health_check(&self);

    /// Close provider
    async fn close(&self);
}

/// Concatenate the proxies of `providers` in order, touching each first
/// when `touch` is set.
pub fn get_providers_proxies(
    providers: &[Arc<dyn ProxyProvider>],
    touch: bool,
) -> Vec<Arc<dyn OutboundProxy>> {
    let mut proxies = Vec::new();
    for provider in providers {
        if touch {
            provider.touch();
        }
        proxies.extend(provider.proxies());
    }
    proxies
}
