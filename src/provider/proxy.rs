//! Static proxy provider

use super::{HealthCheck, ProxyProvider, VehicleType};
use crate::outbound::OutboundProxy;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Inline provider (proxies defined directly in config)
pub struct InlineProvider {
    name: String,
    vehicle_type: VehicleType,
    proxies: Vec<Arc<dyn OutboundProxy>>,
    health_check: Arc<HealthCheck>,
}

impl InlineProvider {
    pub fn new(
        name: String,
        vehicle_type: VehicleType,
        proxies: Vec<Arc<dyn OutboundProxy>>,
        health_check: Arc<HealthCheck>,
    ) -> Self {
        health_check.set_proxies(proxies.clone());

        InlineProvider {
            name,
            vehicle_type,
            proxies,
            health_check,
        }
    }

    pub fn health_check_url(&self) -> &str {
        self.health_check.url()
    }
}

#[async_trait]
impl ProxyProvider for InlineProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn vehicle_type(&self) -> VehicleType {
        self.vehicle_type
    }

    fn proxies(&self) -> Vec<Arc<dyn OutboundProxy>> {
        self.proxies.clone()
    }

    fn count(&self) -> usize {
        self.proxies.len()
    }

    fn touch(&self) {
        self.health_check.touch();
    }

    async fn initial(&self) -> Result<()> {
        if self.health_check.is_auto() {
            let hc = self.health_check.clone();
            tokio::spawn(async move {
                hc.start().await;
            });
        }
        Ok(())
    }

    async fn health_check(&self) {
        self.health_check.check().await;
    }

    async fn close(&self) {
        self.health_check.close();
    }
}
