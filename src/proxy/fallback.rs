//! Fallback proxy group - Use first available proxy

use super::{GroupCommonOption, GroupType, ProxyCache, ProxyGroup};
use crate::common::Metadata;
use crate::outbound::{
    BoxedPacket, BoxedStream, Conn, DialOptions, OutboundProxy, PacketConn, PacketTransport,
    ProxyType,
};
use crate::provider::ProxyProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Fallback proxy group - uses first available proxy
pub struct Fallback {
    option: GroupCommonOption,
    cache: ProxyCache,
}

impl Fallback {
    pub fn new(option: GroupCommonOption, providers: Vec<Arc<dyn ProxyProvider>>) -> Self {
        Fallback {
            option,
            cache: ProxyCache::new(providers),
        }
    }

    /// Group reading its members through an existing cache
    pub fn with_cache(option: GroupCommonOption, cache: ProxyCache) -> Self {
        Fallback { option, cache }
    }

    /// First alive member, or the first member when none is alive
    pub async fn find_alive_proxy(&self, touch: bool) -> Option<Arc<dyn OutboundProxy>> {
        let proxies = self.cache.proxies(touch).await;
        proxies
            .iter()
            .find(|proxy| proxy.alive())
            .or_else(|| proxies.first())
            .cloned()
    }

    async fn select(&self, touch: bool) -> Result<Arc<dyn OutboundProxy>> {
        self.find_alive_proxy(touch)
            .await
            .ok_or_else(|| Error::proxy(format!("{}: no proxy", self.option.name)))
    }
}

#[async_trait]
impl OutboundProxy for Fallback {
    fn name(&self) -> &str {
        &self.option.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Fallback
    }

    fn addr(&self) -> &str {
        ""
    }

    async fn support_udp(&self) -> bool {
        if self.option.disable_udp {
            return false;
        }
        match self.find_alive_proxy(false).await {
            Some(proxy) => proxy.support_udp().await,
            None => false,
        }
    }

    async fn dial_tcp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<Conn> {
        let proxy = self.select(true).await?;
        debug!("[{}] {} via {}", self.option.name, metadata, proxy.name());

        let mut conn = proxy
            .dial_tcp(metadata, &self.option.dial_options(opts))
            .await?;
        conn.append_to_chains(&self.option.name);
        Ok(conn)
    }

    async fn listen_udp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<PacketConn> {
        let proxy = self.select(true).await?;
        debug!("[{}] {} via {}", self.option.name, metadata, proxy.name());

        let mut pc = proxy
            .listen_udp(metadata, &self.option.dial_options(opts))
            .await?;
        pc.append_to_chains(&self.option.name);
        Ok(pc)
    }

    async fn stream_conn(&self, _stream: BoxedStream, _metadata: &Metadata) -> Result<BoxedStream> {
        Err(Error::unsupported(format!(
            "{} is a proxy group, unwrap it first",
            self.option.name
        )))
    }

    async fn stream_packet_conn(
        &self,
        _transport: PacketTransport,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        Err(Error::unsupported(format!(
            "{} is a proxy group, unwrap it first",
            self.option.name
        )))
    }

    async fn unwrap_proxy(&self, _metadata: &Metadata) -> Option<Arc<dyn OutboundProxy>> {
        self.find_alive_proxy(true).await
    }
}

#[async_trait]
impl ProxyGroup for Fallback {
    fn group_type(&self) -> GroupType {
        GroupType::Fallback
    }

    async fn now(&self) -> Option<String> {
        self.find_alive_proxy(false)
            .await
            .map(|proxy| proxy.name().to_string())
    }

    async fn all(&self) -> Vec<String> {
        self.cache
            .proxies(false)
            .await
            .iter()
            .map(|proxy| proxy.name().to_string())
            .collect()
    }

    fn providers(&self) -> &[Arc<dyn ProxyProvider>] {
        self.cache.providers()
    }

    fn disable_dns(&self) -> bool {
        self.option.disable_dns
    }

    fn cleanup(&self) {
        self.cache.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::Reject;
    use crate::provider::{HealthCheck, InlineProvider, VehicleType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Member {
        name: String,
        alive: AtomicBool,
        udp: bool,
    }

    impl Member {
        fn new(name: &str, alive: bool, udp: bool) -> Arc<Self> {
            Arc::new(Member {
                name: name.to_string(),
                alive: AtomicBool::new(alive),
                udp,
            })
        }
    }

    #[async_trait]
    impl OutboundProxy for Member {
        fn name(&self) -> &str {
            &self.name
        }

        fn proxy_type(&self) -> ProxyType {
            ProxyType::Socks5
        }

        fn addr(&self) -> &str {
            "10.0.0.1:1080"
        }

        fn alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn set_alive(&self, alive: bool) {
            self.alive.store(alive, Ordering::SeqCst);
        }

        async fn support_udp(&self) -> bool {
            self.udp
        }

        async fn dial_tcp(&self, _metadata: &Metadata, _opts: &DialOptions) -> Result<Conn> {
            let (stream, _) = tokio::io::duplex(16);
            Ok(Conn::new(Box::new(stream), self.name.clone()))
        }

        async fn listen_udp(&self, _metadata: &Metadata, _opts: &DialOptions) -> Result<PacketConn> {
            Err(Error::unsupported("udp"))
        }

        async fn stream_conn(&self, stream: BoxedStream, _: &Metadata) -> Result<BoxedStream> {
            Ok(stream)
        }

        async fn stream_packet_conn(&self, _: PacketTransport, _: &Metadata) -> Result<BoxedPacket> {
            Err(Error::unsupported("udp"))
        }
    }

    fn group(members: Vec<Arc<dyn OutboundProxy>>, disable_udp: bool) -> Fallback {
        let provider: Arc<dyn ProxyProvider> = Arc::new(InlineProvider::new(
            "fb".to_string(),
            VehicleType::Compatible,
            members,
            Arc::new(HealthCheck::new(String::new(), Duration::ZERO, true)),
        ));
        let mut option = GroupCommonOption::new("fb");
        option.disable_udp = disable_udp;
        // Zero TTL so liveness changes show up on the next call.
        Fallback::with_cache(option, ProxyCache::with_ttl(vec![provider], Duration::ZERO))
    }

    #[tokio::test]
    async fn test_fallback_picks_first_alive() {
        let a = Member::new("a", false, false);
        let b = Member::new("b", true, true);
        let fb = group(vec![a.clone() as Arc<dyn OutboundProxy>, b.clone()], false);

        assert_eq!(fb.now().await.as_deref(), Some("b"));
        assert!(fb.support_udp().await);

        a.set_alive(true);
        assert_eq!(fb.now().await.as_deref(), Some("a"));
        assert!(!fb.support_udp().await);
    }

    #[tokio::test]
    async fn test_fallback_all_dead_returns_first() {
        let fb = group(
            vec![Member::new("a", false, true) as Arc<dyn OutboundProxy>, Member::new("b", false, true)],
            false,
        );
        for _ in 0..3 {
            assert_eq!(fb.find_alive_proxy(true).await.unwrap().name(), "a");
        }
    }

    #[tokio::test]
    async fn test_fallback_dial_records_group() {
        let fb = group(vec![Member::new("a", true, false) as Arc<dyn OutboundProxy>], false);
        let conn = fb
            .dial_tcp(&Metadata::tcp().with_dst_port(80), &DialOptions::default())
            .await
            .unwrap();
        assert_eq!(conn.chains(), &["a".to_string(), "fb".to_string()]);
    }

    #[tokio::test]
    async fn test_fallback_delegate_error_propagates() {
        let blocked: Arc<dyn OutboundProxy> = Arc::new(Reject::with_name("blocked".to_string()));
        let fb = group(vec![blocked], false);
        let err = fb
            .dial_tcp(&Metadata::tcp().with_dst_port(80), &DialOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Proxy(_)));
        assert!(err.to_string().contains("blocked"));
    }

    #[tokio::test]
    async fn test_fallback_empty_and_disabled_udp() {
        let fb = group(Vec::new(), false);
        assert!(fb.now().await.is_none());
        let err = fb
            .dial_tcp(&Metadata::tcp(), &DialOptions::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no proxy"));

        let fb = group(vec![Member::new("a", true, true) as Arc<dyn OutboundProxy>], true);
        assert!(!fb.support_udp().await);
    }

    #[tokio::test]
    async fn test_fallback_status_and_unwrap() {
        let fb = group(
            vec![Member::new("a", false, true) as Arc<dyn OutboundProxy>, Member::new("b", true, true)],
            false,
        );
        let json = serde_json::to_string(&fb.status().await).unwrap();
        assert_eq!(json, r#"{"type":"Fallback","now":"b","all":["a","b"]}"#);

        let inner = fb.unwrap_proxy(&Metadata::tcp()).await.unwrap();
        assert_eq!(inner.name(), "b");
    }
}
