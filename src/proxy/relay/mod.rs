//! Relay proxy group - chain every member into one tunnel
//!
//! The first hop is dialed directly; each following hop is reached by
//! upgrading the stream through the previous one with that hop's address as
//! destination, and the last hop is upgraded with the caller's destination.
//! UDP takes the same route, switching from a TCP tunnel to raw datagrams
//! at the point [`classify_udp_chain`] picks.

mod topology;
mod udp;

pub use topology::{capabilities, classify_udp_chain, HopCapability, UdpTopology};

use super::{
    GroupCommonOption, GroupType, ProxyCache, ProxyGroup, DEFAULT_TCP_TIMEOUT, MAX_UNWRAP_DEPTH,
};
use crate::common::{addr_to_metadata, Metadata};
use crate::dns::DnsLookup;
use crate::outbound::{
    BoxedPacket, BoxedStream, Conn, DialOptions, Dialer, Direct, OutboundProxy, PacketConn,
    PacketTransport, ProxyType,
};
use crate::provider::ProxyProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Relay proxy group
pub struct Relay {
    option: GroupCommonOption,
    cache: ProxyCache,
    dialer: Arc<dyn Dialer>,
    direct: Direct,
    resolver: Arc<dyn DnsLookup>,
    udp_fallback_match: bool,
}

impl Relay {
    pub fn new(
        option: GroupCommonOption,
        providers: Vec<Arc<dyn ProxyProvider>>,
        dialer: Arc<dyn Dialer>,
        resolver: Arc<dyn DnsLookup>,
    ) -> Self {
        Self::with_cache(option, ProxyCache::new(providers), dialer, resolver)
    }

    pub fn with_cache(
        option: GroupCommonOption,
        cache: ProxyCache,
        dialer: Arc<dyn Dialer>,
        resolver: Arc<dyn DnsLookup>,
    ) -> Self {
        Relay {
            option,
            cache,
            direct: Direct::new(dialer.clone()),
            dialer,
            resolver,
            udp_fallback_match: false,
        }
    }

    /// Refuse packet upgrades through hops that do not report UDP support
    pub fn with_udp_fallback_match(mut self, enabled: bool) -> Self {
        self.udp_fallback_match = enabled;
        self
    }

    /// Hops for one request: members unwrapped to their leaves, direct
    /// leaves dropped.
    pub async fn chain(&self, metadata: &Metadata) -> Result<Vec<Arc<dyn OutboundProxy>>> {
        let members = self.cache.proxies(true).await;
        let mut hops = Vec::with_capacity(members.len());

        for member in members.iter() {
            let mut leaf = member.clone();
            let mut depth = 0;
            while let Some(inner) = leaf.unwrap_proxy(metadata).await {
                depth += 1;
                if depth > MAX_UNWRAP_DEPTH {
                    return Err(Error::config(format!(
                        "{}: {} unwraps more than {} levels deep",
                        self.option.name, member.name(), MAX_UNWRAP_DEPTH
                    )));
                }
                leaf = inner;
            }

            if leaf.proxy_type() != ProxyType::Direct {
                hops.push(leaf);
            }
        }

        Ok(hops)
    }

    fn chain_timeout(hops: usize) -> Duration {
        DEFAULT_TCP_TIMEOUT * hops as u32
    }

    /// Stream reaching the server of the last entry of `hops`, tunnelled
    /// through all entries before it.
    async fn stream_chain(
        &self,
        hops: &[Arc<dyn OutboundProxy>],
        opts: &DialOptions,
        deadline: Instant,
    ) -> Result<BoxedStream> {
        let first = hops
            .first()
            .ok_or_else(|| Error::proxy(format!("{}: empty chain", self.option.name)))?;

        let mut stream =
            hop_step(deadline, first.as_ref(), self.dialer.dial_tcp(first.addr(), opts)).await?;

        for pair in hops.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            let next_hop = addr_to_metadata(next.addr())?;
            stream = hop_step(
                deadline,
                current.as_ref(),
                current.stream_conn(stream, &next_hop),
            )
            .await?;
            debug!("[{}] {} -> {}", self.option.name, current.name(), next.addr());
        }

        Ok(stream)
    }

    async fn build_stream(
        &self,
        hops: &[Arc<dyn OutboundProxy>],
        metadata: &Metadata,
        opts: &DialOptions,
        deadline: Instant,
    ) -> Result<BoxedStream> {
        let stream = self.stream_chain(hops, opts, deadline).await?;
        let last = &hops[hops.len() - 1];
        hop_step(deadline, last.as_ref(), last.stream_conn(stream, metadata)).await
    }

    fn deadline(hops: usize) -> Instant {
        Instant::now() + Self::chain_timeout(hops)
    }
}

/// Run one step of a chain build on behalf of `hop`.
///
/// Errors and the chain deadline running out are both attributed to the
/// hop's address.
pub(super) async fn hop_step<T>(
    deadline: Instant,
    hop: &dyn OutboundProxy,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout_at(deadline, step).await {
        Ok(result) => result.map_err(|e| Error::hop(hop.addr(), e)),
        Err(_) => Err(Error::hop(
            hop.addr(),
            Error::timeout(format!("[{}] chain deadline exceeded", hop.name())),
        )),
    }
}

/// Chain names from the last hop back to the first
fn hop_chains(hops: &[Arc<dyn OutboundProxy>]) -> impl Iterator<Item = &str> {
    hops.iter().rev().map(|hop| hop.name())
}

#[async_trait]
impl OutboundProxy for Relay {
    fn name(&self) -> &str {
        &self.option.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Relay
    }

    fn addr(&self) -> &str {
        ""
    }

    async fn support_udp(&self) -> bool {
        let members = self.cache.proxies(true).await;
        match members.last() {
            None => true,
            Some(last) => {
                let support_udp = last.support_udp().await;
                HopCapability::new(last.proxy_type(), support_udp).is_raw_udp() || support_udp
            }
        }
    }

    async fn dial_tcp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<Conn> {
        let hops = self.chain(metadata).await?;
        let opts = self.option.dial_options(opts);

        let mut conn = match hops.len() {
            0 => self.direct.dial_tcp(metadata, &opts).await?,
            1 => hops[0].dial_tcp(metadata, &opts).await?,
            n => {
                debug!("[{}] {} over {} hops", self.option.name, metadata, n);
                let stream = self
                    .build_stream(&hops, metadata, &opts, Self::deadline(n))
                    .await?;

                let mut names = hop_chains(&hops);
                let mut conn = Conn::new(stream, names.next().unwrap_or_default());
                for name in names {
                    conn.append_to_chains(name);
                }
                conn
            }
        };

        conn.append_to_chains(&self.option.name);
        Ok(conn)
    }

    async fn listen_udp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<PacketConn> {
        let hops = self.chain(metadata).await?;
        let opts = self.option.dial_options(opts);

        let mut pc = match hops.len() {
            0 => self.direct.listen_udp(metadata, &opts).await?,
            1 => {
                let hop = &hops[0];
                if !hop.support_udp().await {
                    return Err(Error::udp_unsupported(hop.addr(), hop.name()));
                }
                hop.listen_udp(metadata, &opts).await?
            }
            n => {
                debug!("[{}] {} over {} hops", self.option.name, metadata, n);
                let inner = self
                    .build_packet_chain(&hops, metadata, &opts, Self::deadline(n))
                    .await?;

                let mut names = hop_chains(&hops);
                let mut pc = PacketConn::new(inner, names.next().unwrap_or_default());
                for name in names {
                    pc.append_to_chains(name);
                }
                pc
            }
        };

        pc.append_to_chains(&self.option.name);
        Ok(pc)
    }

    async fn stream_conn(&self, _stream: BoxedStream, _metadata: &Metadata) -> Result<BoxedStream> {
        Err(Error::unsupported(format!(
            "{} is a relay group and cannot be a hop",
            self.option.name
        )))
    }

    async fn stream_packet_conn(
        &self,
        _transport: PacketTransport,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        Err(Error::unsupported(format!(
            "{} is a relay group and cannot be a hop",
            self.option.name
        )))
    }
}

#[async_trait]
impl ProxyGroup for Relay {
    fn group_type(&self) -> GroupType {
        GroupType::Relay
    }

    async fn now(&self) -> Option<String> {
        None
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
    use crate::outbound::{HttpProxy, Reject, SystemDialer};
    use crate::provider::{HealthCheck, InlineProvider, VehicleType};
    use std::net::IpAddr;

    struct NoLookup;

    #[async_trait]
    impl DnsLookup for NoLookup {
        async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
            Err(Error::dns(format!("no records for {}", host)))
        }
    }

    /// Composite that unwraps `depth` times before reaching a reject leaf
    struct Nested {
        name: String,
        depth: usize,
    }

    #[async_trait]
    impl OutboundProxy for Nested {
        fn name(&self) -> &str {
            &self.name
        }

        fn proxy_type(&self) -> ProxyType {
            ProxyType::Fallback
        }

        fn addr(&self) -> &str {
            ""
        }

        async fn support_udp(&self) -> bool {
            false
        }

        async fn dial_tcp(&self, _: &Metadata, _: &DialOptions) -> Result<Conn> {
            Err(Error::unsupported("nested"))
        }

        async fn listen_udp(&self, _: &Metadata, _: &DialOptions) -> Result<PacketConn> {
            Err(Error::unsupported("nested"))
        }

        async fn stream_conn(&self, _: BoxedStream, _: &Metadata) -> Result<BoxedStream> {
            Err(Error::unsupported("nested"))
        }

        async fn stream_packet_conn(&self, _: PacketTransport, _: &Metadata) -> Result<BoxedPacket> {
            Err(Error::unsupported("nested"))
        }

        async fn unwrap_proxy(&self, _: &Metadata) -> Option<Arc<dyn OutboundProxy>> {
            if self.depth == 0 {
                Some(Arc::new(Reject::with_name(format!("{}-leaf", self.name))))
            } else {
                Some(Arc::new(Nested {
                    name: self.name.clone(),
                    depth: self.depth - 1,
                }))
            }
        }
    }

    fn http_hop() -> Arc<dyn OutboundProxy> {
        Arc::new(HttpProxy::new(
            "web".to_string(),
            "10.0.0.2".to_string(),
            8080,
            None,
            None,
            Arc::new(SystemDialer::default()),
        ))
    }

    fn relay(members: Vec<Arc<dyn OutboundProxy>>) -> Relay {
        let dialer: Arc<dyn Dialer> = Arc::new(SystemDialer::default());
        let provider: Arc<dyn ProxyProvider> = Arc::new(InlineProvider::new(
            "chain".to_string(),
            VehicleType::Compatible,
            members,
            Arc::new(HealthCheck::new(String::new(), Duration::ZERO, true)),
        ));
        Relay::new(
            GroupCommonOption::new("chain"),
            vec![provider],
            dialer,
            Arc::new(NoLookup),
        )
    }

    #[tokio::test]
    async fn test_chain_unwraps_and_drops_direct() {
        let dialer: Arc<dyn Dialer> = Arc::new(SystemDialer::default());
        let group = relay(vec![
            Arc::new(Direct::new(dialer)) as Arc<dyn OutboundProxy>,
            Arc::new(Nested {
                name: "auto".to_string(),
                depth: 3,
            }),
            Arc::new(Reject::with_name("tail".to_string())),
        ]);

        let names: Vec<String> = group
            .chain(&Metadata::tcp())
            .await
            .unwrap()
            .iter()
            .map(|hop| hop.name().to_string())
            .collect();
        assert_eq!(names, vec!["auto-leaf", "tail"]);
        assert_eq!(group.all().await, vec!["DIRECT", "auto", "tail"]);
    }

    #[tokio::test]
    async fn test_chain_unwrap_depth_is_bounded() {
        let group = relay(vec![Arc::new(Nested {
            name: "loop".to_string(),
            depth: MAX_UNWRAP_DEPTH + 4,
        }) as Arc<dyn OutboundProxy>]);

        let err = group.chain(&Metadata::tcp()).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_single_hop_without_udp_is_rejected() {
        let group = relay(vec![http_hop()]);
        let err = group
            .listen_udp(&Metadata::udp(), &DialOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::UdpUnsupported { .. }));
    }

    #[tokio::test]
    async fn test_relay_status_and_udp_support() {
        let empty = relay(Vec::new());
        assert!(empty.support_udp().await);
        assert_eq!(
            serde_json::to_string(&empty.status().await).unwrap(),
            r#"{"type":"Relay","all":[]}"#
        );

        let group = relay(vec![http_hop()]);
        assert!(!group.support_udp().await);
    }

    #[test]
    fn test_chain_timeout_scales() {
        assert_eq!(Relay::chain_timeout(4), Duration::from_secs(20));
    }
}
