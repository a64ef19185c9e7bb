//! In-process fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use mihomo_outbound::common::NetLocation;
use mihomo_outbound::dns::DnsLookup;
use mihomo_outbound::outbound::{
    BoxedPacket, BoxedStream, PacketConnection, PacketTransport,
};
use mihomo_outbound::provider::{HealthCheck, InlineProvider, ProxyProvider, VehicleType};
use mihomo_outbound::proxy::{GroupCommonOption, ProxyCache};
use mihomo_outbound::{
    Conn, DialOptions, Dialer, Error, Fallback, Metadata, OutboundProxy, PacketConn, ProxyType,
    Relay, Result,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

/// Ordered log of everything the fakes were asked to do
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Packet channel that accepts everything and never receives
pub struct NullPacket;

#[async_trait]
impl PacketConnection for NullPacket {
    async fn send_to(&self, buf: &[u8], _target: &NetLocation) -> Result<usize> {
        Ok(buf.len())
    }

    async fn recv_from(&self, _buf: &mut [u8]) -> Result<(usize, NetLocation)> {
        Err(Error::connection("nothing to receive"))
    }
}

/// Dialer handing out in-memory streams
#[derive(Default)]
pub struct FakeDialer {
    trace: Trace,
    refuse: HashSet<String>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl FakeDialer {
    pub fn new(trace: Trace) -> Self {
        FakeDialer {
            trace,
            ..Default::default()
        }
    }

    pub fn refusing(mut self, addr: &str) -> Self {
        self.refuse.insert(addr.to_string());
        self
    }

    /// Server side of the oldest stream not taken yet
    pub fn take_peer(&self) -> Option<DuplexStream> {
        let mut peers = self.peers.lock();
        (!peers.is_empty()).then(|| peers.remove(0))
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial_tcp(&self, addr: &str, _opts: &DialOptions) -> Result<BoxedStream> {
        self.trace.push(format!("dial {}", addr));
        if self.refuse.contains(addr) {
            return Err(Error::connection("connection refused"));
        }
        let (client, server) = tokio::io::duplex(4096);
        self.peers.lock().push(server);
        Ok(Box::new(client))
    }

    async fn listen_udp(&self, _opts: &DialOptions) -> Result<BoxedPacket> {
        self.trace.push("listen".to_string());
        Ok(Box::new(NullPacket))
    }
}

/// How a [`FakeHop`] misbehaves
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    /// Stream and packet upgrades are refused
    Upgrade,
    /// Stream upgrades never finish
    Stall,
}

/// Proxy recording every operation in a shared [`Trace`]
pub struct FakeHop {
    name: String,
    addr: String,
    proxy_type: ProxyType,
    udp: bool,
    alive: AtomicBool,
    failure: Failure,
    trace: Trace,
    peers: Mutex<Vec<DuplexStream>>,
}

impl FakeHop {
    pub fn new(name: &str, addr: &str, proxy_type: ProxyType, udp: bool, trace: &Trace) -> Self {
        FakeHop {
            name: name.to_string(),
            addr: addr.to_string(),
            proxy_type,
            udp,
            alive: AtomicBool::new(true),
            failure: Failure::None,
            trace: trace.clone(),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = failure;
        self
    }

    pub fn dead(self) -> Self {
        self.alive.store(false, Ordering::SeqCst);
        self
    }

    pub fn arc(self) -> Arc<FakeHop> {
        Arc::new(self)
    }

    pub fn into_proxy(self) -> Arc<dyn OutboundProxy> {
        Arc::new(self)
    }

    pub fn take_peer(&self) -> Option<DuplexStream> {
        let mut peers = self.peers.lock();
        (!peers.is_empty()).then(|| peers.remove(0))
    }
}

fn carrier(transport: &PacketTransport) -> &'static str {
    if transport.is_stream() {
        "stream"
    } else {
        "datagram"
    }
}

#[async_trait]
impl OutboundProxy for FakeHop {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    fn addr(&self) -> &str {
        &self.addr
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

    async fn dial_tcp(&self, metadata: &Metadata, _opts: &DialOptions) -> Result<Conn> {
        self.trace
            .push(format!("{} dial -> {}", self.name, metadata.remote_address()));
        let (client, server) = tokio::io::duplex(4096);
        self.peers.lock().push(server);
        Ok(Conn::new(Box::new(client), self.name.clone()))
    }

    async fn listen_udp(&self, metadata: &Metadata, _opts: &DialOptions) -> Result<PacketConn> {
        self.trace
            .push(format!("{} listen -> {}", self.name, metadata.remote_address()));
        Ok(PacketConn::new(Box::new(NullPacket), self.name.clone()))
    }

    async fn stream_conn(&self, stream: BoxedStream, metadata: &Metadata) -> Result<BoxedStream> {
        match self.failure {
            Failure::Upgrade => return Err(Error::connection("handshake refused")),
            Failure::Stall => std::future::pending::<()>().await,
            Failure::None => {}
        }
        self.trace
            .push(format!("{} stream -> {}", self.name, metadata.remote_address()));
        Ok(stream)
    }

    async fn stream_packet_conn(
        &self,
        transport: PacketTransport,
        metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        if self.failure == Failure::Upgrade {
            return Err(Error::connection("handshake refused"));
        }
        self.trace.push(format!(
            "{} packet[{}] -> {}",
            self.name,
            carrier(&transport),
            metadata.remote_address()
        ));
        Ok(Box::new(NullPacket))
    }

    async fn stream_socks5_packet_conn(
        &self,
        _control: BoxedStream,
        _data: BoxedPacket,
        metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        if self.proxy_type != ProxyType::Socks5 {
            return Err(Error::unsupported(format!("{} is not a SOCKS5 proxy", self.name)));
        }
        self.trace
            .push(format!("{} socks5 -> {}", self.name, metadata.remote_address()));
        Ok(Box::new(NullPacket))
    }
}

/// Resolver answering from a fixed table
#[derive(Default)]
pub struct FakeDns {
    records: HashMap<String, IpAddr>,
    lookups: Mutex<Vec<String>>,
}

impl FakeDns {
    pub fn with(mut self, host: &str, ip: &str) -> Self {
        self.records.insert(host.to_string(), ip.parse().unwrap());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl DnsLookup for FakeDns {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.lookups.lock().push(host.to_string());
        match self.records.get(host) {
            Some(ip) => Ok(vec![*ip]),
            None => Err(Error::dns(format!("no records for {}", host))),
        }
    }
}

pub fn provider(name: &str, members: Vec<Arc<dyn OutboundProxy>>) -> Arc<dyn ProxyProvider> {
    Arc::new(InlineProvider::new(
        name.to_string(),
        VehicleType::Compatible,
        members,
        Arc::new(HealthCheck::new(String::new(), Duration::ZERO, true)),
    ))
}

pub fn relay(
    members: Vec<Arc<dyn OutboundProxy>>,
    dialer: Arc<dyn Dialer>,
    dns: Arc<dyn DnsLookup>,
) -> Relay {
    Relay::new(
        GroupCommonOption::new("chain"),
        vec![provider("chain", members)],
        dialer,
        dns,
    )
}

/// Fallback group that re-reads its members on every call
pub fn fallback(members: Vec<Arc<dyn OutboundProxy>>) -> Fallback {
    Fallback::with_cache(
        GroupCommonOption::new("auto"),
        ProxyCache::with_ttl(vec![provider("auto", members)], Duration::ZERO),
    )
}

pub fn target() -> Metadata {
    Metadata::tcp()
        .with_host("example.com".to_string())
        .with_dst_port(443)
}

pub fn udp_target() -> Metadata {
    Metadata::udp()
        .with_dst_ip("8.8.8.8".parse().unwrap())
        .with_dst_port(53)
}
