//! Outbound adapters
//!
//! Every upstream, including the groups built on top of them, implements
//! [`OutboundProxy`]. Besides dialing a destination directly, an adapter can
//! upgrade an existing stream or packet channel through itself, which is what
//! lets the relay group stack several of them into one tunnel.

mod conn;
pub mod dialer;
mod direct;
mod http;
mod reject;
mod socks5;
pub mod uot;

pub use conn::{Conn, PacketConn};
pub use dialer::{DialOptions, Dialer, SystemDialer};
pub use direct::Direct;
pub use http::HttpProxy;
pub use reject::Reject;
pub use socks5::{Socks5PacketConn, Socks5Proxy};
pub use uot::UdpOverTcp;

use crate::common::{Metadata, NetLocation};
use crate::config::ProxyConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Proxy type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    Direct,
    Reject,
    Http,
    Socks5,
    Shadowsocks,
    ShadowsocksR,
    Vmess,
    Trojan,
    Vless,
    Hysteria2,
    WireGuard,
    Relay,
    Fallback,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Direct => write!(f, "Direct"),
            ProxyType::Reject => write!(f, "Reject"),
            ProxyType::Http => write!(f, "Http"),
            ProxyType::Socks5 => write!(f, "Socks5"),
            ProxyType::Shadowsocks => write!(f, "Shadowsocks"),
            ProxyType::ShadowsocksR => write!(f, "ShadowsocksR"),
            ProxyType::Vmess => write!(f, "Vmess"),
            ProxyType::Trojan => write!(f, "Trojan"),
            ProxyType::Vless => write!(f, "Vless"),
            ProxyType::Hysteria2 => write!(f, "Hysteria2"),
            ProxyType::WireGuard => write!(f, "WireGuard"),
            ProxyType::Relay => write!(f, "Relay"),
            ProxyType::Fallback => write!(f, "Fallback"),
        }
    }
}

impl TryFrom<&str> for ProxyType {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(ProxyType::Direct),
            "reject" => Ok(ProxyType::Reject),
            "http" => Ok(ProxyType::Http),
            "socks5" | "socks" => Ok(ProxyType::Socks5),
            "ss" | "shadowsocks" => Ok(ProxyType::Shadowsocks),
            "ssr" | "shadowsocksr" => Ok(ProxyType::ShadowsocksR),
            "vmess" => Ok(ProxyType::Vmess),
            "trojan" => Ok(ProxyType::Trojan),
            "vless" => Ok(ProxyType::Vless),
            "hysteria2" | "hy2" => Ok(ProxyType::Hysteria2),
            "wireguard" | "wg" => Ok(ProxyType::WireGuard),
            "relay" => Ok(ProxyType::Relay),
            "fallback" => Ok(ProxyType::Fallback),
            _ => Err(Error::config(format!("Unknown proxy type: {}", s))),
        }
    }
}

/// Trait for proxy connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ProxyConnection for T {}

pub type BoxedStream = Box<dyn ProxyConnection>;

/// Datagram channel addressed per packet
#[async_trait]
pub trait PacketConnection: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: &NetLocation) -> Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, NetLocation)>;
}

pub type BoxedPacket = Box<dyn PacketConnection>;

/// Carrier a packet upgrade runs over
pub enum PacketTransport {
    /// Reliable stream; datagrams have to be framed inside it.
    Stream(BoxedStream),
    /// Raw datagram channel (a local socket or an earlier hop's packet upgrade).
    Datagram(BoxedPacket),
}

impl PacketTransport {
    pub fn is_stream(&self) -> bool {
        matches!(self, PacketTransport::Stream(_))
    }
}

impl fmt::Debug for PacketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketTransport::Stream(_) => f.write_str("PacketTransport::Stream"),
            PacketTransport::Datagram(_) => f.write_str("PacketTransport::Datagram"),
        }
    }
}

/// Trait for outbound proxies and proxy groups
#[async_trait]
pub trait OutboundProxy: Send + Sync {
    /// Get proxy name
    fn name(&self) -> &str;

    /// Get proxy type
    fn proxy_type(&self) -> ProxyType;

    /// Server address as `host:port`
    fn addr(&self) -> &str;

    /// Result of the latest health check
    fn alive(&self) -> bool {
        true
    }

    fn set_alive(&self, _alive: bool) {}

    /// Check if UDP is supported
    async fn support_udp(&self) -> bool;

    /// Dial the destination in `metadata` through this proxy
    async fn dial_tcp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<Conn>;

    /// Open a datagram channel towards `metadata` through this proxy
    async fn listen_udp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<PacketConn>;

    /// Run this proxy's handshake over `stream`, which already reaches the
    /// proxy server, and return a stream to the destination in `metadata`.
    async fn stream_conn(&self, stream: BoxedStream, metadata: &Metadata) -> Result<BoxedStream>;

    /// Packet counterpart of [`stream_conn`](Self::stream_conn).
    async fn stream_packet_conn(
        &self,
        transport: PacketTransport,
        metadata: &Metadata,
    ) -> Result<BoxedPacket>;

    /// UDP ASSOCIATE over an existing control stream, with datagrams carried
    /// by `data`. Only SOCKS5 proxies implement this.
    async fn stream_socks5_packet_conn(
        &self,
        _control: BoxedStream,
        _data: BoxedPacket,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        Err(Error::unsupported(format!(
            "{} is not a SOCKS5 proxy",
            self.name()
        )))
    }

    /// Inner proxy this one currently delegates to, for composite proxies
    async fn unwrap_proxy(&self, _metadata: &Metadata) -> Option<Arc<dyn OutboundProxy>> {
        None
    }

    /// Close the proxy (cleanup resources)
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Proxy manager holding all configured proxies
pub struct ProxyManager {
    proxies: HashMap<String, Arc<dyn OutboundProxy>>,
}

impl ProxyManager {
    pub fn new(configs: &[ProxyConfig], dialer: Arc<dyn Dialer>) -> Result<Self> {
        let mut proxies: HashMap<String, Arc<dyn OutboundProxy>> = HashMap::new();

        // Always add built-in proxies
        proxies.insert("DIRECT".to_string(), Arc::new(Direct::new(dialer.clone())));
        proxies.insert("REJECT".to_string(), Arc::new(Reject::new()));

        for config in configs {
            let proxy = Self::create_proxy(config, dialer.clone())?;
            debug!("Loaded proxy {} ({})", config.name, proxy.proxy_type());
            proxies.insert(config.name.clone(), proxy);
        }

        Ok(ProxyManager { proxies })
    }

    fn create_proxy(config: &ProxyConfig, dialer: Arc<dyn Dialer>) -> Result<Arc<dyn OutboundProxy>> {
        let proxy_type = ProxyType::try_from(config.proxy_type.as_str())?;

        match proxy_type {
            ProxyType::Socks5 => {
                let username = config.get_string("username");
                let password = config.get_string("password");
                let udp = config.get_bool("udp").unwrap_or(false);

                Ok(Arc::new(Socks5Proxy::new(
                    config.name.clone(),
                    config.server.clone(),
                    config.port,
                    username,
                    password,
                    udp,
                    dialer,
                )))
            }
            ProxyType::Http => {
                let username = config.get_string("username");
                let password = config.get_string("password");

                Ok(Arc::new(HttpProxy::new(
                    config.name.clone(),
                    config.server.clone(),
                    config.port,
                    username,
                    password,
                    dialer,
                )))
            }
            ProxyType::Direct => Ok(Arc::new(Direct::with_name(config.name.clone(), dialer))),
            ProxyType::Reject => Ok(Arc::new(Reject::with_name(config.name.clone()))),
            ProxyType::Relay | ProxyType::Fallback => Err(Error::config(format!(
                "{} is a proxy group type, declare {} under proxy-groups",
                proxy_type, config.name
            ))),
            other => Err(Error::unsupported(format!(
                "{} proxies are not built into this crate ({})",
                other, config.name
            ))),
        }
    }

    /// Register an externally built proxy, replacing any proxy of the same name
    pub fn insert(&mut self, proxy: Arc<dyn OutboundProxy>) {
        self.proxies.insert(proxy.name().to_string(), proxy);
    }

    /// Get proxy by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn OutboundProxy>> {
        self.proxies.get(name)
    }

    /// Get all proxy names
    pub fn names(&self) -> Vec<&String> {
        self.proxies.keys().collect()
    }

    /// Get number of proxies
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Iterate over proxies
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn OutboundProxy>)> {
        self.proxies.iter()
    }
}
