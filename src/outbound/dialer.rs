//! Socket dialing for outbound adapters
//!
//! All network access of the adapters and groups goes through [`Dialer`],
//! so interface binding and routing marks are applied in one place and
//! tests can substitute in-memory transports.

use super::{BoxedPacket, BoxedStream, PacketConnection};
use crate::common::net::tcp_keep_alive;
use crate::common::NetLocation;
use crate::dns::DnsLookup;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-dial socket options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialOptions {
    /// Bind outgoing sockets to this interface
    pub interface: Option<String>,
    /// SO_MARK for outgoing sockets (Linux only)
    pub routing_mark: Option<u32>,
}

impl DialOptions {
    /// Options of `self` with every value set in `over` taking precedence
    pub fn overlay(&self, over: &DialOptions) -> DialOptions {
        DialOptions {
            interface: over.interface.clone().or_else(|| self.interface.clone()),
            routing_mark: over.routing_mark.or(self.routing_mark),
        }
    }
}

/// Opens raw transports
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect a TCP stream to `addr` (`host:port`), keep-alive tuned
    async fn dial_tcp(&self, addr: &str, opts: &DialOptions) -> Result<BoxedStream>;

    /// Bind an unconnected local UDP socket
    async fn listen_udp(&self, opts: &DialOptions) -> Result<BoxedPacket>;
}

/// Dialer backed by OS sockets
#[derive(Clone, Default)]
pub struct SystemDialer {
    resolver: Option<Arc<dyn DnsLookup>>,
}

impl SystemDialer {
    /// Resolve host names through `resolver` instead of the system resolver
    pub fn with_resolver(resolver: Arc<dyn DnsLookup>) -> Self {
        SystemDialer {
            resolver: Some(resolver),
        }
    }

    async fn resolve(&self, location: &NetLocation) -> Result<SocketAddr> {
        resolve_location(self.resolver.as_deref(), location).await
    }
}

async fn resolve_location(
    resolver: Option<&dyn DnsLookup>,
    location: &NetLocation,
) -> Result<SocketAddr> {
    if let Some(addr) = location.to_socket_addr() {
        return Ok(addr);
    }

    let host = location.address.to_host();
    match resolver {
        Some(resolver) => resolver
            .lookup_ip(&host)
            .await?
            .first()
            .map(|ip| SocketAddr::new(*ip, location.port))
            .ok_or_else(|| Error::dns(format!("cannot resolve ip: {}", host))),
        None => tokio::net::lookup_host((host.as_str(), location.port))
            .await?
            .next()
            .ok_or_else(|| Error::dns(format!("cannot resolve ip: {}", host))),
    }
}

fn apply_socket_options(socket: &socket2::Socket, opts: &DialOptions) -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        if let Some(interface) = &opts.interface {
            socket.bind_device(Some(interface.as_bytes()))?;
        }
        if let Some(mark) = opts.routing_mark {
            socket.set_mark(mark)?;
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let _ = socket;
        if opts.interface.is_some() || opts.routing_mark.is_some() {
            debug!("Interface binding and routing marks are only applied on Linux");
        }
    }

    Ok(())
}

#[async_trait]
impl Dialer for SystemDialer {
    async fn dial_tcp(&self, addr: &str, opts: &DialOptions) -> Result<BoxedStream> {
        let location: NetLocation = addr.parse()?;
        let endpoint = self.resolve(&location).await?;

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(endpoint),
            socket2::Type::STREAM,
            None,
        )?;
        apply_socket_options(&socket, opts)?;
        socket.set_nonblocking(true)?;

        let stream = timeout(
            CONNECT_TIMEOUT,
            TcpSocket::from_std_stream(socket.into()).connect(endpoint),
        )
        .await
        .map_err(|_| Error::timeout(format!("connect to {} timed out", addr)))?
        .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", addr, e)))?;

        tcp_keep_alive(&stream);
        debug!("Dialed {} ({})", addr, endpoint);
        Ok(Box::new(stream))
    }

    async fn listen_udp(&self, opts: &DialOptions) -> Result<BoxedPacket> {
        let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None)?;
        apply_socket_options(&socket, opts)?;
        socket.set_nonblocking(true)?;
        let bind: SocketAddr = (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into();
        socket.bind(&bind.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!("Bound UDP socket {}", socket.local_addr()?);
        Ok(Box::new(UdpPacketConn {
            socket,
            resolver: self.resolver.clone(),
        }))
    }
}

/// Local UDP socket addressed per datagram
pub struct UdpPacketConn {
    socket: UdpSocket,
    resolver: Option<Arc<dyn DnsLookup>>,
}

impl UdpPacketConn {
    pub fn new(socket: UdpSocket) -> Self {
        UdpPacketConn {
            socket,
            resolver: None,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl PacketConnection for UdpPacketConn {
    async fn send_to(&self, buf: &[u8], target: &NetLocation) -> Result<usize> {
        let addr = resolve_location(self.resolver.as_deref(), target).await?;
        Ok(self.socket.send_to(buf, addr).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, NetLocation)> {
        let (n, from) = self.socket.recv_from(buf).await?;
        Ok((n, NetLocation::from(from)))
    }
}
