//! SOCKS5 proxy outbound
//!
//! Implements SOCKS5 (RFC 1928) CONNECT for streams and UDP ASSOCIATE for
//! datagrams. Both can run over a transport that is itself tunnelled, which
//! is how a SOCKS5 server in the middle of a relay chain is reached.

use super::{
    BoxedPacket, BoxedStream, Conn, DialOptions, Dialer, OutboundProxy, PacketConn,
    PacketConnection, PacketTransport, ProxyType,
};
use crate::common::socks::{self, Command, Credentials};
use crate::common::{Address, Metadata, NetLocation};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Handshake timeout
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// RSV + FRAG + longest address (domain) + port
const MAX_UDP_HEADER_LEN: usize = 3 + 1 + 1 + 255 + 2;

/// SOCKS5 proxy outbound
pub struct Socks5Proxy {
    name: String,
    server: String,
    addr: String,
    credentials: Option<Credentials>,
    udp: bool,
    dialer: Arc<dyn Dialer>,
}

impl Socks5Proxy {
    pub fn new(
        name: String,
        server: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        udp: bool,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let addr = NetLocation::new(Address::from(server.clone()), port).to_string();
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Socks5Proxy {
            name,
            server,
            addr,
            credentials,
            udp,
            dialer,
        }
    }

    /// Negotiate UDP ASSOCIATE on `control` and return the relay endpoint.
    async fn associate(&self, control: &mut BoxedStream) -> Result<NetLocation> {
        let any = NetLocation::new(Address::Ipv4(Ipv4Addr::UNSPECIFIED), 0);
        let mut relay = timeout(
            HANDSHAKE_TIMEOUT,
            socks::client_handshake(control, self.credentials.as_ref(), Command::UdpAssociate, &any),
        )
        .await??;

        // Servers commonly answer with 0.0.0.0, meaning "the address you reached me on".
        if relay.address.to_ip().is_some_and(|ip| ip.is_unspecified()) {
            relay.address = Address::from(self.server.clone());
        }
        debug!("[{}] UDP relay at {}", self.name, relay);
        Ok(relay)
    }
}

#[async_trait]
impl OutboundProxy for Socks5Proxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks5
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn support_udp(&self) -> bool {
        self.udp
    }

    async fn dial_tcp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<Conn> {
        debug!(
            "[{}] SOCKS5 proxy connecting to {} via {}",
            self.name,
            metadata.remote_address(),
            self.addr
        );

        let stream = self.dialer.dial_tcp(&self.addr, opts).await?;
        let stream = self.stream_conn(stream, metadata).await?;
        Ok(Conn::new(stream, self.name.clone()))
    }

    async fn listen_udp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<PacketConn> {
        if !self.udp {
            return Err(Error::unsupported(format!("[{}] UDP is disabled", self.name)));
        }

        let control = self.dialer.dial_tcp(&self.addr, opts).await?;
        let data = self.dialer.listen_udp(opts).await?;
        let pc = self.stream_socks5_packet_conn(control, data, metadata).await?;
        Ok(PacketConn::new(pc, self.name.clone()))
    }

    async fn stream_conn(&self, mut stream: BoxedStream, metadata: &Metadata) -> Result<BoxedStream> {
        timeout(
            HANDSHAKE_TIMEOUT,
            socks::client_handshake(
                &mut stream,
                self.credentials.as_ref(),
                Command::Connect,
                &metadata.location(),
            ),
        )
        .await??;

        debug!("[{}] SOCKS5 connected to {}", self.name, metadata.remote_address());
        Ok(stream)
    }

    async fn stream_packet_conn(
        &self,
        transport: PacketTransport,
        metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        match transport {
            PacketTransport::Datagram(data) => {
                let control = self.dialer.dial_tcp(&self.addr, &DialOptions::default()).await?;
                self.stream_socks5_packet_conn(control, data, metadata).await
            }
            PacketTransport::Stream(_) => Err(Error::unsupported(format!(
                "[{}] SOCKS5 UDP needs a datagram carrier",
                self.name
            ))),
        }
    }

    async fn stream_socks5_packet_conn(
        &self,
        mut control: BoxedStream,
        data: BoxedPacket,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        let relay = self.associate(&mut control).await?;
        Ok(Box::new(Socks5PacketConn::new(control, data, relay)))
    }
}

/// Datagrams relayed through a SOCKS5 UDP association
pub struct Socks5PacketConn {
    /// The association lives as long as this stream stays open.
    _control: BoxedStream,
    data: BoxedPacket,
    relay: NetLocation,
}

impl Socks5PacketConn {
    pub fn new(control: BoxedStream, data: BoxedPacket, relay: NetLocation) -> Self {
        Socks5PacketConn {
            _control: control,
            data,
            relay,
        }
    }

    pub fn relay(&self) -> &NetLocation {
        &self.relay
    }
}

#[async_trait]
impl PacketConnection for Socks5PacketConn {
    async fn send_to(&self, buf: &[u8], target: &NetLocation) -> Result<usize> {
        let packet = socks::encode_udp_packet(target, buf)?;
        self.data.send_to(&packet, &self.relay).await?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, NetLocation)> {
        let mut packet = vec![0u8; buf.len() + MAX_UDP_HEADER_LEN];
        let (n, _) = self.data.recv_from(&mut packet).await?;
        let (source, offset) = socks::decode_udp_packet(&packet[..n])?;

        let payload = &packet[offset..n];
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok((len, source))
    }
}
