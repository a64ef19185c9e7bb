//! Direct outbound (no proxy)

use super::{
    BoxedPacket, BoxedStream, Conn, DialOptions, Dialer, OutboundProxy, PacketConn,
    PacketTransport, ProxyType, UdpOverTcp,
};
use crate::common::Metadata;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Direct connection (no proxy)
pub struct Direct {
    name: String,
    dialer: Arc<dyn Dialer>,
}

impl Direct {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self::with_name("DIRECT".to_string(), dialer)
    }

    pub fn with_name(name: String, dialer: Arc<dyn Dialer>) -> Self {
        Direct { name, dialer }
    }
}

#[async_trait]
impl OutboundProxy for Direct {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Direct
    }

    fn addr(&self) -> &str {
        ""
    }

    async fn support_udp(&self) -> bool {
        true
    }

    async fn dial_tcp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<Conn> {
        let addr = metadata.remote_address();
        debug!("Direct connecting to {}", addr);

        let stream = self.dialer.dial_tcp(&addr, opts).await?;

        debug!("Direct connected to {}", addr);
        Ok(Conn::new(stream, self.name.clone()))
    }

    async fn listen_udp(&self, _metadata: &Metadata, opts: &DialOptions) -> Result<PacketConn> {
        let pc = self.dialer.listen_udp(opts).await?;
        Ok(PacketConn::new(pc, self.name.clone()))
    }

    /// A direct hop adds nothing to a stream that already reaches the target.
    async fn stream_conn(&self, stream: BoxedStream, _metadata: &Metadata) -> Result<BoxedStream> {
        Ok(stream)
    }

    async fn stream_packet_conn(
        &self,
        transport: PacketTransport,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        match transport {
            PacketTransport::Datagram(pc) => Ok(pc),
            PacketTransport::Stream(stream) => Ok(Box::new(UdpOverTcp::new(stream))),
        }
    }

    async fn stream_socks5_packet_conn(
        &self,
        _control: BoxedStream,
        _data: BoxedPacket,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        Err(Error::unsupported("direct outbound cannot negotiate SOCKS5 UDP"))
    }
}
