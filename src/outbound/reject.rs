//! Reject outbound (block connections)

use super::{
    BoxedPacket, BoxedStream, Conn, DialOptions, OutboundProxy, PacketConn, PacketTransport,
    ProxyType,
};
use crate::common::Metadata;
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

/// Refuses every connection
pub struct Reject {
    name: String,
}

impl Reject {
    pub fn new() -> Self {
        Self::with_name("REJECT".to_string())
    }

    pub fn with_name(name: String) -> Self {
        Reject { name }
    }

    fn refuse(&self, metadata: &Metadata) -> Error {
        debug!("{} connection to {}", self.name, metadata.remote_address());
        Error::proxy(format!("{} rejected {}", self.name, metadata.remote_address()))
    }
}

impl Default for Reject {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundProxy for Reject {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Reject
    }

    fn addr(&self) -> &str {
        ""
    }

    async fn support_udp(&self) -> bool {
        true
    }

    async fn dial_tcp(&self, metadata: &Metadata, _opts: &DialOptions) -> Result<Conn> {
        Err(self.refuse(metadata))
    }

    async fn listen_udp(&self, metadata: &Metadata, _opts: &DialOptions) -> Result<PacketConn> {
        Err(self.refuse(metadata))
    }

    async fn stream_conn(&self, _stream: BoxedStream, metadata: &Metadata) -> Result<BoxedStream> {
        Err(self.refuse(metadata))
    }

    async fn stream_packet_conn(
        &self,
        _transport: PacketTransport,
        metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        Err(self.refuse(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reject_refuses() {
        let reject = Reject::new();
        assert_eq!(reject.name(), "REJECT");
        assert_eq!(reject.proxy_type(), ProxyType::Reject);

        let metadata = Metadata::tcp()
            .with_host("blocked.example".to_string())
            .with_dst_port(443);
        let err = reject
            .dial_tcp(&metadata, &DialOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Proxy(_)));
        assert!(err.to_string().contains("blocked.example:443"));
    }
}
