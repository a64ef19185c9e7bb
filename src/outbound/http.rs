//! HTTP proxy outbound
//!
//! Implements HTTP CONNECT method for tunneling TCP connections
//! through an HTTP proxy server.

use super::{
    BoxedPacket, BoxedStream, Conn, DialOptions, Dialer, OutboundProxy, PacketConn,
    PacketTransport, ProxyType,
};
use crate::common::{Address, Metadata, NetLocation};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

/// Handshake timeout
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP proxy outbound
pub struct HttpProxy {
    name: String,
    addr: String,
    username: Option<String>,
    password: Option<String>,
    dialer: Arc<dyn Dialer>,
}

impl HttpProxy {
    pub fn new(
        name: String,
        server: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        HttpProxy {
            name,
            addr: NetLocation::new(Address::from(server), port).to_string(),
            username,
            password,
            dialer,
        }
    }

    /// Build the Authorization header value
    fn auth_header(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                let credentials = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                Some(format!("Basic {}", encoded))
            }
            _ => None,
        }
    }

    /// Perform HTTP CONNECT handshake
    async fn http_connect<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: &mut S,
        target: &str,
    ) -> Result<()> {
        let mut request = format!(
            "CONNECT {target} HTTP/1.1\r\n\
             Host: {target}\r\n\
             Proxy-Connection: keep-alive\r\n"
        );

        if let Some(auth) = self.auth_header() {
            request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
        }

        request.push_str("\r\n");

        debug!("[{}] Sending CONNECT to {}", self.name, target);

        stream.write_all(request.as_bytes()).await.map_err(|e| {
            Error::connection(format!("Failed to send CONNECT request: {}", e))
        })?;
        stream.flush().await?;

        // Read byte by byte so nothing past the header is consumed
        let mut response = Vec::with_capacity(128);
        let mut byte = [0u8; 1];

        loop {
            let n = stream.read(&mut byte).await.map_err(|e| {
                Error::connection(format!("Failed to read CONNECT response: {}", e))
            })?;

            if n == 0 {
                return Err(Error::connection("Connection closed during CONNECT"));
            }

            response.push(byte[0]);

            if let Some(header_end) = find_header_end(&response) {
                let response_str = String::from_utf8_lossy(&response[..header_end]);
                let status_line = response_str.lines().next().unwrap_or("");

                return match status_line.split_whitespace().nth(1) {
                    Some("200") => {
                        debug!("[{}] CONNECT handshake successful", self.name);
                        Ok(())
                    }
                    Some("407") => Err(Error::auth("Proxy authentication required")),
                    _ => Err(Error::connection(format!("CONNECT failed: {}", status_line))),
                };
            }

            if response.len() >= 8192 {
                return Err(Error::connection("CONNECT response too large"));
            }
        }
    }
}

/// Find end of HTTP headers (double CRLF)
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

#[async_trait]
impl OutboundProxy for HttpProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Http
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn support_udp(&self) -> bool {
        false // HTTP CONNECT only supports TCP
    }

    async fn dial_tcp(&self, metadata: &Metadata, opts: &DialOptions) -> Result<Conn> {
        debug!(
            "[{}] HTTP proxy connecting to {} via {}",
            self.name,
            metadata.remote_address(),
            self.addr
        );

        let stream = self.dialer.dial_tcp(&self.addr, opts).await?;
        let stream = self.stream_conn(stream, metadata).await?;
        Ok(Conn::new(stream, self.name.clone()))
    }

    async fn listen_udp(&self, _metadata: &Metadata, _opts: &DialOptions) -> Result<PacketConn> {
        Err(Error::unsupported(format!("[{}] HTTP proxies cannot carry UDP", self.name)))
    }

    async fn stream_conn(&self, mut stream: BoxedStream, metadata: &Metadata) -> Result<BoxedStream> {
        let target = metadata.remote_address();
        timeout(HANDSHAKE_TIMEOUT, self.http_connect(&mut stream, &target))
            .await
            .map_err(|_| Error::timeout(format!("[{}] CONNECT handshake timed out", self.name)))??;
        Ok(stream)
    }

    async fn stream_packet_conn(
        &self,
        _transport: PacketTransport,
        _metadata: &Metadata,
    ) -> Result<BoxedPacket> {
        Err(Error::unsupported(format!("[{}] HTTP proxies cannot carry UDP", self.name)))
    }
}
