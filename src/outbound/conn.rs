//! Connections handed back to callers, tagged with the proxies they went through

use super::{BoxedPacket, BoxedStream, PacketConnection};
use crate::common::NetLocation;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// TCP connection produced by an outbound
pub struct Conn {
    inner: BoxedStream,
    chains: Vec<String>,
}

impl Conn {
    pub fn new(inner: BoxedStream, name: impl Into<String>) -> Self {
        Conn {
            inner,
            chains: vec![name.into()],
        }
    }

    /// Proxy names from the innermost adapter outwards
    pub fn chains(&self) -> &[String] {
        &self.chains
    }

    /// Record a group that delegated to this connection
    pub fn append_to_chains(&mut self, name: &str) {
        self.chains.push(name.to_string());
    }

    pub fn into_inner(self) -> BoxedStream {
        self.inner
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn").field("chains", &self.chains).finish()
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// UDP channel produced by an outbound
pub struct PacketConn {
    inner: BoxedPacket,
    chains: Vec<String>,
}

impl PacketConn {
    pub fn new(inner: BoxedPacket, name: impl Into<String>) -> Self {
        PacketConn {
            inner,
            chains: vec![name.into()],
        }
    }

    pub fn chains(&self) -> &[String] {
        &self.chains
    }

    pub fn append_to_chains(&mut self, name: &str) {
        self.chains.push(name.to_string());
    }

    pub fn into_inner(self) -> BoxedPacket {
        self.inner
    }
}

impl fmt::Debug for PacketConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketConn")
            .field("chains", &self.chains)
            .finish()
    }
}

#[async_trait]
impl PacketConnection for PacketConn {
    async fn send_to(&self, buf: &[u8], target: &NetLocation) -> Result<usize> {
        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, NetLocation)> {
        self.inner.recv_from(buf).await
    }
}
