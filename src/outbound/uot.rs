//! UDP over TCP
//!
//! Datagrams are carried inside a stream as length-delimited frames, each
//! frame holding a SOCKS5-style address followed by the payload.

use super::{BoxedStream, PacketConnection};
use crate::common::{Address, NetLocation};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest datagram accepted in either direction
const MAX_FRAME_LENGTH: usize = 64 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Packet channel framed inside a stream
pub struct UdpOverTcp {
    reader: Mutex<FramedRead<ReadHalf<BoxedStream>, LengthDelimitedCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<BoxedStream>, LengthDelimitedCodec>>,
}

impl UdpOverTcp {
    pub fn new(stream: BoxedStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        UdpOverTcp {
            reader: Mutex::new(FramedRead::new(read_half, codec())),
            writer: Mutex::new(FramedWrite::new(write_half, codec())),
        }
    }
}

#[async_trait]
impl PacketConnection for UdpOverTcp {
    async fn send_to(&self, buf: &[u8], target: &NetLocation) -> Result<usize> {
        let mut frame = BytesMut::with_capacity(target.address.len() + buf.len());
        target.address.write_buf(&mut frame, target.port)?;
        frame.put_slice(buf);

        self.writer.lock().await.send(frame.freeze()).await?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, NetLocation)> {
        let frame = self
            .reader
            .lock()
            .await
            .next()
            .await
            .ok_or_else(|| Error::connection("UDP over TCP stream closed"))??;

        let (address, port, used) = Address::read_buf(&frame)?;
        let payload = &frame[used..];
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, NetLocation::new(address, port)))
    }
}
