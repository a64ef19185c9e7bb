//! UDP chain construction
//!
//! The chain is walked hop by hop while a [`Carrier`] tracks what the data
//! path currently is. Every packet upgrade turns the carrier into a
//! datagram channel; reaching a SOCKS5 hop additionally opens a control
//! connection for its UDP ASSOCIATE.

use super::topology::{capabilities, classify_udp_chain};
use super::{hop_step, Relay};
use crate::common::{addr_to_metadata, Metadata, Network};
use crate::dns::resolve_dns;
use crate::outbound::{
    BoxedPacket, BoxedStream, DialOptions, OutboundProxy, PacketTransport, ProxyType,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Data path built so far
enum Carrier {
    /// Local socket, or the packet channel through the hops passed so far
    Datagram(BoxedPacket),
    /// TCP tunnel reaching the current hop
    Stream(BoxedStream),
    /// Current hop is SOCKS5 and `control` reaches it, waiting for UDP
    /// ASSOCIATE. Datagrams go out through `data`.
    Socks5Pending {
        control: BoxedStream,
        data: BoxedPacket,
    },
}

impl Carrier {
    fn mode(&self) -> &'static str {
        match self {
            Carrier::Datagram(_) => "datagram",
            Carrier::Stream(_) => "stream",
            Carrier::Socks5Pending { .. } => "socks5",
        }
    }

    /// Upgrade through `hop`, towards `metadata`
    async fn upgrade(self, hop: &dyn OutboundProxy, metadata: &Metadata) -> Result<BoxedPacket> {
        match self {
            Carrier::Datagram(pc) => {
                hop.stream_packet_conn(PacketTransport::Datagram(pc), metadata)
                    .await
            }
            Carrier::Stream(stream) => {
                hop.stream_packet_conn(PacketTransport::Stream(stream), metadata)
                    .await
            }
            Carrier::Socks5Pending { control, data } => {
                hop.stream_socks5_packet_conn(control, data, metadata).await
            }
        }
    }
}

impl Relay {
    /// Packet channel to `metadata` through every hop of `hops` (at least
    /// two), finished before `deadline`.
    pub(super) async fn build_packet_chain(
        &self,
        hops: &[Arc<dyn OutboundProxy>],
        metadata: &Metadata,
        opts: &DialOptions,
        deadline: Instant,
    ) -> Result<BoxedPacket> {
        let caps = capabilities(hops).await;
        let last_index = hops.len() - 1;
        let last = &hops[last_index];

        if !caps[last_index].supports_packet_conn(self.udp_fallback_match) {
            return Err(Error::udp_unsupported(last.addr(), last.name()));
        }

        let topology = classify_udp_chain(&caps);
        if topology.segmented {
            warn!(
                "[{}] several TCP-only hops in a UDP chain, tunnelling up to hop {:?} over TCP",
                self.option.name, topology.boundary
            );
        }

        let first = hops[0].as_ref();
        let (mut carrier, mut current) = if caps[0].proxy_type == ProxyType::Socks5 {
            let control =
                hop_step(deadline, first, self.dialer.dial_tcp(first.addr(), opts)).await?;
            let data = hop_step(deadline, first, self.dialer.listen_udp(opts)).await?;
            (Carrier::Socks5Pending { control, data }, 0)
        } else if topology.raw_udp_relay {
            let data = hop_step(deadline, first, self.dialer.listen_udp(opts)).await?;
            (Carrier::Datagram(data), 0)
        } else {
            let boundary = topology.boundary.unwrap_or(last_index);
            let stream = self.stream_chain(&hops[..=boundary], opts, deadline).await?;
            (Carrier::Stream(stream), boundary)
        };

        for next in current + 1..hops.len() {
            let hop = &hops[current];
            if !caps[current].supports_packet_conn(self.udp_fallback_match) {
                return Err(Error::udp_unsupported(hop.addr(), hop.name()));
            }

            let mut next_hop = addr_to_metadata(hops[next].addr())?.with_network(Network::Udp);
            hop_step(
                deadline,
                hops[next].as_ref(),
                resolve_dns(&mut next_hop, self.resolver.as_ref()),
            )
            .await?;

            debug!(
                "[{}] {} ({}) -> {}",
                self.option.name,
                hop.name(),
                carrier.mode(),
                hops[next].addr()
            );
            let pc = hop_step(
                deadline,
                hop.as_ref(),
                carrier.upgrade(hop.as_ref(), &next_hop),
            )
            .await?;

            carrier = if caps[next].proxy_type == ProxyType::Socks5 {
                let control = self.stream_chain(&hops[..=next], opts, deadline).await?;
                Carrier::Socks5Pending { control, data: pc }
            } else {
                Carrier::Datagram(pc)
            };
            current = next;
        }

        hop_step(deadline, last.as_ref(), carrier.upgrade(last.as_ref(), metadata)).await
    }
}
