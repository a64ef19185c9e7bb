//! UDP topology of a relay chain
//!
//! Decides which part of a chain has to be tunnelled over TCP and from
//! which hop onwards datagrams can travel natively.

use crate::outbound::{OutboundProxy, ProxyType};
use std::sync::Arc;

/// What the UDP builder needs to know about one hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopCapability {
    pub proxy_type: ProxyType,
    pub support_udp: bool,
}

impl HopCapability {
    pub fn new(proxy_type: ProxyType, support_udp: bool) -> Self {
        HopCapability {
            proxy_type,
            support_udp,
        }
    }

    /// Hop can forward raw datagrams even in the middle of a chain
    pub fn is_raw_udp(&self) -> bool {
        match self.proxy_type {
            ProxyType::Shadowsocks | ProxyType::ShadowsocksR => self.support_udp,
            ProxyType::WireGuard | ProxyType::Socks5 => true,
            _ => false,
        }
    }

    /// Hop accepts a packet upgrade.
    ///
    /// A hop without UDP support is still tried unless `udp_fallback_match`
    /// is set. Shadowsocks hops without UDP never qualify.
    pub fn supports_packet_conn(&self, udp_fallback_match: bool) -> bool {
        if matches!(
            self.proxy_type,
            ProxyType::Shadowsocks | ProxyType::ShadowsocksR
        ) && !self.support_udp
        {
            return false;
        }
        self.support_udp || !udp_fallback_match
    }
}

/// Capabilities of every hop, in chain order
pub async fn capabilities(hops: &[Arc<dyn OutboundProxy>]) -> Vec<HopCapability> {
    let mut caps = Vec::with_capacity(hops.len());
    for hop in hops {
        caps.push(HopCapability::new(hop.proxy_type(), hop.support_udp().await));
    }
    caps
}

/// Result of [`classify_udp_chain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpTopology {
    /// Every hop carries raw datagrams; no TCP tunnel is needed
    pub raw_udp_relay: bool,
    /// Last hop reached over TCP before datagrams take over. `None` when the
    /// chain is a pure raw relay.
    pub boundary: Option<usize>,
    /// More than one TCP-only hop sits in the chain. Only the one closest
    /// to the tail is used as the boundary; everything before it is
    /// tunnelled over TCP.
    pub segmented: bool,
}

/// Classify a chain by scanning it from the tail.
///
/// When the last hop is raw-UDP capable, the boundary is the first hop
/// seen from the tail that is not. When the last hop is not, the boundary
/// is the last hop itself and the whole chain is tunnelled over TCP.
pub fn classify_udp_chain(hops: &[HopCapability]) -> UdpTopology {
    let Some(last) = hops.last() else {
        return UdpTopology {
            raw_udp_relay: true,
            boundary: None,
            segmented: false,
        };
    };

    let last_index = hops.len() - 1;
    let last_is_raw = last.is_raw_udp();
    let mut over_tcp = false;
    let mut boundary = None;
    let mut tcp_only = 0;

    for (i, hop) in hops.iter().enumerate().rev() {
        if !hop.is_raw_udp() {
            over_tcp = true;
            tcp_only += 1;
        }
        if last_is_raw && over_tcp && boundary.is_none() {
            boundary = Some(i);
        }
    }

    if !last_is_raw {
        boundary = Some(last_index);
    }

    UdpTopology {
        raw_udp_relay: !over_tcp,
        boundary,
        segmented: tcp_only > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(proxy_type: ProxyType, support_udp: bool) -> HopCapability {
        HopCapability::new(proxy_type, support_udp)
    }

    #[test]
    fn test_raw_udp_capability() {
        assert!(hop(ProxyType::Shadowsocks, true).is_raw_udp());
        assert!(!hop(ProxyType::Shadowsocks, false).is_raw_udp());
        assert!(!hop(ProxyType::ShadowsocksR, false).is_raw_udp());
        assert!(hop(ProxyType::WireGuard, false).is_raw_udp());
        assert!(hop(ProxyType::Socks5, false).is_raw_udp());
        assert!(!hop(ProxyType::Http, false).is_raw_udp());
        assert!(!hop(ProxyType::Vmess, true).is_raw_udp());
    }

    #[test]
    fn test_supports_packet_conn() {
        assert!(!hop(ProxyType::Shadowsocks, false).supports_packet_conn(false));
        assert!(hop(ProxyType::Shadowsocks, true).supports_packet_conn(true));
        assert!(hop(ProxyType::Http, false).supports_packet_conn(false));
        assert!(!hop(ProxyType::Http, false).supports_packet_conn(true));
        assert!(hop(ProxyType::Vmess, true).supports_packet_conn(true));
    }

    #[test]
    fn test_pure_raw_relay() {
        let topology = classify_udp_chain(&[
            hop(ProxyType::Socks5, true),
            hop(ProxyType::Shadowsocks, true),
            hop(ProxyType::WireGuard, true),
        ]);
        assert!(topology.raw_udp_relay);
        assert_eq!(topology.boundary, None);
        assert!(!topology.segmented);
    }

    #[test]
    fn test_boundary_in_the_middle() {
        let topology = classify_udp_chain(&[
            hop(ProxyType::Socks5, true),
            hop(ProxyType::Http, false),
            hop(ProxyType::Shadowsocks, true),
        ]);
        assert!(!topology.raw_udp_relay);
        assert_eq!(topology.boundary, Some(1));
    }

    #[test]
    fn test_tcp_only_tail() {
        let topology = classify_udp_chain(&[
            hop(ProxyType::Shadowsocks, true),
            hop(ProxyType::WireGuard, true),
            hop(ProxyType::Vmess, true),
        ]);
        assert!(!topology.raw_udp_relay);
        assert_eq!(topology.boundary, Some(2));
    }

    #[test]
    fn test_boundary_closest_to_tail_wins() {
        let topology = classify_udp_chain(&[
            hop(ProxyType::Http, false),
            hop(ProxyType::Shadowsocks, true),
            hop(ProxyType::Trojan, true),
            hop(ProxyType::WireGuard, true),
        ]);
        assert!(!topology.raw_udp_relay);
        assert_eq!(topology.boundary, Some(2));
        assert!(topology.segmented);
    }

    #[test]
    fn test_empty_chain() {
        let topology = classify_udp_chain(&[]);
        assert!(topology.raw_udp_relay);
        assert_eq!(topology.boundary, None);
    }
}
