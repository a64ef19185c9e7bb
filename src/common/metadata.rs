//! Connection metadata

use super::net::{Address, NetLocation};
use crate::Result;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "TCP"),
            Network::Udp => write!(f, "UDP"),
        }
    }
}

/// Routing metadata for one dial request
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Network type (TCP/UDP)
    pub network: Network,

    /// Source IP address
    pub src_ip: IpAddr,

    /// Source port
    pub src_port: u16,

    /// Destination IP address (may be unset if only host is known)
    pub dst_ip: Option<IpAddr>,

    /// Destination port
    pub dst_port: u16,

    /// Destination host (domain name)
    pub host: String,
}

impl Metadata {
    /// Create new metadata
    pub fn new(network: Network) -> Self {
        Metadata {
            network,
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_ip: None,
            dst_port: 0,
            host: String::new(),
        }
    }

    /// Create TCP metadata
    pub fn tcp() -> Self {
        Self::new(Network::Tcp)
    }

    /// Create UDP metadata
    pub fn udp() -> Self {
        Self::new(Network::Udp)
    }

    /// Set source address
    pub fn with_source(mut self, addr: SocketAddr) -> Self {
        self.src_ip = addr.ip();
        self.src_port = addr.port();
        self
    }

    /// Set destination IP
    pub fn with_dst_ip(mut self, ip: IpAddr) -> Self {
        self.dst_ip = Some(ip);
        self
    }

    /// Set destination port
    pub fn with_dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    /// Set destination host
    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Set network
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Check if destination is resolved
    pub fn resolved(&self) -> bool {
        self.dst_ip.is_some()
    }

    /// Get remote address string (for dialing)
    pub fn remote_address(&self) -> String {
        self.location().to_string()
    }

    /// Destination as a network location, preferring the host name
    pub fn location(&self) -> NetLocation {
        let address = if !self.host.is_empty() {
            Address::from(self.host.clone())
        } else if let Some(ip) = self.dst_ip {
            Address::from(ip)
        } else {
            Address::from(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        };
        NetLocation::new(address, self.dst_port)
    }

    /// Destination as a socket address, if resolved
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.dst_ip.map(|ip| SocketAddr::new(ip, self.dst_port))
    }

    /// Source address as `ip:port`
    pub fn source_detail(&self) -> String {
        SocketAddr::new(self.src_ip, self.src_port).to_string()
    }

    /// Check if metadata is valid
    pub fn valid(&self) -> bool {
        self.dst_port > 0 && (!self.host.is_empty() || self.dst_ip.is_some())
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} --> {}",
            self.network,
            self.source_detail(),
            self.remote_address()
        )
    }
}

/// Build synthetic TCP metadata pointing at `raw` (`host:port`).
///
/// IP literals populate `dst_ip` and leave `host` empty; names populate
/// `host` and leave the destination unresolved.
pub fn addr_to_metadata(raw: &str) -> Result<Metadata> {
    let location: NetLocation = raw.parse()?;
    let metadata = Metadata::tcp().with_dst_port(location.port);
    Ok(match location.address {
        Address::Domain(host) => metadata.with_host(host),
        other => match other.to_ip() {
            Some(ip) => metadata.with_dst_ip(ip),
            None => metadata,
        },
    })
}
