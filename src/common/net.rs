//! Network utilities

use crate::{Error, Result};
use bytes::{Buf, BufMut};
use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Idle time before the first keep-alive packet
const KEEP_ALIVE_IDLE: Duration = Duration::from_secs(30);

/// Tune a freshly dialed TCP stream. Best effort: failures are ignored.
#[inline]
pub fn tcp_keep_alive(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let _ = sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEP_ALIVE_IDLE));
}

/// SOCKS5 address type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Parse from SOCKS5 format
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Self, u16)> {
        let mut atyp = [0u8; 1];
        reader.read_exact(&mut atyp).await?;

        match atyp[0] {
            0x01 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((addr, port))
            }
            0x03 => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf[..len].to_vec())
                    .map_err(|e| Error::parse(format!("Invalid domain: {}", e)))?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok((Address::Domain(domain), port))
            }
            0x04 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                let addr = Address::Ipv6(Ipv6Addr::from(ip));
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((addr, port))
            }
            t => Err(Error::protocol(format!("Unknown address type: {}", t))),
        }
    }

    /// Write in SOCKS5 format
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W, port: u16) -> Result<()> {
        let mut buf = Vec::with_capacity(self.len());
        self.write_buf(&mut buf, port)?;
        writer.write_all(&buf).await?;
        Ok(())
    }

    /// Append SOCKS5 encoding to an in-memory buffer
    pub fn write_buf<B: BufMut>(&self, buf: &mut B, port: u16) -> Result<()> {
        match self {
            Address::Ipv4(ip) => {
                buf.put_u8(0x01);
                buf.put_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.put_u8(0x04);
                buf.put_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                if bytes.len() > 255 {
                    return Err(Error::address("Domain name too long"));
                }
                buf.put_u8(0x03);
                buf.put_u8(bytes.len() as u8);
                buf.put_slice(bytes);
            }
        }
        buf.put_u16(port);
        Ok(())
    }

    /// Decode SOCKS5 encoding from the front of `buf`.
    ///
    /// Returns the address, port and the number of bytes consumed.
    pub fn read_buf(mut buf: &[u8]) -> Result<(Self, u16, usize)> {
        let total = buf.len();
        if !buf.has_remaining() {
            return Err(Error::protocol("Empty address"));
        }
        let addr = match buf.get_u8() {
            0x01 => {
                if buf.remaining() < 6 {
                    return Err(Error::protocol("Truncated IPv4 address"));
                }
                let mut ip = [0u8; 4];
                buf.copy_to_slice(&mut ip);
                Address::Ipv4(Ipv4Addr::from(ip))
            }
            0x03 => {
                if !buf.has_remaining() {
                    return Err(Error::protocol("Truncated domain length"));
                }
                let len = buf.get_u8() as usize;
                if buf.remaining() < len + 2 {
                    return Err(Error::protocol("Truncated domain"));
                }
                let domain = String::from_utf8(buf[..len].to_vec())
                    .map_err(|e| Error::parse(format!("Invalid domain: {}", e)))?;
                buf.advance(len);
                Address::Domain(domain)
            }
            0x04 => {
                if buf.remaining() < 18 {
                    return Err(Error::protocol("Truncated IPv6 address"));
                }
                let mut ip = [0u8; 16];
                buf.copy_to_slice(&mut ip);
                Address::Ipv6(Ipv6Addr::from(ip))
            }
            t => return Err(Error::protocol(format!("Unknown address type: {}", t))),
        };
        let port = buf.get_u16();
        Ok((addr, port, total - buf.remaining()))
    }

    /// Get bytes length
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,             // atyp + ip + port
            Address::Ipv6(_) => 1 + 16 + 2,            // atyp + ip + port
            Address::Domain(d) => 1 + 1 + d.len() + 2, // atyp + len + domain + port
        }
    }

    /// Get as IP if resolved
    pub fn to_ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }

    /// Get as domain string
    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => ip.to_string(),
            Address::Domain(d) => d.clone(),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::Ipv6(ip)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(domain: String) -> Self {
        // IPv4-mapped IPv6 literals are unmapped
        match domain.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => Address::Ipv4(v4),
                None => Address::Ipv6(v6),
            },
            Ok(IpAddr::V4(v4)) => Address::Ipv4(v4),
            Err(_) => Address::Domain(domain),
        }
    }
}

/// An address plus port, as written in configuration (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetLocation {
    pub address: Address,
    pub port: u16,
}

impl NetLocation {
    pub fn new(address: Address, port: u16) -> Self {
        NetLocation { address, port }
    }

    /// Socket address if the location is an IP literal
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.address.to_ip().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for NetLocation {
    fn from(addr: SocketAddr) -> Self {
        NetLocation::new(Address::from(addr.ip()), addr.port())
    }
}

impl fmt::Display for NetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Ipv4(ip) => write!(f, "{}:{}", ip, self.port),
            Address::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            Address::Domain(d) => write!(f, "{}:{}", d, self.port),
        }
    }
}

impl FromStr for NetLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::parse(format!("missing port in address {}", s)))?;

        let host = if let Some(inner) = host.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| Error::parse(format!("missing ']' in address {}", s)))?;
            inner
                .parse::<Ipv6Addr>()
                .map_err(|e| Error::parse(format!("invalid IPv6 in address {}: {}", s, e)))?;
            inner
        } else if host.contains(':') {
            return Err(Error::parse(format!("too many colons in address {}", s)));
        } else {
            host
        };

        if host.is_empty() {
            return Err(Error::parse(format!("missing host in address {}", s)));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| Error::parse(format!("invalid port in address {}", s)))?;

        Ok(NetLocation::new(Address::from(host.to_string()), port))
    }
}
