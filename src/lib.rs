//! Mihomo Outbound - proxy groups and relay chains for mihomo-style clients
//!
//! This crate is the outbound routing core of a proxy client:
//! - Fallback groups picking the first alive member
//! - Relay groups chaining members into one TCP or UDP tunnel
//! - Proxy providers with periodic health checks
//! - Built-in Direct, Reject, HTTP and SOCKS5 outbounds usable as chain hops
//!
//! # Architecture
//!
//! ```text
//!        +-------------+
//!        |   config/   |
//!        +------+------+
//!               |
//!        +------v------+      +-------------+
//!        |   proxy/    +----->|  provider/  |
//!        |  (groups)   |      | (members)   |
//!        +------+------+      +------+------+
//!               |                    |
//!        +------v--------------------v------+
//!        |            outbound/             |
//!        |  (adapters, dialer, connections) |
//!        +------+---------------------------+
//!               |
//!        +------v------+
//!        |    dns/     |
//!        +-------------+
//! ```

pub mod common;
pub mod config;
pub mod dns;
pub mod outbound;
pub mod provider;
pub mod proxy;

pub use common::error::{Error, Result};
pub use common::{addr_to_metadata, Metadata, Network};
pub use config::Config;
pub use outbound::{Conn, DialOptions, Dialer, OutboundProxy, PacketConn, ProxyManager, ProxyType};
pub use proxy::{build_groups, Fallback, GroupStatus, ProxyGroup, Relay};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
