//! Error types for outbound groups

use std::io;
use thiserror::Error;

/// Outbound error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A single hop of a chain failed to connect or upgrade.
    #[error("{addr} connect error: {source}")]
    Hop {
        addr: String,
        #[source]
        source: Box<Error>,
    },

    /// A hop that must carry UDP cannot.
    #[error("{addr} connect error: proxy [{name}] UDP is not supported in relay chains")]
    UdpUnsupported { addr: String, name: String },
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        Error::Dns(msg.into())
    }

    pub fn proxy<S: Into<String>>(msg: S) -> Self {
        Error::Proxy(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Error::Auth(msg.into())
    }

    pub fn address<S: Into<String>>(msg: S) -> Self {
        Error::Address(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Attribute an error to the hop at `addr`.
    pub fn hop<S: Into<String>>(addr: S, source: Error) -> Self {
        Error::Hop {
            addr: addr.into(),
            source: Box::new(source),
        }
    }

    pub fn udp_unsupported<A: Into<String>, N: Into<String>>(addr: A, name: N) -> Self {
        Error::UdpUnsupported {
            addr: addr.into(),
            name: name.into(),
        }
    }

    /// Address of the hop this error is attributed to, if any.
    pub fn hop_addr(&self) -> Option<&str> {
        match self {
            Error::Hop { addr, .. } | Error::UdpUnsupported { addr, .. } => Some(addr),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<hickory_resolver::error::ResolveError> for Error {
    fn from(e: hickory_resolver::error::ResolveError) -> Self {
        Error::Dns(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("test error");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::protocol("invalid header");
        assert_eq!(e.to_string(), "Protocol error: invalid header");
    }

    #[test]
    fn test_hop_error_names_address() {
        let e = Error::hop("10.0.0.3:1080", Error::connection("refused"));
        assert_eq!(e.hop_addr(), Some("10.0.0.3:1080"));
        assert_eq!(
            e.to_string(),
            "10.0.0.3:1080 connect error: Connection error: refused"
        );
    }

    #[test]
    fn test_udp_unsupported_display() {
        let e = Error::udp_unsupported("1.2.3.4:80", "http-a");
        assert_eq!(
            e.to_string(),
            "1.2.3.4:80 connect error: proxy [http-a] UDP is not supported in relay chains"
        );
    }
}
