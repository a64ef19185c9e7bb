//! SOCKS5 client-side protocol (RFC 1928 / RFC 1929)

use super::net::{Address, NetLocation};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_USERNAME_PASSWORD: u8 = 0x02;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// SOCKS5 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        match cmd {
            Command::Connect => CMD_CONNECT,
            Command::Bind => CMD_BIND,
            Command::UdpAssociate => CMD_UDP_ASSOCIATE,
        }
    }
}

/// Username/password credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Run the client side of a SOCKS5 negotiation on `stream`.
///
/// Returns the bound address from the server reply. For `UdpAssociate` this
/// is the relay endpoint datagrams must be sent to.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    command: Command,
    target: &NetLocation,
) -> Result<NetLocation> {
    // Greeting
    let greeting: &[u8] = if credentials.is_some() {
        &[SOCKS5_VERSION, 2, AUTH_NO_AUTH, AUTH_USERNAME_PASSWORD]
    } else {
        &[SOCKS5_VERSION, 1, AUTH_NO_AUTH]
    };
    stream
        .write_all(greeting)
        .await
        .map_err(|e| Error::connection(format!("Failed to send SOCKS5 greeting: {}", e)))?;

    let mut choice = [0u8; 2];
    stream
        .read_exact(&mut choice)
        .await
        .map_err(|e| Error::connection(format!("Failed to read SOCKS5 response: {}", e)))?;

    if choice[0] != SOCKS5_VERSION {
        return Err(Error::protocol("Invalid SOCKS5 version"));
    }

    match (choice[1], credentials) {
        (AUTH_NO_AUTH, _) => {}
        (AUTH_USERNAME_PASSWORD, Some(credentials)) => {
            authenticate_password(stream, credentials).await?;
        }
        (AUTH_NO_ACCEPTABLE, _) => {
            return Err(Error::auth("No acceptable authentication method"));
        }
        (method, _) => {
            return Err(Error::protocol(format!(
                "Unsupported authentication method: {}",
                method
            )));
        }
    }

    // Request
    let mut request = BytesMut::with_capacity(3 + target.address.len());
    request.put_slice(&[SOCKS5_VERSION, command.into(), 0x00]);
    target.address.write_buf(&mut request, target.port)?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::connection(format!("Failed to send SOCKS5 request: {}", e)))?;

    // Reply
    let mut reply = [0u8; 3];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| Error::connection(format!("Failed to read SOCKS5 reply: {}", e)))?;

    if reply[0] != SOCKS5_VERSION {
        return Err(Error::protocol("Invalid SOCKS5 version in reply"));
    }
    if reply[1] != REP_SUCCEEDED {
        return Err(Error::connection(reply_error_message(reply[1])));
    }

    let (address, port) = Address::read_from(stream).await?;
    debug!("SOCKS5 {:?} to {} bound at {}:{}", command, target, address.to_host(), port);
    Ok(NetLocation::new(address, port))
}

async fn authenticate_password<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    credentials: &Credentials,
) -> Result<()> {
    let username = credentials.username.as_bytes();
    let password = credentials.password.as_bytes();
    if username.len() > 255 || password.len() > 255 {
        return Err(Error::auth("Username or password too long"));
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(0x01);
    request.push(username.len() as u8);
    request.extend_from_slice(username);
    request.push(password.len() as u8);
    request.extend_from_slice(password);
    stream.write_all(&request).await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != 0x00 {
        return Err(Error::auth("Authentication failed"));
    }
    Ok(())
}

/// Convert reply code to error message
pub fn reply_error_message(code: u8) -> String {
    match code {
        REP_GENERAL_FAILURE => "General SOCKS server failure".to_string(),
        REP_CONNECTION_NOT_ALLOWED => "Connection not allowed by ruleset".to_string(),
        REP_NETWORK_UNREACHABLE => "Network unreachable".to_string(),
        REP_HOST_UNREACHABLE => "Host unreachable".to_string(),
        REP_CONNECTION_REFUSED => "Connection refused".to_string(),
        REP_TTL_EXPIRED => "TTL expired".to_string(),
        REP_COMMAND_NOT_SUPPORTED => "Command not supported".to_string(),
        REP_ADDRESS_TYPE_NOT_SUPPORTED => "Address type not supported".to_string(),
        _ => format!("Unknown error: {}", code),
    }
}

/// Prefix `payload` with a SOCKS5 UDP request header (RSV, FRAG = 0).
pub fn encode_udp_packet(target: &NetLocation, payload: &[u8]) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(3 + target.address.len() + payload.len());
    buf.put_slice(&[0x00, 0x00, 0x00]);
    target.address.write_buf(&mut buf, target.port)?;
    buf.put_slice(payload);
    Ok(buf)
}

/// Split a SOCKS5 UDP datagram into its source and the payload offset.
pub fn decode_udp_packet(data: &[u8]) -> Result<(NetLocation, usize)> {
    if data.len() < 4 {
        return Err(Error::protocol("UDP header too short"));
    }
    if data[2] != 0 {
        return Err(Error::unsupported("fragmented SOCKS5 UDP datagram"));
    }
    let (address, port, used) = Address::read_buf(&data[3..])?;
    Ok((NetLocation::new(address, port), 3 + used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_command_conversion() {
        assert_eq!(u8::from(Command::Connect), 0x01);
        assert_eq!(u8::from(Command::UdpAssociate), 0x03);
    }

    #[test]
    fn test_reply_error_messages() {
        assert_eq!(reply_error_message(REP_CONNECTION_REFUSED), "Connection refused");
        assert_eq!(reply_error_message(REP_NETWORK_UNREACHABLE), "Network unreachable");
        assert_eq!(reply_error_message(0x42), "Unknown error: 66");
    }

    #[test]
    fn test_udp_packet_layout() {
        let target = NetLocation::new(Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        let packet = encode_udp_packet(&target, b"hi").unwrap();
        assert_eq!(&packet[..], &[0, 0, 0, 0x01, 127, 0, 0, 1, 0x1F, 0x90, b'h', b'i']);

        let (source, offset) = decode_udp_packet(&packet).unwrap();
        assert_eq!(source, target);
        assert_eq!(&packet[offset..], b"hi");
    }

    #[test]
    fn test_udp_packet_rejects_fragments() {
        let packet = [0, 0, 1, 0x01, 127, 0, 0, 1, 0, 80];
        assert!(decode_udp_packet(&packet).is_err());
    }

    #[tokio::test]
    async fn test_client_handshake_connect() {
        let mut stream = tokio_test::io::Builder::new()
            .write(&[SOCKS5_VERSION, 1, AUTH_NO_AUTH])
            .read(&[SOCKS5_VERSION, AUTH_NO_AUTH])
            .write(&[SOCKS5_VERSION, CMD_CONNECT, 0, 0x03, 7, b'a', b'b', b'c', b'.', b'c', b'o', b'm', 0x01, 0xBB])
            .read(&[SOCKS5_VERSION, REP_SUCCEEDED, 0, 0x01, 10, 0, 0, 1, 0x04, 0x38])
            .build();

        let target = NetLocation::new(Address::Domain("abc.com".to_string()), 443);
        let bound = client_handshake(&mut stream, None, Command::Connect, &target)
            .await
            .unwrap();
        assert_eq!(bound.to_string(), "10.0.0.1:1080");
    }

    #[tokio::test]
    async fn test_client_handshake_with_password() {
        let credentials = Credentials {
            username: "u".to_string(),
            password: "pw".to_string(),
        };
        let mut stream = tokio_test::io::Builder::new()
            .write(&[SOCKS5_VERSION, 2, AUTH_NO_AUTH, AUTH_USERNAME_PASSWORD])
            .read(&[SOCKS5_VERSION, AUTH_USERNAME_PASSWORD])
            .write(&[0x01, 1, b'u', 2, b'p', b'w'])
            .read(&[0x01, 0x00])
            .write(&[SOCKS5_VERSION, CMD_UDP_ASSOCIATE, 0, 0x01, 0, 0, 0, 0, 0, 0])
            .read(&[SOCKS5_VERSION, REP_SUCCEEDED, 0, 0x01, 0, 0, 0, 0, 0x30, 0x39])
            .build();

        let target = NetLocation::new(Address::Ipv4(Ipv4Addr::UNSPECIFIED), 0);
        let bound = client_handshake(&mut stream, Some(&credentials), Command::UdpAssociate, &target)
            .await
            .unwrap();
        assert_eq!(bound.port, 12345);
    }

    #[tokio::test]
    async fn test_client_handshake_failure_reply() {
        let mut stream = tokio_test::io::Builder::new()
            .write(&[SOCKS5_VERSION, 1, AUTH_NO_AUTH])
            .read(&[SOCKS5_VERSION, AUTH_NO_AUTH])
            .write(&[SOCKS5_VERSION, CMD_CONNECT, 0, 0x01, 1, 2, 3, 4, 0, 80])
            .read(&[SOCKS5_VERSION, REP_HOST_UNREACHABLE, 0])
            .build();

        let target = NetLocation::new(Address::Ipv4(Ipv4Addr::new(1, 2, 3, 4)), 80);
        let err = client_handshake(&mut stream, None, Command::Connect, &target)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Host unreachable"));
    }
}
