//! Running the opening handshake over a buffered stream.
//!
//! Both drivers take the stream by `&mut` and leave any bytes that arrived
//! after the header block in its buffer, so the caller must keep using the
//! same buffered stream for framing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::{Config, Limits};
use crate::error::{Error, HandshakeError, Result};
use crate::protocol::{HandshakeRequest, HandshakeResponse, WsUrl};

/// Read header lines up to and including the terminating blank line.
async fn read_head<R>(io: &mut R, limits: &Limits) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = String::new();
    loop {
        let start = head.len();
        // One byte past the limit so an oversized block is detected, not truncated.
        let budget = limits.max_handshake_size.saturating_sub(start) as u64 + 1;
        let n = (&mut *io)
            .take(budget)
            .read_line(&mut head)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => HandshakeError::NotUtf8.into(),
                _ => Error::from(e),
            })?;
        if n == 0 {
            return Err(HandshakeError::UnexpectedEof.into());
        }
        limits.check_handshake_size(head.len())?;

        let line = &head[start..];
        if line == "\r\n" || line == "\n" {
            return Ok(head);
        }
    }
}

/// Send the upgrade request for `url` and validate the reply.
///
/// # Errors
///
/// `Error::InvalidHandshake` with the specific reason, or `Error::Io`.
pub async fn client_handshake<S>(io: &mut S, url: &WsUrl, config: &Config) -> Result<HandshakeResponse>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let request = HandshakeRequest::new(&url.host, url.port, &url.path)?;
    let mut buf = Vec::with_capacity(256);
    request.write(&mut buf)?;
    io.write_all(&buf).await?;
    io.flush().await?;

    let head = read_head(io, &config.limits).await?;
    let response = HandshakeResponse::parse(&head)?;
    response.verify(&request.key)?;
    trace!(path = %url.path, "client handshake complete");
    Ok(response)
}

/// Read an upgrade request and answer it with `101 Switching Protocols`.
///
/// # Errors
///
/// `Error::InvalidHandshake` if the request is unusable, or `Error::Io`.
/// Nothing is written back on failure.
pub async fn server_handshake<S>(io: &mut S, config: &Config) -> Result<HandshakeRequest>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let head = read_head(io, &config.limits).await?;
    let request = HandshakeRequest::parse(&head)?;
    if config.strict_handshake {
        request.validate()?;
    }

    let mut buf = Vec::with_capacity(256);
    HandshakeResponse::from_request(&request).write(&mut buf)?;
    io.write_all(&buf).await?;
    io.flush().await?;
    trace!(path = %request.path, "server handshake complete");
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::compute_accept_key;
    use tokio::io::{BufReader, duplex};

    fn url(path: &str) -> WsUrl {
        format!("ws://localhost:9000{path}").parse().unwrap()
    }

    #[tokio::test]
    async fn test_client_and_server_agree() {
        let (a, b) = duplex(4096);
        let mut client = BufReader::new(a);
        let mut server = BufReader::new(b);

        let config = Config::default();
        let target = url("/chat");
        let (client_res, server_res) = tokio::join!(
            client_handshake(&mut client, &target, &config),
            server_handshake(&mut server, &config),
        );

        let request = server_res.unwrap();
        let response = client_res.unwrap();
        assert_eq!(request.path, "/chat");
        assert_eq!(request.host.as_deref(), Some("localhost:9000"));
        assert_eq!(response.accept, compute_accept_key(&request.key));
    }

    #[tokio::test]
    async fn test_bytes_after_head_stay_buffered() {
        let (a, b) = duplex(4096);
        let mut server = BufReader::new(b);
        let mut raw = a;
        raw.write_all(
            b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n\x81\x00",
        )
        .await
        .unwrap();

        server_handshake(&mut server, &Config::default()).await.unwrap();
        let mut next = [0u8; 2];
        server.read_exact(&mut next).await.unwrap();
        assert_eq!(next, [0x81, 0x00]);
    }

    #[tokio::test]
    async fn test_server_missing_key() {
        let (mut raw, b) = duplex(4096);
        let mut server = BufReader::new(b);
        raw.write_all(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();

        let err = server_handshake(&mut server, &Config::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidHandshake(HandshakeError::MissingKey));
    }

    #[tokio::test]
    async fn test_server_strict_rejects_missing_version() {
        let (mut raw, b) = duplex(4096);
        let mut server = BufReader::new(b);
        raw.write_all(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n")
            .await
            .unwrap();

        let config = Config::default().with_strict_handshake(true);
        let err = server_handshake(&mut server, &config).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidHandshake(HandshakeError::UnsupportedVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_during_head() {
        let (raw, b) = duplex(4096);
        let mut server = BufReader::new(b);
        {
            let mut raw = raw;
            raw.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        }
        let err = server_handshake(&mut server, &Config::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidHandshake(HandshakeError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_oversized_head() {
        let (mut raw, b) = duplex(4096);
        let mut server = BufReader::new(b);
        let filler = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(200));
        raw.write_all(filler.as_bytes()).await.unwrap();

        let config = Config::default().with_limits(Limits::new(1024, 1024, 64));
        let err = server_handshake(&mut server, &config).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTooLarge { max: 64, .. }));
    }

    #[tokio::test]
    async fn test_client_rejects_wrong_accept() {
        let (a, mut raw) = duplex(4096);
        let mut client = BufReader::new(a);
        let reply = async {
            let mut sink = vec![0u8; 1024];
            let _ = raw.read(&mut sink).await.unwrap();
            raw.write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                  Connection: Upgrade\r\nSec-WebSocket-Accept: bm9wZQ==\r\n\r\n",
            )
            .await
            .unwrap();
            raw
        };
        let target = url("/");
        let config = Config::default();
        let (result, _raw) = tokio::join!(client_handshake(&mut client, &target, &config), reply);
        assert!(matches!(
            result,
            Err(Error::InvalidHandshake(HandshakeError::AcceptMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_client_rejects_non_101() {
        let (a, mut raw) = duplex(4096);
        let mut client = BufReader::new(a);
        let reply = async {
            let mut sink = vec![0u8; 1024];
            let _ = raw.read(&mut sink).await.unwrap();
            raw.write_all(b"HTTP/1.1 404 Not Found\r\n\r\n").await.unwrap();
            raw
        };
        let target = url("/");
        let config = Config::default();
        let (result, _raw) = tokio::join!(client_handshake(&mut client, &target, &config), reply);
        assert!(matches!(
            result,
            Err(Error::InvalidHandshake(HandshakeError::BadStatus(_)))
        ));
    }
}
