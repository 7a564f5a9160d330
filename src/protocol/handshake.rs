//! Opening handshake messages: the HTTP Upgrade request and its 101 reply.
//!
//! Everything here works on complete header blocks; reading them off a
//! socket lives in [`crate::codec`].

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{HandshakeError, Result};

/// The GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate speaks.
pub const WS_VERSION: &str = "13";

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsplex::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh Sec-WebSocket-Key: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// Returns `Error::Io` if the OS RNG is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| crate::Error::Io(format!("random source unavailable: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Header lines into a map keyed by lowercase name.
///
/// Repeated headers are joined with `", "` as HTTP allows.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        headers
            .entry(name.trim().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

fn contains_token(value: &str, token: &str) -> bool {
    value.to_ascii_lowercase().contains(token)
}

fn check_header_value(name: &str, value: &str) -> std::result::Result<(), HandshakeError> {
    if value.contains(['\r', '\n']) {
        return Err(HandshakeError::InvalidHeaderValue(name.to_string()));
    }
    Ok(())
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request path, `/` when none was given.
    pub path: String,
    /// Host header, if sent.
    pub host: Option<String>,
    /// Sec-WebSocket-Key.
    pub key: String,
    /// Sec-WebSocket-Version, if sent.
    pub version: Option<String>,
    /// Origin header, if sent.
    pub origin: Option<String>,
    /// Requested subprotocols in preference order.
    pub protocols: Vec<String>,
}

impl HandshakeRequest {
    /// Request for `path` on `host:port` with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Propagates key generation failure.
    pub fn new(host: &str, port: u16, path: &str) -> Result<Self> {
        let host = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        Ok(Self {
            path: path.to_string(),
            host: Some(host),
            key: generate_key()?,
            version: Some(WS_VERSION.to_string()),
            origin: None,
            protocols: Vec::new(),
        })
    }

    /// Parse a request header block.
    ///
    /// Only the request line and `Sec-WebSocket-Key` are required; see
    /// [`validate`](Self::validate) for the stricter checks.
    ///
    /// # Errors
    ///
    /// `MalformedRequestLine` unless the first line is `GET <path> HTTP/..`,
    /// `MissingKey` without a `Sec-WebSocket-Key` header.
    pub fn parse(text: &str) -> std::result::Result<Self, HandshakeError> {
        let mut lines = text.lines();
        let request_line = lines.next().unwrap_or_default();

        let mut parts = request_line.split_whitespace();
        let (method, path, version) = (parts.next(), parts.next(), parts.next());
        let path = match (method, path, version) {
            (Some("GET"), Some(path), Some(http)) if http.starts_with("HTTP/") => path,
            _ => {
                return Err(HandshakeError::MalformedRequestLine(
                    request_line.to_string(),
                ));
            }
        };

        let mut headers = parse_headers(lines);
        let key = headers
            .remove("sec-websocket-key")
            .filter(|k| !k.is_empty())
            .ok_or(HandshakeError::MissingKey)?;

        let protocols = headers
            .get("sec-websocket-protocol")
            .map(|p| {
                p.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_string(),
            host: headers.remove("host"),
            key,
            version: headers.remove("sec-websocket-version"),
            origin: headers.remove("origin"),
            protocols,
        })
    }

    /// Strict checks: version 13 and a key decoding to 16 bytes.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` or `InvalidKey`.
    pub fn validate(&self) -> std::result::Result<(), HandshakeError> {
        match self.version.as_deref() {
            Some(WS_VERSION) => {}
            other => {
                return Err(HandshakeError::UnsupportedVersion(
                    other.unwrap_or("(none)").to_string(),
                ));
            }
        }
        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => Ok(()),
            Ok(decoded) => Err(HandshakeError::InvalidKey(format!(
                "decodes to {} bytes",
                decoded.len()
            ))),
            Err(_) => Err(HandshakeError::InvalidKey("not valid base64".into())),
        }
    }

    /// Serialize as an HTTP/1.1 GET request.
    ///
    /// # Errors
    ///
    /// `InvalidHeaderValue` if a field would inject a header line.
    pub fn write(&self, buf: &mut Vec<u8>) -> std::result::Result<(), HandshakeError> {
        check_header_value("path", &self.path)?;
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        if let Some(host) = &self.host {
            check_header_value("Host", host)?;
            buf.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Version: {WS_VERSION}\r\n").as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        if !self.protocols.is_empty() {
            let joined = self.protocols.join(", ");
            check_header_value("Sec-WebSocket-Protocol", &joined)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {joined}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// Server `101 Switching Protocols` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Sec-WebSocket-Accept.
    pub accept: String,
    /// Echoed subprotocol.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Reply to `req`, echoing its first requested subprotocol.
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: req.protocols.first().cloned(),
        }
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    ///
    /// `InvalidHeaderValue` if the protocol contains CR or LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> std::result::Result<(), HandshakeError> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        if let Some(proto) = &self.protocol {
            check_header_value("Sec-WebSocket-Protocol", proto)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse a response header block.
    ///
    /// Headers may appear in any order. The accept value is not compared
    /// here; see [`verify`](Self::verify).
    ///
    /// # Errors
    ///
    /// `BadStatus`, `MissingConnectionUpgrade`, `MissingUpgrade` or
    /// `MissingAccept`.
    pub fn parse(text: &str) -> std::result::Result<Self, HandshakeError> {
        let mut lines = text.lines();
        let status_line = lines.next().unwrap_or_default();

        let mut parts = status_line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(http), Some("101")) if http.starts_with("HTTP/") => {}
            _ => return Err(HandshakeError::BadStatus(status_line.to_string())),
        }

        let mut headers = parse_headers(lines);
        if !headers
            .get("connection")
            .is_some_and(|v| contains_token(v, "upgrade"))
        {
            return Err(HandshakeError::MissingConnectionUpgrade);
        }
        if !headers
            .get("upgrade")
            .is_some_and(|v| contains_token(v, "websocket"))
        {
            return Err(HandshakeError::MissingUpgrade);
        }
        let accept = headers
            .remove("sec-websocket-accept")
            .ok_or(HandshakeError::MissingAccept)?;

        Ok(Self {
            accept,
            protocol: headers.remove("sec-websocket-protocol"),
        })
    }

    /// Check the accept value against the key we sent.
    ///
    /// # Errors
    ///
    /// `AcceptMismatch` when they differ (compared case-insensitively).
    pub fn verify(&self, key: &str) -> std::result::Result<(), HandshakeError> {
        let expected = compute_accept_key(key);
        if expected.eq_ignore_ascii_case(&self.accept) {
            Ok(())
        } else {
            Err(HandshakeError::AcceptMismatch {
                expected,
                actual: self.accept.clone(),
            })
        }
    }
}
