//! `ws://host[:port][/path]` connect targets.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Default port when the URL names none.
pub const DEFAULT_PORT: u16 = 80;

/// A parsed connect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// Host name or address; IPv6 literals keep their brackets stripped.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path including any query, always starting with `/`.
    pub path: String,
}

impl FromStr for WsUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| Error::InvalidUrl(format!("{url}: {why}"));

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        match scheme.to_ascii_lowercase().as_str() {
            "ws" => {}
            "wss" => return Err(invalid("TLS is not supported")),
            _ => return Err(invalid("scheme must be ws")),
        }

        let (authority, path) = match rest.find(['/', '?']) {
            Some(idx) if rest[idx..].starts_with('/') => (&rest[..idx], rest[idx..].to_string()),
            Some(idx) => (&rest[..idx], format!("/{}", &rest[idx..])),
            None => (rest, "/".to_string()),
        };

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, tail) = v6
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return Err(invalid("garbage after IPv6 literal")),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("bad port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path,
        })
    }
}

impl fmt::Display for WsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "ws://[{}]:{}{}", self.host, self.port, self.path)
        } else {
            write!(f, "ws://{}:{}{}", self.host, self.port, self.path)
        }
    }
}
