//! # Opening handshake
//!
//! The HTTP/1.1 upgrade exchange that moves a connection from HTTP to
//! WebSocket framing ([RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4)).
//!
//! [`RequestHandshake`] renders the upgrade request with a fresh random
//! `Sec-WebSocket-Key`; [`ResponseHandshake`] parses the server's CRLF header
//! lines; [`validate`] checks the status code, offered protocol versions and
//! the cryptographic accept token: the server proves it understood the key by
//! echoing `base64(SHA1(key + GUID))` in `Sec-WebSocket-Accept`.

use std::{collections::HashMap, fmt};

use base64::prelude::*;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space1},
    combinator::rest,
    sequence::preceded,
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use url::{Position, Url};

use crate::{code::ErrorCode, options::EntropySource, Result, WebSocketError};

/// The GUID every WebSocket server appends to the client key before hashing,
/// fixed by RFC 6455 Section 1.3.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol versions this client can speak.
pub const SUPPORTED_VERSIONS: &[&str] = &["13"];

/// Characters in an extension parameter value that force quoting
/// (the HTTP token separators).
const NEEDS_QUOTES: &[char] = &[
    '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}', ' ',
    '\t',
];

/// A WebSocket extension offered during the handshake: a name plus at most
/// one `key[=value]` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    name: String,
    parameter: Option<(String, Option<String>)>,
}

impl Extension {
    /// An extension with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter: None,
        }
    }

    /// An extension with a `key` or `key=value` parameter.
    pub fn with_parameter(
        name: impl Into<String>,
        key: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parameter: Some((key.into(), value)),
        }
    }

    /// The extension name as it appears in `Sec-WebSocket-Extensions`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Extension {
    /// Renders the `Sec-WebSocket-Extensions` value, quoting the parameter
    /// value when it contains characters that require quoting.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((key, value)) = &self.parameter {
            write!(f, "; {key}")?;
            if let Some(value) = value {
                let already_quoted = value.len() >= 2
                    && value.starts_with('"')
                    && value.ends_with('"');
                if !already_quoted && value.contains(NEEDS_QUOTES) {
                    write!(f, "=\"{value}\"")?;
                } else {
                    write!(f, "={value}")?;
                }
            }
        }
        Ok(())
    }
}

/// The HTTP/1.1 upgrade request, generated once per connection attempt with
/// a fresh 16-byte random key.
#[derive(Debug, Clone)]
pub struct RequestHandshake {
    /// Request target: path plus query of the connect URL.
    pub resource: String,
    /// `Host` header value, including the port when it was explicit.
    pub host: String,
    /// `Origin` header value derived from the connect URL.
    pub origin: String,
    /// The base64-encoded `Sec-WebSocket-Key`.
    pub key: String,
    /// Offered protocol version.
    pub version: &'static str,
    extensions: Vec<Extension>,
    protocols: Vec<String>,
}

impl RequestHandshake {
    /// Builds the default request for `url`, drawing the key from `entropy`.
    pub fn new(url: &Url, entropy: &dyn EntropySource) -> Self {
        let mut key_bytes = [0u8; 16];
        entropy.fill(&mut key_bytes);

        let host = url.host_str().unwrap_or_default();
        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let origin_scheme = if url.scheme() == "wss" { "https" } else { "http" };
        let origin = match url.port() {
            Some(port) => format!("{origin_scheme}://{host}:{port}"),
            None => format!("{origin_scheme}://{host}"),
        };

        Self {
            resource: url[Position::BeforePath..].to_string(),
            host: host_header,
            origin,
            key: BASE64_STANDARD.encode(key_bytes),
            version: SUPPORTED_VERSIONS[0],
            extensions: Vec::new(),
            protocols: Vec::new(),
        }
    }

    /// Adds one `Sec-WebSocket-Extensions` entry.
    pub fn add_extension(&mut self, extension: Extension) {
        self.extensions.push(extension);
    }

    /// Adds one `Sec-WebSocket-Protocol` value.
    pub fn add_protocol(&mut self, protocol: impl Into<String>) {
        self.protocols.push(protocol.into());
    }
}

impl fmt::Display for RequestHandshake {
    /// Renders the CRLF wire form, terminated by an empty line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {} HTTP/1.1\r\n", self.resource)?;
        write!(f, "Host: {}\r\n", self.host)?;
        write!(f, "Upgrade: websocket\r\n")?;
        write!(f, "Connection: Upgrade\r\n")?;
        write!(f, "Origin: {}\r\n", self.origin)?;
        write!(f, "Sec-WebSocket-Version: {}\r\n", self.version)?;
        write!(f, "Sec-WebSocket-Key: {}\r\n", self.key)?;
        if !self.protocols.is_empty() {
            write!(f, "Sec-WebSocket-Protocol: {}\r\n", self.protocols.join(", "))?;
        }
        for extension in &self.extensions {
            write!(f, "Sec-WebSocket-Extensions: {extension}\r\n")?;
        }
        write!(f, "\r\n")
    }
}

/// Parses `HTTP/x.x <status> <reason>`.
fn status_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    (
        preceded(
            tag("HTTP/"),
            take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        ),
        preceded(space1, digit1),
        preceded(space1, rest),
    )
        .parse(input)
}

/// The parsed HTTP/1.1 response to the upgrade request.
#[derive(Debug, Clone)]
pub struct ResponseHandshake {
    /// HTTP version from the status line ("1.1").
    pub version: String,
    /// Numeric status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    headers: HashMap<String, String>,
}

impl ResponseHandshake {
    /// Parses the response header lines (without their CRLF terminators).
    ///
    /// The first line must be a status line with at least three
    /// space-separated tokens. Header lines without a colon are skipped;
    /// repeated headers are comma-joined.
    pub fn parse(lines: &[String]) -> Result<Self> {
        let first = lines.first().ok_or_else(|| {
            WebSocketError::InvalidHandshakeResponse("no header lines".to_string())
        })?;

        let (_, (version, status, reason)) = status_line(first).map_err(|_| {
            WebSocketError::InvalidHandshakeResponse(format!("invalid status line: {first}"))
        })?;
        let status = status.parse::<u16>().map_err(|_| {
            WebSocketError::InvalidHandshakeResponse(format!("invalid status code in: {first}"))
        })?;

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in &lines[1..] {
            if line.is_empty() {
                break;
            }
            let Some(pos) = line.find(':') else {
                continue;
            };
            let key = line[..pos].trim().to_ascii_lowercase();
            let value = line[pos + 1..].trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            headers
                .entry(key)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Ok(Self {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
            headers,
        })
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The `Sec-WebSocket-Accept` token, if present.
    pub fn sec_websocket_accept(&self) -> Option<&str> {
        self.header("sec-websocket-accept")
    }

    /// The versions advertised in `Sec-WebSocket-Version`, if any.
    pub fn sec_websocket_versions(&self) -> Vec<&str> {
        self.header("sec-websocket-version")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Computes the accept token for a request key:
/// `base64(SHA1(key + GUID))`.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Validates the server's response against the request that was sent.
///
/// A non-101 status fails with
/// [`ErrorCode::HandshakeVersionNotSupported`] when the response advertises a
/// version set disjoint from ours, and with
/// [`ErrorCode::HandshakeInvalidStatusCode`] otherwise. On a 101 the accept
/// token must match exactly.
pub fn validate(request: &RequestHandshake, response: &ResponseHandshake) -> Result<()> {
    if response.status != 101 {
        let versions = response.sec_websocket_versions();
        if !versions.is_empty()
            && versions
                .iter()
                .all(|version| !SUPPORTED_VERSIONS.contains(version))
        {
            return Err(WebSocketError::protocol(
                ErrorCode::HandshakeVersionNotSupported,
            ));
        }
        return Err(WebSocketError::protocol(
            ErrorCode::HandshakeInvalidStatusCode,
        ));
    }

    let expected = accept_token(&request.key);
    if response.sec_websocket_accept() != Some(expected.as_str()) {
        return Err(WebSocketError::protocol(
            ErrorCode::HandshakeInvalidSecWebSocketAccept,
        ));
    }

    Ok(())
}
