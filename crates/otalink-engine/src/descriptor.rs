//! Update descriptor parsing.
//!
//! Turns one inbound `{"ota":{...}}` command body into a validated
//! [`UpdateDescriptor`]. All string fields are copied into
//! fixed-capacity buffers; overflow is a hard parse failure, never
//! silent truncation.

use heapless::String;
use serde::Deserialize;

use crate::error::ParseError;

/// Maximum host string length (matches the agent's HTTP layer).
pub const MAX_HOST_LEN: usize = 64;
/// Maximum request path length.
pub const MAX_PATH_LEN: usize = 128;
/// Maximum firmware version string length.
pub const MAX_VERSION_LEN: usize = 32;
/// Maximum human-readable label length.
pub const MAX_LABEL_LEN: usize = 32;

/// Which image the update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageKind {
    /// The agent module itself.
    #[default]
    Module,
    /// The host MCU behind the module.
    HostMcu,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Module => "module",
            ImageKind::HostMcu => "host_mcu",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "module" => Some(ImageKind::Module),
            "host_mcu" => Some(ImageKind::HostMcu),
            _ => None,
        }
    }
}

/// Where the image is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceLocation {
    /// Served directly by the issuer (or a LAN peer).
    #[default]
    Local,
    /// Cloud-hosted; the real image URL is resolved from the first
    /// response body before image bytes flow.
    Remote,
}

/// One image host: address, port, TLS flag and request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String<MAX_HOST_LEN>,
    pub port: u16,
    pub tls: bool,
    pub path: String<MAX_PATH_LEN>,
}

/// Origin of an update command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin<'a> {
    /// Command arrived from the cloud service.
    Cloud,
    /// Command arrived from a LAN peer at the given address; the
    /// descriptor's `port` field selects the peer's image port.
    Lan { peer: &'a str },
}

/// A validated update command. Immutable once parsed; owned by the
/// state machine for the duration of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub image_kind: ImageKind,
    pub version: String<MAX_VERSION_LEN>,
    pub label: Option<String<MAX_LABEL_LEN>>,
    pub total_length: u32,
    pub source_location: SourceLocation,
    pub server: ServerEndpoint,
}

/// Raw wire shape of the inbound command. Field presence is validated
/// afterwards so each missing field maps to its own error.
#[derive(Deserialize)]
struct CommandWire<'a> {
    #[serde(borrow)]
    ota: OtaWire<'a>,
}

#[derive(Deserialize)]
struct OtaWire<'a> {
    #[serde(borrow)]
    url: Option<&'a str>,
    size: Option<u32>,
    #[serde(borrow, rename = "type")]
    kind: Option<&'a str>,
    #[serde(borrow)]
    ver: Option<&'a str>,
    #[serde(borrow)]
    source: Option<&'a str>,
    #[serde(borrow)]
    label: Option<&'a str>,
    #[serde(borrow)]
    head: Option<&'a str>,
    port: Option<u16>,
}

/// Parse result: the descriptor plus, for LAN commands, the base64
/// header that still has to pass authentication before the descriptor
/// may be acted on.
#[derive(Debug)]
pub struct ParsedCommand<'a> {
    pub descriptor: UpdateDescriptor,
    pub lan_head: Option<&'a str>,
}

/// Parse and validate one update command body.
pub fn parse_command<'a>(
    body: &'a [u8],
    origin: CommandOrigin<'_>,
) -> Result<ParsedCommand<'a>, ParseError> {
    let (wire, _) =
        serde_json_core::from_slice::<CommandWire<'a>>(body).map_err(|_| ParseError::BadJson)?;
    let ota = wire.ota;

    let url = match ota.url {
        Some(u) if !u.is_empty() => u,
        _ => return Err(ParseError::MissingUrl),
    };
    let total_length = match ota.size {
        Some(n) if n > 0 => n,
        _ => return Err(ParseError::MissingSize),
    };
    let image_kind = match ota.kind {
        None => ImageKind::default(),
        Some(token) => ImageKind::from_token(token).ok_or(ParseError::BadKind)?,
    };
    let version = match ota.ver {
        Some(v) if !v.is_empty() => bounded(v)?,
        _ => return Err(ParseError::MissingVersion),
    };
    let label = match ota.label {
        Some(l) => Some(bounded(l)?),
        None => None,
    };

    let (source_location, server, lan_head) = match origin {
        CommandOrigin::Cloud => {
            let source = match ota.source {
                None | Some("local") => SourceLocation::Local,
                Some("remote") => SourceLocation::Remote,
                Some(_) => return Err(ParseError::BadJson),
            };
            (source, parse_url(url)?, None)
        }
        CommandOrigin::Lan { peer } => {
            // LAN images are always served by the peer itself; `url`
            // is the request path on the peer's image port.
            let head = match ota.head {
                Some(h) if !h.is_empty() => h,
                _ => return Err(ParseError::BadJson),
            };
            let server = ServerEndpoint {
                host: bounded(peer)?,
                port: ota.port.unwrap_or(80),
                tls: false,
                path: bounded(url)?,
            };
            (SourceLocation::Local, server, Some(head))
        }
    };

    Ok(ParsedCommand {
        descriptor: UpdateDescriptor {
            image_kind,
            version,
            label,
            total_length,
            source_location,
            server,
        },
        lan_head,
    })
}

/// Split an absolute `http://` / `https://` URL into an endpoint.
pub fn parse_url(url: &str) -> Result<ServerEndpoint, ParseError> {
    let (tls, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return Err(ParseError::MissingUrl);
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(ParseError::MissingUrl);
    }

    let (host, port) = match authority.find(':') {
        Some(idx) => {
            let port = authority[idx + 1..]
                .parse::<u16>()
                .map_err(|_| ParseError::BadJson)?;
            (&authority[..idx], port)
        }
        None => (authority, if tls { 443 } else { 80 }),
    };

    Ok(ServerEndpoint {
        host: bounded(host)?,
        port,
        tls,
        path: bounded(path)?,
    })
}

/// Wire shape of the remote-fetch metadata body: the service answers
/// the first ranged request with the real image location instead of
/// image bytes.
#[derive(Deserialize)]
struct LocationWire<'a> {
    #[serde(borrow)]
    location: Option<&'a str>,
}

/// Parse the redirect/metadata body of a remote fetch into the real
/// image endpoint.
pub fn parse_location_body(body: &[u8]) -> Result<ServerEndpoint, ParseError> {
    let (wire, _) =
        serde_json_core::from_slice::<LocationWire<'_>>(body).map_err(|_| ParseError::BadJson)?;
    match wire.location {
        Some(url) if !url.is_empty() => parse_url(url),
        _ => Err(ParseError::MissingUrl),
    }
}

fn bounded<const N: usize>(s: &str) -> Result<String<N>, ParseError> {
    let mut out = String::new();
    out.push_str(s).map_err(|()| ParseError::TooLong)?;
    Ok(out)
}
