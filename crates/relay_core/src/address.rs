use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedAddress {
    #[error("empty address")]
    Empty,
    #[error("missing port separator")]
    MissingPort,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("invalid host {0:?}")]
    InvalidHost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HostKind {
    Ipv4,
    Hostname,
}

/// Normalized `host:port` used as the identity of a candidate relay.
///
/// Normalization trims whitespace, drops an `http://`/`https://` prefix and a
/// trailing `/`, lower-cases the host, drops a trailing `.` from hostnames and
/// renders the port without leading zeros. Two raw tokens that normalize to
/// the same value are the same candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalAddress {
    host: String,
    port: u16,
    kind: HostKind,
}

impl CanonicalAddress {
    pub fn parse(raw: &str) -> Result<Self, MalformedAddress> {
        let trimmed = strip_scheme(raw.trim());
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(MalformedAddress::Empty);
        }

        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or(MalformedAddress::MissingPort)?;
        let port = parse_port(port)?;
        let (host, kind) = normalize_host(host)?;

        Ok(Self { host, port, kind })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    /// Proxy URI used to route a request through this relay.
    pub fn proxy_uri(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for CanonicalAddress {
    type Err = MalformedAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn strip_scheme(raw: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if let Some(prefix) = raw.get(..scheme.len()) {
            if prefix.eq_ignore_ascii_case(scheme) {
                return &raw[scheme.len()..];
            }
        }
    }
    raw
}

fn parse_port(raw: &str) -> Result<u16, MalformedAddress> {
    let invalid = || MalformedAddress::InvalidPort(raw.to_string());
    if raw.is_empty() || raw.len() > 5 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(port) => Ok(port),
    }
}

fn normalize_host(raw: &str) -> Result<(String, HostKind), MalformedAddress> {
    let invalid = || MalformedAddress::InvalidHost(raw.to_string());
    let host = raw.to_ascii_lowercase();

    // Anything that looks numeric must be a real dotted quad, so `999.1.1.1`
    // is rejected rather than accepted as a hostname.
    if host.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        let ip = host.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        return Ok((ip.to_string(), HostKind::Ipv4));
    }

    let host = host.strip_suffix('.').unwrap_or(&host);
    if host.is_empty() || host.len() > MAX_HOSTNAME_LEN {
        return Err(invalid());
    }
    if !host.split('.').all(is_valid_label) {
        return Err(invalid());
    }
    Ok((host.to_string(), HostKind::Hostname))
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
