use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quorum::{decide, QuorumError, QuorumPolicy};
use crate::CanonicalAddress;

/// How the raw content of a source is turned into address tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParserKind {
    /// One address per line; the first whitespace-delimited field is used.
    #[default]
    Lines,
    /// Scan arbitrary text for `a.b.c.d:port` tokens.
    Pattern,
    /// HTML table rows, either a `host:port` cell or adjacent host and port cells.
    HtmlTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub parser: ParserKind,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, uri: impl Into<String>, parser: ParserKind) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            parser,
        }
    }
}

/// A fixed external endpoint requested through each candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub id: String,
    pub uri: String,
}

impl ProbeTarget {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: CanonicalAddress,
    pub source_id: String,
    pub discovered_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(address: CanonicalAddress, source_id: impl Into<String>) -> Self {
        Self {
            address,
            source_id: source_id.into(),
            discovered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Timeout,
    Connection(String),
    HttpStatus(u16),
    EmptyBody,
    InvalidTarget(String),
    Client(String),
    Cancelled,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "timeout"),
            ProbeFailure::Connection(message) => write!(f, "connection error: {message}"),
            ProbeFailure::HttpStatus(code) => write!(f, "http status {code}"),
            ProbeFailure::EmptyBody => write!(f, "empty response body"),
            ProbeFailure::InvalidTarget(message) => write!(f, "invalid target: {message}"),
            ProbeFailure::Client(message) => write!(f, "client error: {message}"),
            ProbeFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub target_id: String,
    pub success: bool,
    pub latency: Duration,
    pub failure: Option<ProbeFailure>,
}

impl ProbeOutcome {
    pub fn success(target_id: impl Into<String>, latency: Duration) -> Self {
        Self {
            target_id: target_id.into(),
            success: true,
            latency,
            failure: None,
        }
    }

    pub fn failure(target_id: impl Into<String>, latency: Duration, reason: ProbeFailure) -> Self {
        Self {
            target_id: target_id.into(),
            success: false,
            latency,
            failure: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Live,
    Dead,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Live => write!(f, "live"),
            Classification::Dead => write!(f, "dead"),
        }
    }
}

/// Final, immutable judgement for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    candidate: Candidate,
    outcomes: Vec<ProbeOutcome>,
    classification: Classification,
}

impl Verdict {
    /// Applies `policy` to the outcomes and freezes the result.
    pub fn decide(
        candidate: Candidate,
        outcomes: Vec<ProbeOutcome>,
        policy: &QuorumPolicy,
    ) -> Result<Self, QuorumError> {
        let classification = decide(policy, &outcomes)?;
        Ok(Self {
            candidate,
            outcomes,
            classification,
        })
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn address(&self) -> &CanonicalAddress {
        &self.candidate.address
    }

    pub fn outcomes(&self) -> &[ProbeOutcome] {
        &self.outcomes
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn is_live(&self) -> bool {
        self.classification == Classification::Live
    }

    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}
