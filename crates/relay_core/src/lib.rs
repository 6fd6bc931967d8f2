//! Relay core: pure domain types, quorum decision and the dedup/result gates.
mod address;
mod dedup;
mod model;
mod quorum;
mod result_set;

pub use address::{CanonicalAddress, HostKind, MalformedAddress};
pub use dedup::Deduplicator;
pub use model::{
    Candidate, Classification, ParserKind, ProbeFailure, ProbeOutcome, ProbeTarget,
    SourceDescriptor, Verdict,
};
pub use quorum::{decide, QuorumError, QuorumPolicy, QuorumRule};
pub use result_set::{DuplicateVerdict, ResultSet};
