//! Common error types for rollcall
//!
//! Adapter- and mapping-level problems are recovered locally (skip and
//! count); these variants exist for the cases that must be surfaced to the
//! caller instead of silently absorbed.

use thiserror::Error;

/// Common result type for rollcall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the rollcall crates
#[derive(Error, Debug)]
pub enum Error {
    /// An identifier was rendered through floating point and lost trailing
    /// digits; the exact value cannot be recovered from the text alone
    #[error("identifier corrupted by precision loss: {0}")]
    IdentifierCorrupted(String),

    /// A person or group name has no confident match in the authority
    /// snapshot
    #[error("unresolved entity: {0}")]
    UnresolvedEntity(String),

    /// The same name maps to more than one currently valid identifier;
    /// requires manual review, never auto-resolved
    #[error("duplicate evidence conflict: {0}")]
    DuplicateEvidenceConflict(String),

    /// The authority rejected a call for lack of privilege; terminal,
    /// retrying cannot help
    #[error("authority denied: {0}")]
    AuthorityDenied(String),

    /// Rate limiting or a transient network condition at the authority
    #[error("authority transient failure: {0}")]
    AuthorityTransient(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input file or response payload
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),
}
