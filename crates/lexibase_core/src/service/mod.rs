//! Aggregate save orchestration services.
//!
//! # Responsibility
//! - Validate and persist one lexeme aggregate as a single unit of work.
//! - Keep the error taxonomy of the save boundary in one place.
//!
//! # Invariants
//! - Structural violations are collected and reported together; reference,
//!   compatibility and storage failures abort the whole transaction.
//! - No partial aggregate is ever observable to other callers.

use crate::model::keys::RecordId;
use crate::model::reference::LinkTargetKind;
use crate::repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod lexeme_service;
pub mod validate;

pub use lexeme_service::{LexemeService, SaveContext, SaveSummary};
pub use validate::InvariantViolation;

/// A mapping or link connecting entries the registries do not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityViolation {
    /// The owning languages of the two senses have no registered pair.
    UnpairedLanguages {
        mapping_pos: usize,
        language_a: RecordId,
        language_b: RecordId,
    },
    /// The link's target kind does not match its registered link type.
    LinkTargetMismatch {
        link_pos: usize,
        link_type_id: RecordId,
        declared: LinkTargetKind,
        actual: LinkTargetKind,
    },
}

impl Display for CompatibilityViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnpairedLanguages {
                mapping_pos,
                language_a,
                language_b,
            } => write!(
                f,
                "mapping at position {mapping_pos} connects languages {language_a} and {language_b} with no registered pair"
            ),
            Self::LinkTargetMismatch {
                link_pos,
                link_type_id,
                declared,
                actual,
            } => write!(
                f,
                "link at position {link_pos} targets a {actual:?} but link type {link_type_id} expects {declared:?}"
            ),
        }
    }
}

/// Save-boundary error taxonomy.
#[derive(Debug)]
pub enum SaveError {
    /// Structural invariant violations, collected across the submission.
    Invariants(Vec<InvariantViolation>),
    /// A named foreign key does not resolve. Fatal; indicates a stale or
    /// forged submission, never retried.
    ReferenceNotFound { kind: &'static str, key: i64 },
    /// Cross-language or link-type compatibility failure. Fatal.
    Incompatible(CompatibilityViolation),
    /// Version-stamp mismatch on a concurrent row. Caller-retryable.
    Conflict { kind: &'static str, key: RecordId },
    /// Opaque persistence failure. Fatal, transaction rolled back.
    Storage(StoreError),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invariants(violations) => {
                write!(f, "submission violates {} invariant(s):", violations.len())?;
                for violation in violations {
                    write!(f, " [{violation}]")?;
                }
                Ok(())
            }
            Self::ReferenceNotFound { kind, key } => {
                write!(f, "referenced {kind} not found: {key}")
            }
            Self::Incompatible(violation) => write!(f, "{violation}"),
            Self::Conflict { kind, key } => {
                write!(f, "concurrent change detected on {kind} {key}; reload and retry")
            }
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SaveError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

/// Maps a single-row miss to the fatal reference error of the save boundary.
pub(crate) fn reference_error(err: StoreError) -> SaveError {
    match err {
        StoreError::RowNotFound { kind, key } => SaveError::ReferenceNotFound { kind, key },
        other => SaveError::Storage(other),
    }
}
