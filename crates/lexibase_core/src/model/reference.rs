//! Reference-table records consulted during lexeme persistence.
//!
//! # Responsibility
//! - Define the small, low-cardinality lookup records fronted by caches.
//! - Keep classification semantics (link target kinds, template scoping) here.
//!
//! # Invariants
//! - Every record key is a positive storage row id.
//! - `Dialect` always belongs to exactly one language.
//! - A `Template` with a non-empty `name` is excluded from automatic lookup.

use crate::model::keys::{Keyed, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A language the dictionary can hold content in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub id: RecordId,
    /// Short ISO-style code, unique.
    pub code: String,
    pub name: String,
}

/// Word-class / part-of-speech classification for lexemes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: RecordId,
    pub code: String,
    pub name: String,
}

/// Writing system a variant is spelled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orthography {
    pub id: RecordId,
    pub code: String,
    pub name: String,
}

/// Regional dialect, scoped to one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub id: RecordId,
    pub language_id: RecordId,
    pub code: String,
    pub name: String,
}

/// Kind of word form a variant can carry (infinitive, plural, ...).
///
/// `short_name` is the token template placeholders refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormType {
    pub id: RecordId,
    pub short_name: String,
    pub name: String,
}

/// What a typed link is allowed to point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTargetKind {
    Sense,
    Lexeme,
}

impl LinkTargetKind {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Sense => "sense",
            Self::Lexeme => "lexeme",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "sense" => Some(Self::Sense),
            "lexeme" => Some(Self::Lexeme),
            _ => None,
        }
    }
}

/// Registered kind of typed relation between dictionary entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkType {
    pub id: RecordId,
    pub code: String,
    pub name: String,
    pub target_kind: LinkTargetKind,
}

/// Registered cross-language compatibility. Direction does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub id: RecordId,
    pub language_a_id: RecordId,
    pub language_b_id: RecordId,
}

impl LanguagePair {
    /// Returns whether this pair connects the two languages, either way round.
    pub fn connects(&self, one: RecordId, other: RecordId) -> bool {
        (self.language_a_id == one && self.language_b_id == other)
            || (self.language_a_id == other && self.language_b_id == one)
    }
}

/// Display-label pattern scoped by classification attributes.
///
/// The four text slots may contain `$(short_name)` / `${short_name}`
/// placeholders referring to form types. Unset scoping fields act as
/// wildcards during automatic lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: RecordId,
    /// Non-empty names opt the template out of automatic lookup.
    pub name: Option<String>,
    pub category_id: RecordId,
    pub language_id: Option<RecordId>,
    pub dialect_ids: BTreeSet<RecordId>,
    pub orthography_id: Option<RecordId>,
    pub pre_text: Option<String>,
    pub main_text: Option<String>,
    pub post_text: Option<String>,
    pub also_text: Option<String>,
}

impl Template {
    /// Whether the template participates in automatic scope-based lookup.
    pub fn is_auto_selectable(&self) -> bool {
        self.name.as_deref().map_or(true, |name| name.trim().is_empty())
    }
}

macro_rules! keyed_by_id {
    ($($record:ty),+ $(,)?) => {
        $(impl Keyed for $record {
            type Key = RecordId;

            fn key(&self) -> RecordId {
                self.id
            }

            fn set_key(&mut self, key: RecordId) {
                self.id = key;
            }
        })+
    };
}

keyed_by_id!(Language, Category, Orthography, Dialect, FormType, LinkType, LanguagePair, Template);
