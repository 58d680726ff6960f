//! Lexeme aggregate model.
//!
//! # Responsibility
//! - Define the composite lexeme graph submitted by callers and loaded back
//!   as the persisted snapshot.
//! - Provide aggregate-level normalization helpers (main flag, tags).
//!
//! # Invariants
//! - At most one non-deleted variant carries the main flag after
//!   normalization.
//! - Child cross-references use `EntityRef`; pending tags never survive a
//!   successful save.
//! - `row_version` stamps are owned by storage; callers only echo them back.

use crate::model::keys::{EntityRef, Keyed, RecordId};
use crate::model::reference::LinkTargetKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Per-child intent tag for the diff-and-update flow.
///
/// The create flow ignores the tag and treats every child as `Insert`,
/// except `Delete`-marked children, which are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeIntent {
    Insert,
    Update,
    Delete,
    NoChange,
}

impl Default for ChangeIntent {
    fn default() -> Self {
        Self::NoChange
    }
}

/// Display label fragments derived from a variant's forms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedLabel {
    #[serde(default)]
    pub pre: String,
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub post: String,
    #[serde(default)]
    pub also: String,
}

impl RenderedLabel {
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.main.is_empty() && self.post.is_empty() && self.also.is_empty()
    }
}

/// One typed word form of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub form_type_id: RecordId,
    pub text: String,
}

/// One way of writing the lexeme in a specific orthography/dialect scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: EntityRef,
    pub orthography_id: RecordId,
    #[serde(default)]
    pub dialect_ids: BTreeSet<RecordId>,
    #[serde(default)]
    pub forms: Vec<Form>,
    /// Ignored on write when `auto_label` is set; storage-derived otherwise.
    #[serde(default)]
    pub label: RenderedLabel,
    /// When set, the label is computed by template resolution during save.
    #[serde(default = "default_true")]
    pub auto_label: bool,
    /// Direct template choice; bypasses automatic scope-based lookup.
    #[serde(default)]
    pub template_id: Option<RecordId>,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub intent: ChangeIntent,
}

fn default_true() -> bool {
    true
}

/// Synonym-group attachment carried by a sense.
///
/// `member_refs` is meaningful only while the group itself is new: it must
/// then list the owning sense plus exactly one pre-existing foreign sense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAttachment {
    pub group_ref: EntityRef,
    #[serde(default)]
    pub member_refs: Vec<EntityRef>,
}

/// One distinct meaning of the lexeme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sense {
    pub id: EntityRef,
    /// Subset of this lexeme's variant identifiers the sense applies to.
    #[serde(default)]
    pub variant_refs: Vec<EntityRef>,
    #[serde(default)]
    pub group: Option<GroupAttachment>,
    #[serde(default)]
    pub row_version: i64,
    #[serde(default)]
    pub intent: ChangeIntent,
}

/// Cross-language equivalence between one of this lexeme's senses and a
/// persisted foreign sense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: EntityRef,
    pub sense_ref: EntityRef,
    pub target_sense_id: RecordId,
    #[serde(default)]
    pub intent: ChangeIntent,
}

/// Typed relation from one of this lexeme's senses to another entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: EntityRef,
    pub link_type_id: RecordId,
    pub sense_ref: EntityRef,
    pub target_kind: LinkTargetKind,
    pub target_id: RecordId,
    #[serde(default)]
    pub intent: ChangeIntent,
}

/// The aggregate root: one dictionary entry with all of its sub-entities.
///
/// The same shape serves as submission (new entries have `id: None` and
/// pending child refs) and as the persisted snapshot loaded back from
/// storage (all refs persisted, stamps filled in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lexeme {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub category_id: RecordId,
    pub language_id: RecordId,
    /// External correlation identity; immutable once set.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub row_version: i64,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub senses: Vec<Sense>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Lexeme {
    /// Enforces single-main-variant over the non-deleted variants.
    ///
    /// Zero flagged variants: the first non-deleted one becomes main.
    /// Multiple flagged: the first-found keeps the flag, the rest lose it.
    /// Returns whether any flag changed.
    pub fn normalize_main_variant(&mut self) -> bool {
        let mut changed = false;
        let mut seen_main = false;
        for variant in &mut self.variants {
            if variant.intent == ChangeIntent::Delete {
                if variant.is_main {
                    variant.is_main = false;
                    changed = true;
                }
                continue;
            }
            if variant.is_main {
                if seen_main {
                    variant.is_main = false;
                    changed = true;
                }
                seen_main = true;
            }
        }
        if !seen_main {
            if let Some(first) = self
                .variants
                .iter_mut()
                .find(|variant| variant.intent != ChangeIntent::Delete)
            {
                first.is_main = true;
                changed = true;
            }
        }
        changed
    }

    /// Returns tags trimmed, lowercased and deduplicated.
    pub fn normalized_tags(&self) -> BTreeSet<String> {
        self.tags
            .iter()
            .filter_map(|tag| normalize_tag(tag))
            .collect()
    }
}

impl Keyed for Lexeme {
    type Key = Option<RecordId>;

    fn key(&self) -> Option<RecordId> {
        self.id
    }

    fn set_key(&mut self, key: Option<RecordId>) {
        self.id = key;
    }
}

/// Normalizes one tag value; blank tags are dropped.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}
