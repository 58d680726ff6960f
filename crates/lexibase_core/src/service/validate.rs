//! Structural validation of lexeme submissions.
//!
//! # Responsibility
//! - Collect every structural invariant violation in one pass so callers see
//!   all problems in a single round trip.
//! - Enforce root immutability rules against the previous snapshot.
//!
//! # Invariants
//! - Validation never mutates the submission and never writes.
//! - Reference-table existence checks honor the caller's verification toggle
//!   verbatim.

use crate::cache::ReferenceCatalog;
use crate::model::keys::{EntityRef, RecordId};
use crate::model::lexeme::{ChangeIntent, Lexeme, Sense};
use crate::repo::StoreResult;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// One structural problem found in a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    UnknownLanguage {
        language_id: RecordId,
    },
    UnknownCategory {
        category_id: RecordId,
    },
    UnknownOrthography {
        variant_pos: usize,
        orthography_id: RecordId,
    },
    UnknownDialect {
        variant_pos: usize,
        dialect_id: RecordId,
    },
    /// Dialect exists but belongs to a different language than the lexeme.
    ForeignDialect {
        variant_pos: usize,
        dialect_id: RecordId,
    },
    UnknownFormType {
        variant_pos: usize,
        form_pos: usize,
        form_type_id: RecordId,
    },
    UnknownLinkType {
        link_pos: usize,
        link_type_id: RecordId,
    },
    /// A variant names a template that is not registered.
    UnknownTemplate {
        variant_pos: usize,
        template_id: RecordId,
    },
    /// A sense references a variant that is not part of this lexeme.
    UnknownVariantRef {
        sense_pos: usize,
        reference: EntityRef,
    },
    /// The same pending tag identifies two children of one collection.
    DuplicatePendingTag {
        tag: i64,
    },
    /// A new synonym group must hold exactly two members.
    NewGroupMemberCount {
        sense_pos: usize,
        members: usize,
    },
    /// A new synonym group must pair the owning sense with exactly one
    /// pre-existing foreign sense.
    NewGroupMembersInvalid {
        sense_pos: usize,
    },
    LanguageChanged {
        from: RecordId,
        to: RecordId,
    },
    CategoryChanged {
        from: RecordId,
        to: RecordId,
    },
    CorrelationChanged,
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLanguage { language_id } => write!(f, "unknown language {language_id}"),
            Self::UnknownCategory { category_id } => write!(f, "unknown category {category_id}"),
            Self::UnknownOrthography {
                variant_pos,
                orthography_id,
            } => write!(
                f,
                "variant {variant_pos} references unknown orthography {orthography_id}"
            ),
            Self::UnknownDialect {
                variant_pos,
                dialect_id,
            } => write!(f, "variant {variant_pos} references unknown dialect {dialect_id}"),
            Self::ForeignDialect {
                variant_pos,
                dialect_id,
            } => write!(
                f,
                "variant {variant_pos} references dialect {dialect_id} of another language"
            ),
            Self::UnknownFormType {
                variant_pos,
                form_pos,
                form_type_id,
            } => write!(
                f,
                "variant {variant_pos} form {form_pos} references unknown form type {form_type_id}"
            ),
            Self::UnknownLinkType {
                link_pos,
                link_type_id,
            } => write!(f, "link {link_pos} references unknown link type {link_type_id}"),
            Self::UnknownTemplate {
                variant_pos,
                template_id,
            } => write!(
                f,
                "variant {variant_pos} references unknown template {template_id}"
            ),
            Self::UnknownVariantRef {
                sense_pos,
                reference,
            } => write!(
                f,
                "sense {sense_pos} references variant {reference} outside this lexeme"
            ),
            Self::DuplicatePendingTag { tag } => {
                write!(f, "pending tag {tag} is used more than once")
            }
            Self::NewGroupMemberCount { sense_pos, members } => write!(
                f,
                "sense {sense_pos} creates a synonym group with {members} member(s), expected 2"
            ),
            Self::NewGroupMembersInvalid { sense_pos } => write!(
                f,
                "sense {sense_pos} creates a synonym group that must pair it with one existing foreign sense"
            ),
            Self::LanguageChanged { from, to } => {
                write!(f, "lexeme language cannot change from {from} to {to}")
            }
            Self::CategoryChanged { from, to } => {
                write!(f, "lexeme category cannot change from {from} to {to}")
            }
            Self::CorrelationChanged => {
                write!(f, "external correlation identifier cannot change once set")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Collects every structural violation in the submission.
///
/// `snapshot` is the previously persisted aggregate for the update flow, or
/// `None` for the create flow. `verify_references` mirrors the bulk-import
/// toggle: when false, reference-table existence checks are skipped.
pub fn validate_structure(
    conn: &Connection,
    catalog: &ReferenceCatalog,
    unit: &Lexeme,
    snapshot: Option<&Lexeme>,
    verify_references: bool,
) -> StoreResult<Vec<InvariantViolation>> {
    let mut violations = Vec::new();

    if let Some(snapshot) = snapshot {
        check_root_immutability(unit, snapshot, &mut violations);
    }

    if verify_references {
        check_reference_existence(conn, catalog, unit, &mut violations)?;
    }

    check_pending_tags(unit, &mut violations);
    check_sense_variant_refs(unit, snapshot, &mut violations);
    check_new_groups(unit, &mut violations);

    Ok(violations)
}

fn check_root_immutability(
    unit: &Lexeme,
    snapshot: &Lexeme,
    violations: &mut Vec<InvariantViolation>,
) {
    if unit.language_id != snapshot.language_id {
        violations.push(InvariantViolation::LanguageChanged {
            from: snapshot.language_id,
            to: unit.language_id,
        });
    }
    if unit.category_id != snapshot.category_id {
        violations.push(InvariantViolation::CategoryChanged {
            from: snapshot.category_id,
            to: unit.category_id,
        });
    }
    if let Some(existing) = snapshot.correlation_id {
        if unit.correlation_id != Some(existing) {
            violations.push(InvariantViolation::CorrelationChanged);
        }
    }
}

fn check_reference_existence(
    conn: &Connection,
    catalog: &ReferenceCatalog,
    unit: &Lexeme,
    violations: &mut Vec<InvariantViolation>,
) -> StoreResult<()> {
    if catalog.languages.get(conn, unit.language_id)?.is_none() {
        violations.push(InvariantViolation::UnknownLanguage {
            language_id: unit.language_id,
        });
    }
    if catalog.categories.get(conn, unit.category_id)?.is_none() {
        violations.push(InvariantViolation::UnknownCategory {
            category_id: unit.category_id,
        });
    }

    for (variant_pos, variant) in unit.variants.iter().enumerate() {
        if variant.intent == ChangeIntent::Delete {
            continue;
        }
        if catalog
            .orthographies
            .get(conn, variant.orthography_id)?
            .is_none()
        {
            violations.push(InvariantViolation::UnknownOrthography {
                variant_pos,
                orthography_id: variant.orthography_id,
            });
        }
        for dialect_id in &variant.dialect_ids {
            match catalog.dialects.get(conn, *dialect_id)? {
                None => violations.push(InvariantViolation::UnknownDialect {
                    variant_pos,
                    dialect_id: *dialect_id,
                }),
                Some(dialect) if dialect.language_id != unit.language_id => {
                    violations.push(InvariantViolation::ForeignDialect {
                        variant_pos,
                        dialect_id: *dialect_id,
                    });
                }
                Some(_) => {}
            }
        }
        for (form_pos, form) in variant.forms.iter().enumerate() {
            if catalog.form_types.get(conn, form.form_type_id)?.is_none() {
                violations.push(InvariantViolation::UnknownFormType {
                    variant_pos,
                    form_pos,
                    form_type_id: form.form_type_id,
                });
            }
        }
        if let Some(template_id) = variant.template_id {
            if catalog.templates.get(conn, template_id)?.is_none() {
                violations.push(InvariantViolation::UnknownTemplate {
                    variant_pos,
                    template_id,
                });
            }
        }
    }

    for (link_pos, link) in unit.links.iter().enumerate() {
        if link.intent == ChangeIntent::Delete {
            continue;
        }
        if catalog.link_types.get(conn, link.link_type_id)?.is_none() {
            violations.push(InvariantViolation::UnknownLinkType {
                link_pos,
                link_type_id: link.link_type_id,
            });
        }
    }

    Ok(())
}

fn check_pending_tags(unit: &Lexeme, violations: &mut Vec<InvariantViolation>) {
    let mut seen = BTreeSet::new();
    let variant_tags = unit.variants.iter().filter_map(|variant| match variant.id {
        EntityRef::Pending(tag) => Some(tag),
        EntityRef::Persisted(_) => None,
    });
    let sense_tags = unit.senses.iter().filter_map(|sense| match sense.id {
        EntityRef::Pending(tag) => Some(tag),
        EntityRef::Persisted(_) => None,
    });
    // Variants and senses are remapped independently, so the same tag in
    // both collections is legal; duplicates within one collection are not.
    for tag in variant_tags {
        if !seen.insert(("variant", tag)) {
            violations.push(InvariantViolation::DuplicatePendingTag { tag });
        }
    }
    for tag in sense_tags {
        if !seen.insert(("sense", tag)) {
            violations.push(InvariantViolation::DuplicatePendingTag { tag });
        }
    }
}

fn check_sense_variant_refs(
    unit: &Lexeme,
    snapshot: Option<&Lexeme>,
    violations: &mut Vec<InvariantViolation>,
) {
    // In the create flow only pending refs can name this lexeme's variants;
    // a persisted ref would point outside the submission.
    let mut allowed: BTreeSet<EntityRef> = unit
        .variants
        .iter()
        .filter(|variant| variant.intent != ChangeIntent::Delete)
        .filter(|variant| snapshot.is_some() || variant.id.is_pending())
        .map(|variant| variant.id)
        .collect();

    if let Some(snapshot) = snapshot {
        let deleted: BTreeSet<RecordId> = unit
            .variants
            .iter()
            .filter(|variant| variant.intent == ChangeIntent::Delete)
            .filter_map(|variant| variant.id.as_persisted())
            .collect();
        for variant in &snapshot.variants {
            if let Some(key) = variant.id.as_persisted() {
                if !deleted.contains(&key) {
                    allowed.insert(EntityRef::Persisted(key));
                }
            }
        }
    }

    for (sense_pos, sense) in unit.senses.iter().enumerate() {
        if sense.intent == ChangeIntent::Delete {
            continue;
        }
        for reference in &sense.variant_refs {
            if !allowed.contains(reference) {
                violations.push(InvariantViolation::UnknownVariantRef {
                    sense_pos,
                    reference: *reference,
                });
            }
        }
    }
}

fn check_new_groups(unit: &Lexeme, violations: &mut Vec<InvariantViolation>) {
    for (sense_pos, sense) in unit.senses.iter().enumerate() {
        if sense.intent == ChangeIntent::Delete {
            continue;
        }
        let Some(group) = &sense.group else { continue };
        if !group.group_ref.is_pending() {
            continue;
        }

        if group.member_refs.len() != 2 {
            violations.push(InvariantViolation::NewGroupMemberCount {
                sense_pos,
                members: group.member_refs.len(),
            });
            continue;
        }
        if !new_group_members_are_valid(sense, group.member_refs.as_slice()) {
            violations.push(InvariantViolation::NewGroupMembersInvalid { sense_pos });
        }
    }
}

fn new_group_members_are_valid(sense: &Sense, members: &[EntityRef]) -> bool {
    let own_count = members
        .iter()
        .filter(|member| **member == sense.id)
        .count();
    let foreign_count = members
        .iter()
        .filter(|member| **member != sense.id && member.as_persisted().is_some())
        .count();
    own_count == 1 && foreign_count == 1
}

#[cfg(test)]
mod tests {
    use super::{validate_structure, InvariantViolation};
    use crate::cache::ReferenceCatalog;
    use crate::db::open_db_in_memory;
    use crate::model::keys::EntityRef;
    use crate::model::lexeme::{ChangeIntent, GroupAttachment, Lexeme, Sense, Variant};
    use rusqlite::Connection;

    fn seeded_connection() -> Connection {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch(
            "INSERT INTO languages (id, code, name) VALUES (1, 'nl', 'Dutch');
             INSERT INTO categories (id, code, name) VALUES (1, 'VERB', 'Verb');
             INSERT INTO orthographies (id, code, name) VALUES (1, 'std', 'Standard');
             INSERT INTO form_types (id, short_name, name) VALUES (1, 'inf', 'Infinitive');",
        )
        .unwrap();
        conn
    }

    fn bare_variant(tag: i64) -> Variant {
        Variant {
            id: EntityRef::Pending(tag),
            orthography_id: 1,
            dialect_ids: Default::default(),
            forms: vec![],
            label: Default::default(),
            auto_label: false,
            template_id: None,
            is_main: false,
            intent: ChangeIntent::Insert,
        }
    }

    fn bare_sense(tag: i64, variant_refs: Vec<EntityRef>) -> Sense {
        Sense {
            id: EntityRef::Pending(tag),
            variant_refs,
            group: None,
            row_version: 0,
            intent: ChangeIntent::Insert,
        }
    }

    fn submission() -> Lexeme {
        Lexeme {
            id: None,
            category_id: 1,
            language_id: 1,
            correlation_id: None,
            is_active: true,
            tags: Default::default(),
            row_version: 0,
            variants: vec![bare_variant(-1)],
            senses: vec![bare_sense(-1, vec![EntityRef::Pending(-1)])],
            mappings: vec![],
            links: vec![],
        }
    }

    #[test]
    fn valid_submission_produces_no_violations() {
        let conn = seeded_connection();
        let catalog = ReferenceCatalog::new();
        let violations =
            validate_structure(&conn, &catalog, &submission(), None, true).unwrap();
        assert!(violations.is_empty());
    }

    #[test]
    fn all_violations_are_collected_in_one_pass() {
        let conn = seeded_connection();
        let catalog = ReferenceCatalog::new();
        let mut unit = submission();
        unit.language_id = 99;
        unit.category_id = 98;
        unit.senses[0]
            .variant_refs
            .push(EntityRef::Pending(-44));

        let violations = validate_structure(&conn, &catalog, &unit, None, true).unwrap();
        assert!(violations.contains(&InvariantViolation::UnknownLanguage { language_id: 99 }));
        assert!(violations.contains(&InvariantViolation::UnknownCategory { category_id: 98 }));
        assert!(violations.contains(&InvariantViolation::UnknownVariantRef {
            sense_pos: 0,
            reference: EntityRef::Pending(-44),
        }));
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn reference_checks_are_skipped_when_toggled_off() {
        let conn = seeded_connection();
        let catalog = ReferenceCatalog::new();
        let mut unit = submission();
        unit.language_id = 99;

        let violations = validate_structure(&conn, &catalog, &unit, None, false).unwrap();
        assert!(violations.is_empty());
    }

    #[test]
    fn duplicate_pending_tags_are_flagged_per_collection() {
        let conn = seeded_connection();
        let catalog = ReferenceCatalog::new();
        let mut unit = submission();
        unit.variants.push(bare_variant(-1));
        // Senses may reuse a variant tag; only same-collection reuse counts.
        unit.senses.push(bare_sense(-2, vec![EntityRef::Pending(-1)]));

        let violations = validate_structure(&conn, &catalog, &unit, None, true).unwrap();
        assert_eq!(
            violations,
            vec![InvariantViolation::DuplicatePendingTag { tag: -1 }]
        );
    }

    #[test]
    fn new_group_membership_shape_is_enforced() {
        let conn = seeded_connection();
        let catalog = ReferenceCatalog::new();
        let mut unit = submission();
        unit.senses[0].group = Some(GroupAttachment {
            group_ref: EntityRef::Pending(-7),
            member_refs: vec![EntityRef::Pending(-1)],
        });
        let violations = validate_structure(&conn, &catalog, &unit, None, true).unwrap();
        assert_eq!(
            violations,
            vec![InvariantViolation::NewGroupMemberCount {
                sense_pos: 0,
                members: 1,
            }]
        );

        unit.senses[0].group = Some(GroupAttachment {
            group_ref: EntityRef::Pending(-7),
            member_refs: vec![EntityRef::Pending(-1), EntityRef::Pending(-9)],
        });
        let violations = validate_structure(&conn, &catalog, &unit, None, true).unwrap();
        assert_eq!(
            violations,
            vec![InvariantViolation::NewGroupMembersInvalid { sense_pos: 0 }]
        );

        unit.senses[0].group = Some(GroupAttachment {
            group_ref: EntityRef::Pending(-7),
            member_refs: vec![EntityRef::Pending(-1), EntityRef::Persisted(77)],
        });
        let violations = validate_structure(&conn, &catalog, &unit, None, true).unwrap();
        assert!(violations.is_empty());
    }

    #[test]
    fn root_immutability_is_checked_against_snapshot() {
        let conn = seeded_connection();
        let catalog = ReferenceCatalog::new();

        let mut snapshot = submission();
        snapshot.id = Some(5);
        snapshot.correlation_id = Some(uuid::Uuid::new_v4());
        snapshot.variants.clear();
        snapshot.senses.clear();

        let mut unit = submission();
        unit.id = Some(5);
        unit.language_id = 1;
        unit.category_id = 1;
        unit.correlation_id = None;
        unit.variants.clear();
        unit.senses.clear();

        let violations =
            validate_structure(&conn, &catalog, &unit, Some(&snapshot), true).unwrap();
        assert_eq!(violations, vec![InvariantViolation::CorrelationChanged]);
    }
}
