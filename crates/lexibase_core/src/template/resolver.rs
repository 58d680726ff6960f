//! Specificity-ordered template selection.

use crate::model::keys::RecordId;
use crate::model::reference::Template;
use std::collections::BTreeSet;

/// Selects the most specific template applicable to the given scope.
///
/// Candidates are tried in five specificity bands, most specific first;
/// within a band the first candidate (in pool order) wins:
///
/// 1. language + dialect condition + orthography
/// 2. language + dialect condition, orthography unset
/// 3. language only, dialect set and orthography unset
/// 4. orthography only, language and dialect set unset
/// 5. fully generic: language, dialect set and orthography all unset
///
/// Every band requires the classification to match. The dialect condition is
/// satisfied when the queried set is a non-empty subset of the candidate's,
/// or both sets are empty. Named templates never participate; they are
/// selectable only by direct reference.
pub fn resolve_template<'pool>(
    candidates: &'pool [Template],
    category_id: RecordId,
    language_id: RecordId,
    dialect_ids: &BTreeSet<RecordId>,
    orthography_id: RecordId,
) -> Option<&'pool Template> {
    let scoped: Vec<&Template> = candidates
        .iter()
        .filter(|candidate| candidate.is_auto_selectable() && candidate.category_id == category_id)
        .collect();

    let language_match = |candidate: &Template| candidate.language_id == Some(language_id);
    let dialect_match = |candidate: &Template| {
        if dialect_ids.is_empty() {
            candidate.dialect_ids.is_empty()
        } else {
            dialect_ids.is_subset(&candidate.dialect_ids)
        }
    };
    let orthography_match =
        |candidate: &Template| candidate.orthography_id == Some(orthography_id);

    let bands: [&dyn Fn(&Template) -> bool; 5] = [
        &|candidate| {
            language_match(candidate) && dialect_match(candidate) && orthography_match(candidate)
        },
        &|candidate| {
            language_match(candidate)
                && dialect_match(candidate)
                && candidate.orthography_id.is_none()
        },
        &|candidate| {
            language_match(candidate)
                && candidate.dialect_ids.is_empty()
                && candidate.orthography_id.is_none()
        },
        &|candidate| {
            candidate.language_id.is_none()
                && candidate.dialect_ids.is_empty()
                && orthography_match(candidate)
        },
        &|candidate| {
            candidate.language_id.is_none()
                && candidate.dialect_ids.is_empty()
                && candidate.orthography_id.is_none()
        },
    ];

    for band in bands {
        if let Some(found) = scoped.iter().find(|candidate| band(candidate)).copied() {
            return Some(found);
        }
    }
    None
}
