//! Lexeme aggregate save orchestration.
//!
//! # Responsibility
//! - Persist or update one lexeme aggregate inside a single transaction,
//!   in dependency order: root, variants, labels, senses, groups, then
//!   mappings and links.
//! - Remap pending (negative) child references to generated keys so no
//!   temporary identifier ever reaches storage.
//!
//! # Invariants
//! - A failed step rolls the whole transaction back; no partial aggregate is
//!   observable.
//! - Cross-aggregate writes (synonym-group mirrors) accumulate as explicit
//!   side effects and apply immediately before commit, version-stamped.
//! - Two saves of the same aggregate are serialized by the version stamp,
//!   not by locks.

use crate::cache::ReferenceCatalog;
use crate::model::keys::{EntityRef, RecordId};
use crate::model::lexeme::{ChangeIntent, GroupAttachment, Lexeme, Link, Sense, Variant};
use crate::model::reference::LinkTargetKind;
use crate::repo::lexeme_repo::{SqliteLexemeRepository, StampedWrite};
use crate::repo::{StoreError, StoreOp, StoreResult};
use crate::service::{reference_error, SaveError};
use crate::template::{render_label, resolve_template, RenderIssue};
use log::{error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Who is performing the mutation and how strictly to validate references.
///
/// The actor is threaded explicitly; there is no ambient identity. Bulk
/// importers may turn `verify_references` off; the flag is honored verbatim.
#[derive(Debug, Clone)]
pub struct SaveContext {
    pub actor: String,
    pub verify_references: bool,
}

impl SaveContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            verify_references: true,
        }
    }

    pub fn without_reference_checks(mut self) -> Self {
        self.verify_references = false;
        self
    }
}

/// Result of a successful aggregate save.
#[derive(Debug, Clone, Default)]
pub struct SaveSummary {
    pub lexeme_id: RecordId,
    /// Pending variant tag to generated key.
    pub variant_keys: BTreeMap<i64, RecordId>,
    /// Pending sense tag to generated key.
    pub sense_keys: BTreeMap<i64, RecordId>,
    /// Non-fatal label problems, surfaced alongside success.
    pub render_issues: Vec<RenderIssue>,
}

/// Deferred write against a sense owned by another aggregate.
enum SideEffect {
    AttachForeignSense {
        sense_id: RecordId,
        previous_group_id: Option<RecordId>,
        group_id: RecordId,
        expected_version: i64,
    },
}

/// Orchestrates lexeme aggregate persistence over shared reference caches.
pub struct LexemeService {
    catalog: Arc<ReferenceCatalog>,
}

impl LexemeService {
    pub fn new(catalog: Arc<ReferenceCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    /// Persists a whole new aggregate and returns the generated keys.
    pub fn create(
        &self,
        conn: &Connection,
        submission: &Lexeme,
        ctx: &SaveContext,
    ) -> Result<SaveSummary, SaveError> {
        let started_at = Instant::now();
        info!(
            "event=lexeme_save module=service status=start mode=create actor={}",
            ctx.actor
        );
        match self.create_inner(conn, submission, ctx) {
            Ok(summary) => {
                info!(
                    "event=lexeme_save module=service status=ok mode=create lexeme_id={} variants={} senses={} render_issues={} duration_ms={}",
                    summary.lexeme_id,
                    summary.variant_keys.len(),
                    summary.sense_keys.len(),
                    summary.render_issues.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(summary)
            }
            Err(err) => {
                error!(
                    "event=lexeme_save module=service status=error mode=create duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Applies a diffed submission against the previously loaded snapshot.
    pub fn update(
        &self,
        conn: &Connection,
        id: RecordId,
        submission: &Lexeme,
        snapshot: &Lexeme,
        ctx: &SaveContext,
    ) -> Result<SaveSummary, SaveError> {
        let started_at = Instant::now();
        info!(
            "event=lexeme_save module=service status=start mode=update lexeme_id={id} actor={}",
            ctx.actor
        );
        match self.update_inner(conn, id, submission, snapshot, ctx) {
            Ok(summary) => {
                info!(
                    "event=lexeme_save module=service status=ok mode=update lexeme_id={id} render_issues={} duration_ms={}",
                    summary.render_issues.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(summary)
            }
            Err(err) => {
                error!(
                    "event=lexeme_save module=service status=error mode=update lexeme_id={id} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Loads one persisted aggregate, e.g. as the snapshot for `update`.
    pub fn load(
        &self,
        conn: &Connection,
        id: RecordId,
        include_deleted: bool,
    ) -> Result<Option<Lexeme>, SaveError> {
        let repo = SqliteLexemeRepository::try_new(conn)?;
        Ok(repo.load_lexeme(id, include_deleted)?)
    }

    /// Tombstones one aggregate root.
    pub fn soft_delete(
        &self,
        conn: &Connection,
        id: RecordId,
        ctx: &SaveContext,
    ) -> Result<(), SaveError> {
        let repo = SqliteLexemeRepository::try_new(conn)?;
        repo.soft_delete_lexeme(id, &ctx.actor).map_err(reference_error)
    }

    fn create_inner(
        &self,
        conn: &Connection,
        submission: &Lexeme,
        ctx: &SaveContext,
    ) -> Result<SaveSummary, SaveError> {
        let repo = SqliteLexemeRepository::try_new(conn)?;
        let violations = super::validate::validate_structure(
            conn,
            &self.catalog,
            submission,
            None,
            ctx.verify_references,
        )?;
        if !violations.is_empty() {
            return Err(SaveError::Invariants(violations));
        }

        let mut unit = submission.clone();
        unit.normalize_main_variant();

        let tx = begin_unit_of_work(conn)?;

        let lexeme_id = repo.insert_lexeme(&unit, &ctx.actor)?;
        repo.replace_tags(lexeme_id, &unit.normalized_tags())?;

        let mut summary = SaveSummary {
            lexeme_id,
            ..SaveSummary::default()
        };

        // Variants first; labels need their rows and forms in place.
        let mut written_variants: Vec<(usize, RecordId)> = Vec::new();
        for (variant_pos, variant) in unit.variants.iter().enumerate() {
            if variant.intent == ChangeIntent::Delete {
                continue;
            }
            let variant_id = repo.insert_variant(lexeme_id, variant)?;
            if let EntityRef::Pending(tag) = variant.id {
                summary.variant_keys.insert(tag, variant_id);
            }
            repo.replace_variant_dialects(variant_id, &variant.dialect_ids)?;
            repo.replace_forms(variant_id, &variant.forms)?;
            written_variants.push((variant_pos, variant_id));
        }

        for (variant_pos, variant_id) in &written_variants {
            let variant = &unit.variants[*variant_pos];
            if variant.auto_label {
                self.apply_variant_label(
                    conn,
                    &repo,
                    &unit,
                    *variant_pos,
                    variant,
                    *variant_id,
                    &mut summary.render_issues,
                )?;
            }
        }

        for (sense_pos, sense) in unit.senses.iter().enumerate() {
            if sense.intent == ChangeIntent::Delete {
                continue;
            }
            let sense_id = repo.insert_sense(lexeme_id, sense_pos as i64)?;
            if let EntityRef::Pending(tag) = sense.id {
                summary.sense_keys.insert(tag, sense_id);
            }
            let variant_ids =
                resolve_refs(&sense.variant_refs, &summary.variant_keys, "variant")?;
            repo.replace_sense_variants(sense_id, &variant_ids)?;
        }

        let mut side_effects = Vec::new();
        for sense in &unit.senses {
            if sense.intent == ChangeIntent::Delete {
                continue;
            }
            let Some(group) = &sense.group else { continue };
            let own_sense_id = resolve_ref(sense.id, &summary.sense_keys, "sense")?;
            self.attach_sense_group(&repo, own_sense_id, group, &mut side_effects)?;
        }

        for (mapping_pos, mapping) in unit.mappings.iter().enumerate() {
            if mapping.intent == ChangeIntent::Delete {
                continue;
            }
            let sense_id = resolve_ref(mapping.sense_ref, &summary.sense_keys, "sense")?;
            self.check_mapping_compatibility(
                conn,
                &repo,
                mapping_pos,
                sense_id,
                mapping.target_sense_id,
            )?;
            repo.insert_mapping(sense_id, mapping.target_sense_id)?;
        }

        for (link_pos, link) in unit.links.iter().enumerate() {
            if link.intent == ChangeIntent::Delete {
                continue;
            }
            let sense_id = resolve_ref(link.sense_ref, &summary.sense_keys, "sense")?;
            self.check_link_compatibility(conn, &repo, link_pos, link, ctx)?;
            repo.insert_link(link.link_type_id, sense_id, link.target_kind, link.target_id)?;
        }

        apply_side_effects(&repo, side_effects)?;

        tx.commit()
            .map_err(|err| StoreError::backend(StoreOp::Create, "lexeme", err))?;
        Ok(summary)
    }

    fn update_inner(
        &self,
        conn: &Connection,
        id: RecordId,
        submission: &Lexeme,
        snapshot: &Lexeme,
        ctx: &SaveContext,
    ) -> Result<SaveSummary, SaveError> {
        let repo = SqliteLexemeRepository::try_new(conn)?;
        if snapshot.id != Some(id) || submission.id != Some(id) {
            return Err(SaveError::ReferenceNotFound {
                kind: "lexeme",
                key: id,
            });
        }

        let violations = super::validate::validate_structure(
            conn,
            &self.catalog,
            submission,
            Some(snapshot),
            ctx.verify_references,
        )?;
        if !violations.is_empty() {
            return Err(SaveError::Invariants(violations));
        }

        let mut unit = submission.clone();
        unit.normalize_main_variant();

        let snapshot_variants = index_by_key(&snapshot.variants, |variant: &Variant| variant.id);
        let snapshot_senses = index_by_key(&snapshot.senses, |sense: &Sense| sense.id);
        let snapshot_mappings = index_by_key(&snapshot.mappings, |mapping| mapping.id);
        let snapshot_links = index_by_key(&snapshot.links, |link| link.id);

        let tx = begin_unit_of_work(conn)?;

        require_applied(
            repo.update_lexeme(id, &unit, &ctx.actor, snapshot.row_version)?,
            "lexeme",
            id,
        )?;
        repo.replace_tags(id, &unit.normalized_tags())?;

        let mut summary = SaveSummary {
            lexeme_id: id,
            ..SaveSummary::default()
        };

        let mut written_variants: Vec<(usize, RecordId)> = Vec::new();
        for (variant_pos, variant) in unit.variants.iter().enumerate() {
            match variant.intent {
                ChangeIntent::Insert => {
                    let variant_id = repo.insert_variant(id, variant)?;
                    if let EntityRef::Pending(tag) = variant.id {
                        summary.variant_keys.insert(tag, variant_id);
                    }
                    repo.replace_variant_dialects(variant_id, &variant.dialect_ids)?;
                    repo.replace_forms(variant_id, &variant.forms)?;
                    written_variants.push((variant_pos, variant_id));
                }
                ChangeIntent::Update => {
                    let key = known_key(variant.id, &snapshot_variants, "variant")?;
                    repo.update_variant(key, variant).map_err(reference_error)?;
                    repo.replace_variant_dialects(key, &variant.dialect_ids)?;
                    // Forms are replaced wholesale; individual forms are not
                    // independently addressable by callers.
                    repo.replace_forms(key, &variant.forms)?;
                    if !variant.auto_label {
                        repo.update_variant_label(key, &variant.label)
                            .map_err(reference_error)?;
                    }
                    written_variants.push((variant_pos, key));
                }
                ChangeIntent::Delete => {
                    let key = known_key(variant.id, &snapshot_variants, "variant")?;
                    repo.delete_variant(key).map_err(reference_error)?;
                }
                ChangeIntent::NoChange => {
                    // The normalized main flag may still differ from storage.
                    if let Some(key) = variant.id.as_persisted() {
                        if snapshot_variants
                            .get(&variant.id)
                            .is_some_and(|previous| previous.is_main != variant.is_main)
                        {
                            repo.update_variant(key, variant).map_err(reference_error)?;
                        }
                    }
                }
            }
        }

        for (variant_pos, variant_id) in &written_variants {
            let variant = &unit.variants[*variant_pos];
            if variant.auto_label {
                self.apply_variant_label(
                    conn,
                    &repo,
                    &unit,
                    *variant_pos,
                    variant,
                    *variant_id,
                    &mut summary.render_issues,
                )?;
            }
        }

        let mut side_effects = Vec::new();
        for (sense_pos, sense) in unit.senses.iter().enumerate() {
            let intent = effective_sense_intent(sense, &snapshot_senses);
            match intent {
                ChangeIntent::Insert => {
                    let sense_id = repo.insert_sense(id, sense_pos as i64)?;
                    if let EntityRef::Pending(tag) = sense.id {
                        summary.sense_keys.insert(tag, sense_id);
                    }
                    let variant_ids =
                        resolve_refs(&sense.variant_refs, &summary.variant_keys, "variant")?;
                    repo.replace_sense_variants(sense_id, &variant_ids)?;
                    if let Some(group) = &sense.group {
                        self.attach_sense_group(&repo, sense_id, group, &mut side_effects)?;
                    }
                }
                ChangeIntent::Update => {
                    let key = known_key(sense.id, &snapshot_senses, "sense")?;
                    let previous = *snapshot_senses
                        .get(&sense.id)
                        .ok_or(SaveError::ReferenceNotFound {
                            kind: "sense",
                            key,
                        })?;
                    require_applied(
                        repo.update_sense(key, sense_pos as i64, previous.row_version)?,
                        "sense",
                        key,
                    )?;
                    let variant_ids =
                        resolve_refs(&sense.variant_refs, &summary.variant_keys, "variant")?;
                    repo.replace_sense_variants(key, &variant_ids)?;
                    self.transition_sense_group(&repo, key, previous, sense, &mut side_effects)?;
                }
                ChangeIntent::Delete => {
                    let key = known_key(sense.id, &snapshot_senses, "sense")?;
                    let previous = *snapshot_senses
                        .get(&sense.id)
                        .ok_or(SaveError::ReferenceNotFound {
                            kind: "sense",
                            key,
                        })?;
                    // Mirror the bidirectional invariant before the row goes.
                    if let Some(group) = &previous.group {
                        if let Some(group_id) = group.group_ref.as_persisted() {
                            repo.remove_group_member(group_id, key)?;
                        }
                    }
                    require_applied(repo.delete_sense(key, previous.row_version)?, "sense", key)?;
                }
                ChangeIntent::NoChange => {}
            }
        }

        for (mapping_pos, mapping) in unit.mappings.iter().enumerate() {
            match mapping.intent {
                ChangeIntent::Insert => {
                    let sense_id = resolve_ref(mapping.sense_ref, &summary.sense_keys, "sense")?;
                    self.check_mapping_compatibility(
                        conn,
                        &repo,
                        mapping_pos,
                        sense_id,
                        mapping.target_sense_id,
                    )?;
                    repo.insert_mapping(sense_id, mapping.target_sense_id)?;
                }
                ChangeIntent::Update => {
                    let key = known_key(mapping.id, &snapshot_mappings, "mapping")?;
                    let sense_id = resolve_ref(mapping.sense_ref, &summary.sense_keys, "sense")?;
                    self.check_mapping_compatibility(
                        conn,
                        &repo,
                        mapping_pos,
                        sense_id,
                        mapping.target_sense_id,
                    )?;
                    repo.update_mapping(key, sense_id, mapping.target_sense_id)
                        .map_err(reference_error)?;
                }
                ChangeIntent::Delete => {
                    let key = known_key(mapping.id, &snapshot_mappings, "mapping")?;
                    repo.delete_mapping(key).map_err(reference_error)?;
                }
                ChangeIntent::NoChange => {}
            }
        }

        for (link_pos, link) in unit.links.iter().enumerate() {
            match link.intent {
                ChangeIntent::Insert => {
                    let sense_id = resolve_ref(link.sense_ref, &summary.sense_keys, "sense")?;
                    self.check_link_compatibility(conn, &repo, link_pos, link, ctx)?;
                    repo.insert_link(
                        link.link_type_id,
                        sense_id,
                        link.target_kind,
                        link.target_id,
                    )?;
                }
                ChangeIntent::Update => {
                    let key = known_key(link.id, &snapshot_links, "link")?;
                    let sense_id = resolve_ref(link.sense_ref, &summary.sense_keys, "sense")?;
                    self.check_link_compatibility(conn, &repo, link_pos, link, ctx)?;
                    repo.update_link(key, link.link_type_id, sense_id, link.target_kind, link.target_id)
                        .map_err(reference_error)?;
                }
                ChangeIntent::Delete => {
                    let key = known_key(link.id, &snapshot_links, "link")?;
                    repo.delete_link(key).map_err(reference_error)?;
                }
                ChangeIntent::NoChange => {}
            }
        }

        apply_side_effects(&repo, side_effects)?;

        tx.commit()
            .map_err(|err| StoreError::backend(StoreOp::Update, "lexeme", err))?;
        Ok(summary)
    }

    /// Resolves and renders the variant's label, persisting the fragments.
    ///
    /// Template and placeholder problems are collected, not thrown, so one
    /// bad template does not abort sibling variants.
    #[allow(clippy::too_many_arguments)]
    fn apply_variant_label(
        &self,
        conn: &Connection,
        repo: &SqliteLexemeRepository<'_>,
        unit: &Lexeme,
        variant_pos: usize,
        variant: &Variant,
        variant_id: RecordId,
        issues: &mut Vec<RenderIssue>,
    ) -> Result<(), SaveError> {
        let template = match variant.template_id {
            Some(template_id) => Some(
                self.catalog
                    .templates
                    .get(conn, template_id)?
                    .ok_or(SaveError::ReferenceNotFound {
                        kind: "template",
                        key: template_id,
                    })?,
            ),
            None => {
                let pool = self
                    .catalog
                    .templates
                    .get_by_group(conn, unit.category_id)?
                    .unwrap_or_default();
                resolve_template(
                    &pool,
                    unit.category_id,
                    unit.language_id,
                    &variant.dialect_ids,
                    variant.orthography_id,
                )
                .cloned()
            }
        };

        let Some(template) = template else {
            issues.push(RenderIssue::TemplateNotFound { variant_pos });
            return Ok(());
        };

        let forms = self.forms_by_type(conn, variant)?;
        let (label, missing) = render_label(&template, &forms);
        for item in missing {
            issues.push(RenderIssue::MissingForm {
                variant_pos,
                slot: item.slot,
                placeholder: item.placeholder,
            });
        }
        repo.update_variant_label(variant_id, &label)
            .map_err(reference_error)
    }

    /// Builds the short-name to text map for rendering; first form of each
    /// type wins.
    fn forms_by_type(
        &self,
        conn: &Connection,
        variant: &Variant,
    ) -> StoreResult<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for form in &variant.forms {
            let Some(form_type) = self.catalog.form_types.get(conn, form.form_type_id)? else {
                continue;
            };
            map.entry(form_type.short_name)
                .or_insert_with(|| form.text.clone());
        }
        Ok(map)
    }

    fn attach_sense_group(
        &self,
        repo: &SqliteLexemeRepository<'_>,
        own_sense_id: RecordId,
        attachment: &GroupAttachment,
        side_effects: &mut Vec<SideEffect>,
    ) -> Result<(), SaveError> {
        match attachment.group_ref {
            EntityRef::Pending(_) => {
                let foreign_id = attachment
                    .member_refs
                    .iter()
                    .filter_map(|member| member.as_persisted())
                    .find(|member| *member != own_sense_id)
                    .ok_or(SaveError::ReferenceNotFound {
                        kind: "sense",
                        key: attachment.group_ref.raw(),
                    })?;
                let foreign =
                    repo.sense_owner(foreign_id)?
                        .ok_or(SaveError::ReferenceNotFound {
                            kind: "sense",
                            key: foreign_id,
                        })?;

                let group_id = repo.insert_group()?;
                repo.insert_group_member(group_id, own_sense_id)?;
                repo.set_sense_group(own_sense_id, Some(group_id))
                    .map_err(reference_error)?;
                side_effects.push(SideEffect::AttachForeignSense {
                    sense_id: foreign_id,
                    previous_group_id: foreign.group_id,
                    group_id,
                    expected_version: foreign.row_version,
                });
            }
            EntityRef::Persisted(group_id) => {
                if !repo.group_exists(group_id)? {
                    return Err(SaveError::ReferenceNotFound {
                        kind: "synonym_group",
                        key: group_id,
                    });
                }
                repo.insert_group_member(group_id, own_sense_id)?;
                repo.set_sense_group(own_sense_id, Some(group_id))
                    .map_err(reference_error)?;
            }
        }
        Ok(())
    }

    fn transition_sense_group(
        &self,
        repo: &SqliteLexemeRepository<'_>,
        sense_id: RecordId,
        previous: &Sense,
        current: &Sense,
        side_effects: &mut Vec<SideEffect>,
    ) -> Result<(), SaveError> {
        let previous_group = previous
            .group
            .as_ref()
            .and_then(|group| group.group_ref.as_persisted());

        match (&current.group, previous_group) {
            (None, None) => Ok(()),
            (None, Some(old_group_id)) => {
                // The group persists in reduced form; only this membership
                // and pointer go away.
                repo.remove_group_member(old_group_id, sense_id)?;
                repo.set_sense_group(sense_id, None).map_err(reference_error)
            }
            (Some(attachment), None) => {
                self.attach_sense_group(repo, sense_id, attachment, side_effects)
            }
            (Some(attachment), Some(old_group_id)) => {
                if attachment.group_ref == EntityRef::Persisted(old_group_id) {
                    return Ok(());
                }
                repo.remove_group_member(old_group_id, sense_id)?;
                self.attach_sense_group(repo, sense_id, attachment, side_effects)
            }
        }
    }

    fn check_mapping_compatibility(
        &self,
        conn: &Connection,
        repo: &SqliteLexemeRepository<'_>,
        mapping_pos: usize,
        sense_id: RecordId,
        target_sense_id: RecordId,
    ) -> Result<(), SaveError> {
        let own = repo
            .sense_owner(sense_id)?
            .ok_or(SaveError::ReferenceNotFound {
                kind: "sense",
                key: sense_id,
            })?;
        let target = repo
            .sense_owner(target_sense_id)?
            .ok_or(SaveError::ReferenceNotFound {
                kind: "sense",
                key: target_sense_id,
            })?;

        if !self
            .catalog
            .has_language_pair(conn, own.language_id, target.language_id)?
        {
            return Err(SaveError::Incompatible(
                super::CompatibilityViolation::UnpairedLanguages {
                    mapping_pos,
                    language_a: own.language_id,
                    language_b: target.language_id,
                },
            ));
        }
        Ok(())
    }

    fn check_link_compatibility(
        &self,
        conn: &Connection,
        repo: &SqliteLexemeRepository<'_>,
        link_pos: usize,
        link: &Link,
        ctx: &SaveContext,
    ) -> Result<(), SaveError> {
        let link_type = self
            .catalog
            .link_types
            .get(conn, link.link_type_id)?
            .ok_or(SaveError::ReferenceNotFound {
                kind: "link_type",
                key: link.link_type_id,
            })?;
        if link_type.target_kind != link.target_kind {
            return Err(SaveError::Incompatible(
                super::CompatibilityViolation::LinkTargetMismatch {
                    link_pos,
                    link_type_id: link.link_type_id,
                    declared: link_type.target_kind,
                    actual: link.target_kind,
                },
            ));
        }

        if ctx.verify_references {
            let exists = match link.target_kind {
                LinkTargetKind::Sense => repo.sense_owner(link.target_id)?.is_some(),
                LinkTargetKind::Lexeme => repo.lexeme_exists(link.target_id)?,
            };
            if !exists {
                return Err(SaveError::ReferenceNotFound {
                    kind: link.target_kind.as_db(),
                    key: link.target_id,
                });
            }
        }
        Ok(())
    }
}

fn begin_unit_of_work(conn: &Connection) -> Result<Transaction<'_>, SaveError> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|err| SaveError::Storage(StoreError::backend(StoreOp::Create, "lexeme", err)))
}

fn apply_side_effects(
    repo: &SqliteLexemeRepository<'_>,
    side_effects: Vec<SideEffect>,
) -> Result<(), SaveError> {
    for effect in side_effects {
        let SideEffect::AttachForeignSense {
            sense_id,
            previous_group_id,
            group_id,
            expected_version,
        } = effect;
        match repo.set_sense_group_stamped(sense_id, Some(group_id), expected_version)? {
            StampedWrite::Applied => {
                if let Some(previous) = previous_group_id {
                    repo.remove_group_member(previous, sense_id)?;
                }
                repo.insert_group_member(group_id, sense_id)?;
            }
            StampedWrite::StaleVersion { .. } => {
                return Err(SaveError::Conflict {
                    kind: "sense",
                    key: sense_id,
                })
            }
            StampedWrite::Missing => {
                return Err(SaveError::ReferenceNotFound {
                    kind: "sense",
                    key: sense_id,
                })
            }
        }
    }
    Ok(())
}

fn require_applied(
    outcome: StampedWrite,
    kind: &'static str,
    key: RecordId,
) -> Result<(), SaveError> {
    match outcome {
        StampedWrite::Applied => Ok(()),
        StampedWrite::StaleVersion { .. } => Err(SaveError::Conflict { kind, key }),
        StampedWrite::Missing => Err(SaveError::ReferenceNotFound { kind, key }),
    }
}

fn resolve_ref(
    reference: EntityRef,
    key_map: &BTreeMap<i64, RecordId>,
    kind: &'static str,
) -> Result<RecordId, SaveError> {
    reference
        .resolve(key_map)
        .map_err(|unresolved| SaveError::ReferenceNotFound {
            kind,
            key: unresolved.tag,
        })
}

fn resolve_refs(
    references: &[EntityRef],
    key_map: &BTreeMap<i64, RecordId>,
    kind: &'static str,
) -> Result<Vec<RecordId>, SaveError> {
    references
        .iter()
        .map(|reference| resolve_ref(*reference, key_map, kind))
        .collect()
}

fn index_by_key<T>(items: &[T], key_of: impl Fn(&T) -> EntityRef) -> BTreeMap<EntityRef, &T> {
    items.iter().map(|item| (key_of(item), item)).collect()
}

/// Escalates an unset intent to `Update` when the submission's group
/// attachment differs from the snapshot, so callers that only flip the group
/// pointer still get the membership mirrored.
fn effective_sense_intent(
    sense: &Sense,
    snapshot_senses: &BTreeMap<EntityRef, &Sense>,
) -> ChangeIntent {
    if sense.intent != ChangeIntent::NoChange {
        return sense.intent;
    }
    let Some(previous) = snapshot_senses.get(&sense.id) else {
        return ChangeIntent::NoChange;
    };
    let previous_group = previous.group.as_ref().map(|group| group.group_ref);
    let current_group = sense.group.as_ref().map(|group| group.group_ref);
    if previous_group != current_group {
        ChangeIntent::Update
    } else {
        ChangeIntent::NoChange
    }
}

fn known_key<T>(
    reference: EntityRef,
    snapshot: &BTreeMap<EntityRef, &T>,
    kind: &'static str,
) -> Result<RecordId, SaveError> {
    let key = reference
        .as_persisted()
        .ok_or(SaveError::ReferenceNotFound {
            kind,
            key: reference.raw(),
        })?;
    if !snapshot.contains_key(&reference) {
        return Err(SaveError::ReferenceNotFound { kind, key });
    }
    Ok(key)
}
