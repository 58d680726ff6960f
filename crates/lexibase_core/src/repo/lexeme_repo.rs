//! Lexeme aggregate row store.
//!
//! # Responsibility
//! - Provide row-level persistence for the lexeme aggregate tables,
//!   returning generated keys for every insert.
//! - Load a persisted aggregate back as one snapshot graph.
//!
//! # Invariants
//! - Version-stamped writes never silently overwrite a concurrent change;
//!   the caller learns whether the row was stale or missing.
//! - Child collections (forms, dialects, sense variants, tags) are replaced
//!   wholesale, never diffed row by row.
//! - Child listing is deterministic: position order with id tiebreak.

use crate::db::migrations::latest_version;
use crate::model::keys::{EntityRef, RecordId};
use crate::model::lexeme::{
    ChangeIntent, Form, GroupAttachment, Lexeme, Link, Mapping, RenderedLabel, Sense, Variant,
};
use crate::model::reference::LinkTargetKind;
use crate::repo::{ensure_schema_version, ensure_table, StoreError, StoreOp, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Result of a version-stamped single-row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampedWrite {
    Applied,
    /// Row exists but carries a different version stamp.
    StaleVersion { actual: i64 },
    /// Row does not exist (or is tombstoned).
    Missing,
}

/// Ownership context of one persisted sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseOwner {
    pub sense_id: RecordId,
    pub lexeme_id: RecordId,
    pub language_id: RecordId,
    pub group_id: Option<RecordId>,
    pub row_version: i64,
}

/// SQLite-backed row store for the lexeme aggregate.
pub struct SqliteLexemeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLexemeRepository<'conn> {
    /// Creates the repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_schema_version(conn, latest_version())?;
        for table in [
            "lexemes",
            "tags",
            "lexeme_tags",
            "variants",
            "variant_dialects",
            "forms",
            "senses",
            "sense_variants",
            "synonym_groups",
            "synonym_group_members",
            "mappings",
            "links",
        ] {
            ensure_table(conn, table)?;
        }
        Ok(Self { conn })
    }

    // --- lexeme root ---

    pub fn insert_lexeme(&self, unit: &Lexeme, actor: &str) -> StoreResult<RecordId> {
        self.conn
            .execute(
                "INSERT INTO lexemes (
                    category_id,
                    language_id,
                    correlation_id,
                    is_active,
                    created_by,
                    updated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
                params![
                    unit.category_id,
                    unit.language_id,
                    unit.correlation_id.map(|id| id.to_string()),
                    unit.is_active as i64,
                    actor,
                ],
            )
            .map_err(|err| StoreError::backend(StoreOp::Create, "lexeme", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Stamped root update: activity flag, correlation backfill, audit columns.
    pub fn update_lexeme(
        &self,
        id: RecordId,
        unit: &Lexeme,
        actor: &str,
        expected_version: i64,
    ) -> StoreResult<StampedWrite> {
        let changed = self
            .conn
            .execute(
                "UPDATE lexemes
                 SET
                    correlation_id = ?3,
                    is_active = ?4,
                    updated_by = ?5,
                    updated_at = (strftime('%s', 'now') * 1000),
                    row_version = row_version + 1
                 WHERE id = ?1
                   AND row_version = ?2
                   AND is_deleted = 0;",
                params![
                    id,
                    expected_version,
                    unit.correlation_id.map(|value| value.to_string()),
                    unit.is_active as i64,
                    actor,
                ],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "lexeme", err))?;
        if changed == 1 {
            return Ok(StampedWrite::Applied);
        }
        self.stamp_outcome("lexemes", id, StoreOp::Update, "lexeme")
    }

    pub fn soft_delete_lexeme(&self, id: RecordId, actor: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE lexemes
                 SET
                    is_deleted = 1,
                    updated_by = ?2,
                    updated_at = (strftime('%s', 'now') * 1000),
                    row_version = row_version + 1
                 WHERE id = ?1
                   AND is_deleted = 0;",
                params![id, actor],
            )
            .map_err(|err| StoreError::backend(StoreOp::Delete, "lexeme", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "lexeme",
                key: id,
            });
        }
        Ok(())
    }

    pub fn lexeme_exists(&self, id: RecordId) -> StoreResult<bool> {
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM lexemes
                    WHERE id = ?1
                      AND is_deleted = 0
                );",
                [id],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "lexeme", err))?;
        Ok(exists == 1)
    }

    /// Replaces the whole tag set of one lexeme.
    pub fn replace_tags(&self, lexeme_id: RecordId, tags: &BTreeSet<String>) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM lexeme_tags WHERE lexeme_id = ?1;", [lexeme_id])
            .map_err(|err| StoreError::backend(StoreOp::Update, "lexeme_tag", err))?;
        for tag in tags {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO tags (name) VALUES (?1);",
                    [tag.as_str()],
                )
                .map_err(|err| StoreError::backend(StoreOp::Update, "lexeme_tag", err))?;
            self.conn
                .execute(
                    "INSERT INTO lexeme_tags (lexeme_id, tag_id)
                     SELECT ?1, id
                     FROM tags
                     WHERE name = ?2;",
                    params![lexeme_id, tag.as_str()],
                )
                .map_err(|err| StoreError::backend(StoreOp::Update, "lexeme_tag", err))?;
        }
        Ok(())
    }

    // --- variants ---

    pub fn insert_variant(&self, lexeme_id: RecordId, variant: &Variant) -> StoreResult<RecordId> {
        self.conn
            .execute(
                "INSERT INTO variants (
                    lexeme_id,
                    orthography_id,
                    is_main,
                    auto_label,
                    template_id,
                    label_pre,
                    label_main,
                    label_post,
                    label_also
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    lexeme_id,
                    variant.orthography_id,
                    variant.is_main as i64,
                    variant.auto_label as i64,
                    variant.template_id,
                    variant.label.pre,
                    variant.label.main,
                    variant.label.post,
                    variant.label.also,
                ],
            )
            .map_err(|err| StoreError::backend(StoreOp::Create, "variant", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_variant(&self, id: RecordId, variant: &Variant) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE variants
                 SET
                    orthography_id = ?2,
                    is_main = ?3,
                    auto_label = ?4,
                    template_id = ?5
                 WHERE id = ?1;",
                params![
                    id,
                    variant.orthography_id,
                    variant.is_main as i64,
                    variant.auto_label as i64,
                    variant.template_id,
                ],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "variant", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "variant",
                key: id,
            });
        }
        Ok(())
    }

    pub fn update_variant_label(&self, id: RecordId, label: &RenderedLabel) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE variants
                 SET
                    label_pre = ?2,
                    label_main = ?3,
                    label_post = ?4,
                    label_also = ?5
                 WHERE id = ?1;",
                params![id, label.pre, label.main, label.post, label.also],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "variant", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "variant",
                key: id,
            });
        }
        Ok(())
    }

    pub fn delete_variant(&self, id: RecordId) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM variants WHERE id = ?1;", [id])
            .map_err(|err| StoreError::backend(StoreOp::Delete, "variant", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "variant",
                key: id,
            });
        }
        Ok(())
    }

    pub fn replace_variant_dialects(
        &self,
        variant_id: RecordId,
        dialect_ids: &BTreeSet<RecordId>,
    ) -> StoreResult<()> {
        self.conn
            .execute(
                "DELETE FROM variant_dialects WHERE variant_id = ?1;",
                [variant_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "variant", err))?;
        for dialect_id in dialect_ids {
            self.conn
                .execute(
                    "INSERT INTO variant_dialects (variant_id, dialect_id) VALUES (?1, ?2);",
                    params![variant_id, dialect_id],
                )
                .map_err(|err| StoreError::backend(StoreOp::Update, "variant", err))?;
        }
        Ok(())
    }

    /// Replaces a variant's forms wholesale, preserving submission order.
    pub fn replace_forms(&self, variant_id: RecordId, forms: &[Form]) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM forms WHERE variant_id = ?1;", [variant_id])
            .map_err(|err| StoreError::backend(StoreOp::Update, "form", err))?;
        for (position, form) in forms.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO forms (variant_id, form_type_id, position, text)
                     VALUES (?1, ?2, ?3, ?4);",
                    params![variant_id, form.form_type_id, position as i64, form.text],
                )
                .map_err(|err| StoreError::backend(StoreOp::Create, "form", err))?;
        }
        Ok(())
    }

    // --- senses ---

    pub fn insert_sense(&self, lexeme_id: RecordId, position: i64) -> StoreResult<RecordId> {
        self.conn
            .execute(
                "INSERT INTO senses (lexeme_id, position) VALUES (?1, ?2);",
                params![lexeme_id, position],
            )
            .map_err(|err| StoreError::backend(StoreOp::Create, "sense", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_sense(
        &self,
        id: RecordId,
        position: i64,
        expected_version: i64,
    ) -> StoreResult<StampedWrite> {
        let changed = self
            .conn
            .execute(
                "UPDATE senses
                 SET position = ?3, row_version = row_version + 1
                 WHERE id = ?1
                   AND row_version = ?2;",
                params![id, expected_version, position],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "sense", err))?;
        if changed == 1 {
            return Ok(StampedWrite::Applied);
        }
        self.stamp_outcome("senses", id, StoreOp::Update, "sense")
    }

    pub fn delete_sense(&self, id: RecordId, expected_version: i64) -> StoreResult<StampedWrite> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM senses WHERE id = ?1 AND row_version = ?2;",
                params![id, expected_version],
            )
            .map_err(|err| StoreError::backend(StoreOp::Delete, "sense", err))?;
        if changed == 1 {
            return Ok(StampedWrite::Applied);
        }
        self.stamp_outcome("senses", id, StoreOp::Delete, "sense")
    }

    pub fn replace_sense_variants(
        &self,
        sense_id: RecordId,
        variant_ids: &[RecordId],
    ) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM sense_variants WHERE sense_id = ?1;", [sense_id])
            .map_err(|err| StoreError::backend(StoreOp::Update, "sense", err))?;
        for variant_id in variant_ids {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO sense_variants (sense_id, variant_id) VALUES (?1, ?2);",
                    params![sense_id, variant_id],
                )
                .map_err(|err| StoreError::backend(StoreOp::Update, "sense", err))?;
        }
        Ok(())
    }

    /// Unstamped group-pointer write for senses owned by the current save.
    pub fn set_sense_group(
        &self,
        sense_id: RecordId,
        group_id: Option<RecordId>,
    ) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE senses SET group_id = ?2 WHERE id = ?1;",
                params![sense_id, group_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "sense", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "sense",
                key: sense_id,
            });
        }
        Ok(())
    }

    /// Stamped group-pointer write for a sense owned by another aggregate.
    pub fn set_sense_group_stamped(
        &self,
        sense_id: RecordId,
        group_id: Option<RecordId>,
        expected_version: i64,
    ) -> StoreResult<StampedWrite> {
        let changed = self
            .conn
            .execute(
                "UPDATE senses
                 SET group_id = ?3, row_version = row_version + 1
                 WHERE id = ?1
                   AND row_version = ?2;",
                params![sense_id, expected_version, group_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "sense", err))?;
        if changed == 1 {
            return Ok(StampedWrite::Applied);
        }
        self.stamp_outcome("senses", sense_id, StoreOp::Update, "sense")
    }

    pub fn sense_owner(&self, sense_id: RecordId) -> StoreResult<Option<SenseOwner>> {
        self.conn
            .query_row(
                "SELECT s.id, s.lexeme_id, l.language_id, s.group_id, s.row_version
                 FROM senses s
                 INNER JOIN lexemes l ON l.id = s.lexeme_id
                 WHERE s.id = ?1
                   AND l.is_deleted = 0;",
                [sense_id],
                |row| {
                    Ok(SenseOwner {
                        sense_id: row.get(0)?,
                        lexeme_id: row.get(1)?,
                        language_id: row.get(2)?,
                        group_id: row.get(3)?,
                        row_version: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))
    }

    // --- synonym groups ---

    pub fn insert_group(&self) -> StoreResult<RecordId> {
        self.conn
            .execute("INSERT INTO synonym_groups DEFAULT VALUES;", [])
            .map_err(|err| StoreError::backend(StoreOp::Create, "synonym_group", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn group_exists(&self, group_id: RecordId) -> StoreResult<bool> {
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM synonym_groups WHERE id = ?1);",
                [group_id],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "synonym_group", err))?;
        Ok(exists == 1)
    }

    pub fn insert_group_member(&self, group_id: RecordId, sense_id: RecordId) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO synonym_group_members (group_id, sense_id) VALUES (?1, ?2);",
                params![group_id, sense_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Create, "synonym_group", err))?;
        Ok(())
    }

    pub fn remove_group_member(&self, group_id: RecordId, sense_id: RecordId) -> StoreResult<()> {
        self.conn
            .execute(
                "DELETE FROM synonym_group_members WHERE group_id = ?1 AND sense_id = ?2;",
                params![group_id, sense_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Delete, "synonym_group", err))?;
        Ok(())
    }

    pub fn group_member_ids(&self, group_id: RecordId) -> StoreResult<Vec<RecordId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT sense_id
                 FROM synonym_group_members
                 WHERE group_id = ?1
                 ORDER BY sense_id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::List, "synonym_group", err))?;
        let mut rows = stmt
            .query([group_id])
            .map_err(|err| StoreError::backend(StoreOp::List, "synonym_group", err))?;
        let mut members = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::List, "synonym_group", err))?
        {
            members.push(
                row.get(0)
                    .map_err(|err| StoreError::backend(StoreOp::List, "synonym_group", err))?,
            );
        }
        Ok(members)
    }

    // --- mappings and links ---

    pub fn insert_mapping(
        &self,
        sense_id: RecordId,
        target_sense_id: RecordId,
    ) -> StoreResult<RecordId> {
        self.conn
            .execute(
                "INSERT INTO mappings (sense_id, target_sense_id) VALUES (?1, ?2);",
                params![sense_id, target_sense_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Create, "mapping", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_mapping(
        &self,
        id: RecordId,
        sense_id: RecordId,
        target_sense_id: RecordId,
    ) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE mappings SET sense_id = ?2, target_sense_id = ?3 WHERE id = ?1;",
                params![id, sense_id, target_sense_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "mapping", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "mapping",
                key: id,
            });
        }
        Ok(())
    }

    pub fn delete_mapping(&self, id: RecordId) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM mappings WHERE id = ?1;", [id])
            .map_err(|err| StoreError::backend(StoreOp::Delete, "mapping", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "mapping",
                key: id,
            });
        }
        Ok(())
    }

    pub fn insert_link(
        &self,
        link_type_id: RecordId,
        sense_id: RecordId,
        target_kind: LinkTargetKind,
        target_id: RecordId,
    ) -> StoreResult<RecordId> {
        self.conn
            .execute(
                "INSERT INTO links (link_type_id, sense_id, target_kind, target_id)
                 VALUES (?1, ?2, ?3, ?4);",
                params![link_type_id, sense_id, target_kind.as_db(), target_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Create, "link", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_link(
        &self,
        id: RecordId,
        link_type_id: RecordId,
        sense_id: RecordId,
        target_kind: LinkTargetKind,
        target_id: RecordId,
    ) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE links
                 SET link_type_id = ?2, sense_id = ?3, target_kind = ?4, target_id = ?5
                 WHERE id = ?1;",
                params![id, link_type_id, sense_id, target_kind.as_db(), target_id],
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "link", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound { kind: "link", key: id });
        }
        Ok(())
    }

    pub fn delete_link(&self, id: RecordId) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM links WHERE id = ?1;", [id])
            .map_err(|err| StoreError::backend(StoreOp::Delete, "link", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound { kind: "link", key: id });
        }
        Ok(())
    }

    // --- snapshot loading ---

    /// Loads one persisted aggregate as a full snapshot graph.
    pub fn load_lexeme(
        &self,
        id: RecordId,
        include_deleted: bool,
    ) -> StoreResult<Option<Lexeme>> {
        let root = self
            .conn
            .query_row(
                "SELECT id, category_id, language_id, correlation_id, is_active, row_version
                 FROM lexemes
                 WHERE id = ?1
                   AND (?2 = 1 OR is_deleted = 0);",
                params![id, include_deleted as i64],
                parse_lexeme_root,
            )
            .optional()
            .map_err(|err| StoreError::backend(StoreOp::Get, "lexeme", err))?;

        let mut unit = match root {
            Some(Ok(unit)) => unit,
            Some(Err(message)) => {
                return Err(StoreError::InvalidRow {
                    kind: "lexeme",
                    message,
                })
            }
            None => return Ok(None),
        };

        unit.tags = self.load_tags(id)?;
        unit.variants = self.load_variants(id)?;
        unit.senses = self.load_senses(id)?;
        unit.mappings = self.load_mappings(id)?;
        unit.links = self.load_links(id)?;
        Ok(Some(unit))
    }

    fn load_tags(&self, lexeme_id: RecordId) -> StoreResult<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.name
                 FROM lexeme_tags lt
                 INNER JOIN tags t ON t.id = lt.tag_id
                 WHERE lt.lexeme_id = ?1
                 ORDER BY t.name ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "lexeme_tag", err))?;
        let mut rows = stmt
            .query([lexeme_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "lexeme_tag", err))?;
        let mut tags = BTreeSet::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "lexeme_tag", err))?
        {
            let name: String = row
                .get(0)
                .map_err(|err| StoreError::backend(StoreOp::Get, "lexeme_tag", err))?;
            tags.insert(name);
        }
        Ok(tags)
    }

    fn load_variants(&self, lexeme_id: RecordId) -> StoreResult<Vec<Variant>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT
                    id,
                    orthography_id,
                    is_main,
                    auto_label,
                    template_id,
                    label_pre,
                    label_main,
                    label_post,
                    label_also
                 FROM variants
                 WHERE lexeme_id = ?1
                 ORDER BY id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?;
        let mut rows = stmt
            .query([lexeme_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?;

        let mut variants = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?
        {
            variants.push(
                parse_variant_row(row)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?,
            );
        }

        for variant in &mut variants {
            let variant_id = match variant.id.as_persisted() {
                Some(id) => id,
                // Loader only produces persisted refs.
                None => continue,
            };
            variant.dialect_ids = self.load_variant_dialects(variant_id)?;
            variant.forms = self.load_forms(variant_id)?;
        }
        Ok(variants)
    }

    fn load_variant_dialects(&self, variant_id: RecordId) -> StoreResult<BTreeSet<RecordId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT dialect_id
                 FROM variant_dialects
                 WHERE variant_id = ?1
                 ORDER BY dialect_id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?;
        let mut rows = stmt
            .query([variant_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?;
        let mut dialects = BTreeSet::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?
        {
            dialects.insert(
                row.get(0)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "variant", err))?,
            );
        }
        Ok(dialects)
    }

    fn load_forms(&self, variant_id: RecordId) -> StoreResult<Vec<Form>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT form_type_id, text
                 FROM forms
                 WHERE variant_id = ?1
                 ORDER BY position ASC, id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "form", err))?;
        let mut rows = stmt
            .query([variant_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "form", err))?;
        let mut forms = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "form", err))?
        {
            forms.push(Form {
                form_type_id: row
                    .get(0)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "form", err))?,
                text: row
                    .get(1)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "form", err))?,
            });
        }
        Ok(forms)
    }

    fn load_senses(&self, lexeme_id: RecordId) -> StoreResult<Vec<Sense>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, group_id, row_version
                 FROM senses
                 WHERE lexeme_id = ?1
                 ORDER BY position ASC, id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;
        let mut rows = stmt
            .query([lexeme_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;

        let mut senses = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?
        {
            let sense_id: RecordId = row
                .get(0)
                .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;
            let group_id: Option<RecordId> = row
                .get(1)
                .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;
            let row_version: i64 = row
                .get(2)
                .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;
            senses.push(Sense {
                id: EntityRef::Persisted(sense_id),
                variant_refs: Vec::new(),
                group: group_id.map(|group_id| GroupAttachment {
                    group_ref: EntityRef::Persisted(group_id),
                    member_refs: Vec::new(),
                }),
                row_version,
                intent: ChangeIntent::NoChange,
            });
        }

        for sense in &mut senses {
            let sense_id = match sense.id.as_persisted() {
                Some(id) => id,
                None => continue,
            };
            sense.variant_refs = self
                .load_sense_variants(sense_id)?
                .into_iter()
                .map(EntityRef::Persisted)
                .collect();
            if let Some(group) = &mut sense.group {
                if let Some(group_id) = group.group_ref.as_persisted() {
                    group.member_refs = self
                        .group_member_ids(group_id)?
                        .into_iter()
                        .map(EntityRef::Persisted)
                        .collect();
                }
            }
        }
        Ok(senses)
    }

    fn load_sense_variants(&self, sense_id: RecordId) -> StoreResult<Vec<RecordId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT variant_id
                 FROM sense_variants
                 WHERE sense_id = ?1
                 ORDER BY variant_id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;
        let mut rows = stmt
            .query([sense_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?
        {
            ids.push(
                row.get(0)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "sense", err))?,
            );
        }
        Ok(ids)
    }

    fn load_mappings(&self, lexeme_id: RecordId) -> StoreResult<Vec<Mapping>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.sense_id, m.target_sense_id
                 FROM mappings m
                 INNER JOIN senses s ON s.id = m.sense_id
                 WHERE s.lexeme_id = ?1
                 ORDER BY m.id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "mapping", err))?;
        let mut rows = stmt
            .query([lexeme_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "mapping", err))?;
        let mut mappings = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "mapping", err))?
        {
            mappings.push(Mapping {
                id: EntityRef::Persisted(
                    row.get(0)
                        .map_err(|err| StoreError::backend(StoreOp::Get, "mapping", err))?,
                ),
                sense_ref: EntityRef::Persisted(
                    row.get(1)
                        .map_err(|err| StoreError::backend(StoreOp::Get, "mapping", err))?,
                ),
                target_sense_id: row
                    .get(2)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "mapping", err))?,
                intent: ChangeIntent::NoChange,
            });
        }
        Ok(mappings)
    }

    fn load_links(&self, lexeme_id: RecordId) -> StoreResult<Vec<Link>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT k.id, k.link_type_id, k.sense_id, k.target_kind, k.target_id
                 FROM links k
                 INNER JOIN senses s ON s.id = k.sense_id
                 WHERE s.lexeme_id = ?1
                 ORDER BY k.id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?;
        let mut rows = stmt
            .query([lexeme_id])
            .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?;
        let mut links = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?
        {
            let kind_text: String = row
                .get(3)
                .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?;
            let target_kind = LinkTargetKind::parse_db(&kind_text).ok_or_else(|| {
                StoreError::InvalidRow {
                    kind: "link",
                    message: format!("invalid target kind `{kind_text}` in links.target_kind"),
                }
            })?;
            links.push(Link {
                id: EntityRef::Persisted(
                    row.get(0)
                        .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?,
                ),
                link_type_id: row
                    .get(1)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?,
                sense_ref: EntityRef::Persisted(
                    row.get(2)
                        .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?,
                ),
                target_kind,
                target_id: row
                    .get(4)
                    .map_err(|err| StoreError::backend(StoreOp::Get, "link", err))?,
                intent: ChangeIntent::NoChange,
            });
        }
        Ok(links)
    }

    fn stamp_outcome(
        &self,
        table: &str,
        id: RecordId,
        op: StoreOp,
        kind: &'static str,
    ) -> StoreResult<StampedWrite> {
        let actual: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT row_version FROM {table} WHERE id = ?1;"),
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::backend(op, kind, err))?;
        match actual {
            Some(actual) => Ok(StampedWrite::StaleVersion { actual }),
            None => Ok(StampedWrite::Missing),
        }
    }
}

fn parse_lexeme_root(row: &Row<'_>) -> rusqlite::Result<Result<Lexeme, String>> {
    let correlation_text: Option<String> = row.get(3)?;
    let correlation_id = match correlation_text {
        Some(text) => match Uuid::parse_str(&text) {
            Ok(value) => Some(value),
            Err(_) => {
                return Ok(Err(format!(
                    "invalid uuid value `{text}` in lexemes.correlation_id"
                )))
            }
        },
        None => None,
    };
    let is_active: i64 = row.get(4)?;
    Ok(Ok(Lexeme {
        id: Some(row.get(0)?),
        category_id: row.get(1)?,
        language_id: row.get(2)?,
        correlation_id,
        is_active: is_active != 0,
        tags: BTreeSet::new(),
        row_version: row.get(5)?,
        variants: Vec::new(),
        senses: Vec::new(),
        mappings: Vec::new(),
        links: Vec::new(),
    }))
}

fn parse_variant_row(row: &Row<'_>) -> rusqlite::Result<Variant> {
    let is_main: i64 = row.get(2)?;
    let auto_label: i64 = row.get(3)?;
    Ok(Variant {
        id: EntityRef::Persisted(row.get(0)?),
        orthography_id: row.get(1)?,
        dialect_ids: BTreeSet::new(),
        forms: Vec::new(),
        label: RenderedLabel {
            pre: row.get(5)?,
            main: row.get(6)?,
            post: row.get(7)?,
            also: row.get(8)?,
        },
        auto_label: auto_label != 0,
        template_id: row.get(4)?,
        is_main: is_main != 0,
        intent: ChangeIntent::NoChange,
    })
}
