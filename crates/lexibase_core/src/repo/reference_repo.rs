//! Table bindings for reference records and the template repository.
//!
//! # Responsibility
//! - Map each reference record to its backing table for the generic
//!   repository.
//! - Implement the template repository, whose dialect scope lives in a
//!   separate join table.
//!
//! # Invariants
//! - List order is stable (code or id order) so cached views are
//!   deterministic.
//! - Template dialect sets are loaded and replaced together with their row.

use crate::model::keys::RecordId;
use crate::model::reference::{
    Category, Dialect, FormType, Language, LanguagePair, LinkTargetKind, LinkType, Orthography,
    Template,
};
use crate::repo::{
    ensure_column, ensure_table, Repository, RowError, StoreError, StoreOp, StoreResult,
    TableRecord,
};
use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};
use std::collections::{BTreeMap, BTreeSet};

impl TableRecord for Language {
    const TABLE: &'static str = "languages";
    const KIND: &'static str = "language";
    const COLUMNS: &'static [&'static str] = &["code", "name"];
    const ORDER_BY: &'static str = "code ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            name: row.get("name")?,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.code.clone()),
            Value::Text(self.name.clone()),
        ]
    }
}

impl TableRecord for Category {
    const TABLE: &'static str = "categories";
    const KIND: &'static str = "category";
    const COLUMNS: &'static [&'static str] = &["code", "name"];
    const ORDER_BY: &'static str = "code ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            name: row.get("name")?,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.code.clone()),
            Value::Text(self.name.clone()),
        ]
    }
}

impl TableRecord for Orthography {
    const TABLE: &'static str = "orthographies";
    const KIND: &'static str = "orthography";
    const COLUMNS: &'static [&'static str] = &["code", "name"];
    const ORDER_BY: &'static str = "code ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            name: row.get("name")?,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.code.clone()),
            Value::Text(self.name.clone()),
        ]
    }
}

impl TableRecord for Dialect {
    const TABLE: &'static str = "dialects";
    const KIND: &'static str = "dialect";
    const COLUMNS: &'static [&'static str] = &["language_id", "code", "name"];
    const ORDER_BY: &'static str = "language_id ASC, code ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        Ok(Self {
            id: row.get("id")?,
            language_id: row.get("language_id")?,
            code: row.get("code")?,
            name: row.get("name")?,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.language_id),
            Value::Text(self.code.clone()),
            Value::Text(self.name.clone()),
        ]
    }
}

impl TableRecord for FormType {
    const TABLE: &'static str = "form_types";
    const KIND: &'static str = "form_type";
    const COLUMNS: &'static [&'static str] = &["short_name", "name"];
    const ORDER_BY: &'static str = "short_name ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        Ok(Self {
            id: row.get("id")?,
            short_name: row.get("short_name")?,
            name: row.get("name")?,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.short_name.clone()),
            Value::Text(self.name.clone()),
        ]
    }
}

impl TableRecord for LinkType {
    const TABLE: &'static str = "link_types";
    const KIND: &'static str = "link_type";
    const COLUMNS: &'static [&'static str] = &["code", "name", "target_kind"];
    const ORDER_BY: &'static str = "code ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        let target_text: String = row.get("target_kind")?;
        let target_kind = LinkTargetKind::parse_db(&target_text).ok_or_else(|| {
            RowError::Invalid(format!(
                "invalid target kind `{target_text}` in link_types.target_kind"
            ))
        })?;
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            name: row.get("name")?,
            target_kind,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.code.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.target_kind.as_db().to_string()),
        ]
    }
}

impl TableRecord for LanguagePair {
    const TABLE: &'static str = "language_pairs";
    const KIND: &'static str = "language_pair";
    const COLUMNS: &'static [&'static str] = &["language_a_id", "language_b_id"];
    const ORDER_BY: &'static str = "language_a_id ASC, language_b_id ASC, id ASC";

    fn from_row(row: &Row<'_>) -> Result<Self, RowError> {
        Ok(Self {
            id: row.get("id")?,
            language_a_id: row.get("language_a_id")?,
            language_b_id: row.get("language_b_id")?,
        })
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.language_a_id),
            Value::Integer(self.language_b_id),
        ]
    }
}

const TEMPLATE_SELECT_SQL: &str = "SELECT
    id,
    name,
    category_id,
    language_id,
    orthography_id,
    pre_text,
    main_text,
    post_text,
    also_text
FROM templates";

/// SQLite repository for templates and their dialect scope rows.
pub struct TemplateRepository;

impl TemplateRepository {
    pub fn new() -> Self {
        Self
    }

    /// Creates the repository after verifying both backing tables exist.
    pub fn try_new(conn: &Connection) -> StoreResult<Self> {
        ensure_table(conn, "templates")?;
        ensure_table(conn, "template_dialects")?;
        for column in ["template_id", "dialect_id"] {
            ensure_column(conn, "template_dialects", column)?;
        }
        Ok(Self)
    }

    fn load_dialect_sets(
        conn: &Connection,
        op: StoreOp,
    ) -> StoreResult<BTreeMap<RecordId, BTreeSet<RecordId>>> {
        let mut stmt = conn
            .prepare(
                "SELECT template_id, dialect_id
                 FROM template_dialects
                 ORDER BY template_id ASC, dialect_id ASC;",
            )
            .map_err(|err| StoreError::backend(op, "template", err))?;
        let mut rows = stmt
            .query([])
            .map_err(|err| StoreError::backend(op, "template", err))?;

        let mut sets: BTreeMap<RecordId, BTreeSet<RecordId>> = BTreeMap::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(op, "template", err))?
        {
            let template_id: RecordId = row
                .get(0)
                .map_err(|err| StoreError::backend(op, "template", err))?;
            let dialect_id: RecordId = row
                .get(1)
                .map_err(|err| StoreError::backend(op, "template", err))?;
            sets.entry(template_id).or_default().insert(dialect_id);
        }
        Ok(sets)
    }

    fn replace_dialect_set(
        conn: &Connection,
        template_id: RecordId,
        dialect_ids: &BTreeSet<RecordId>,
        op: StoreOp,
    ) -> StoreResult<()> {
        conn.execute(
            "DELETE FROM template_dialects WHERE template_id = ?1;",
            [template_id],
        )
        .map_err(|err| StoreError::backend(op, "template", err))?;
        for dialect_id in dialect_ids {
            conn.execute(
                "INSERT INTO template_dialects (template_id, dialect_id) VALUES (?1, ?2);",
                params![template_id, dialect_id],
            )
            .map_err(|err| StoreError::backend(op, "template", err))?;
        }
        Ok(())
    }

    fn parse_row(row: &Row<'_>) -> Result<Template, RowError> {
        Ok(Template {
            id: row.get("id")?,
            name: row.get("name")?,
            category_id: row.get("category_id")?,
            language_id: row.get("language_id")?,
            dialect_ids: BTreeSet::new(),
            orthography_id: row.get("orthography_id")?,
            pre_text: row.get("pre_text")?,
            main_text: row.get("main_text")?,
            post_text: row.get("post_text")?,
            also_text: row.get("also_text")?,
        })
    }

    fn bind_row(record: &Template) -> [Value; 8] {
        [
            match &record.name {
                Some(name) => Value::Text(name.clone()),
                None => Value::Null,
            },
            Value::Integer(record.category_id),
            opt_integer(record.language_id),
            opt_integer(record.orthography_id),
            opt_text(record.pre_text.as_deref()),
            opt_text(record.main_text.as_deref()),
            opt_text(record.post_text.as_deref()),
            opt_text(record.also_text.as_deref()),
        ]
    }
}

impl Default for TemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository<Template> for TemplateRepository {
    fn kind(&self) -> &'static str {
        "template"
    }

    fn list(&self, conn: &Connection) -> StoreResult<Vec<Template>> {
        let mut stmt = conn
            .prepare(&format!("{TEMPLATE_SELECT_SQL} ORDER BY id ASC;"))
            .map_err(|err| StoreError::backend(StoreOp::List, "template", err))?;
        let mut rows = stmt
            .query([])
            .map_err(|err| StoreError::backend(StoreOp::List, "template", err))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::List, "template", err))?
        {
            records.push(
                Self::parse_row(row).map_err(|err| err.into_store(StoreOp::List, "template"))?,
            );
        }

        let mut dialect_sets = Self::load_dialect_sets(conn, StoreOp::List)?;
        for record in &mut records {
            if let Some(set) = dialect_sets.remove(&record.id) {
                record.dialect_ids = set;
            }
        }
        Ok(records)
    }

    fn get(&self, conn: &Connection, key: RecordId) -> StoreResult<Option<Template>> {
        let mut stmt = conn
            .prepare(&format!("{TEMPLATE_SELECT_SQL} WHERE id = ?1;"))
            .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?;
        let mut rows = stmt
            .query([key])
            .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?;

        let mut record = match rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?
        {
            Some(row) => {
                Self::parse_row(row).map_err(|err| err.into_store(StoreOp::Get, "template"))?
            }
            None => return Ok(None),
        };

        let mut stmt = conn
            .prepare(
                "SELECT dialect_id
                 FROM template_dialects
                 WHERE template_id = ?1
                 ORDER BY dialect_id ASC;",
            )
            .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?;
        let mut rows = stmt
            .query([key])
            .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?;
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?
        {
            let dialect_id: RecordId = row
                .get(0)
                .map_err(|err| StoreError::backend(StoreOp::Get, "template", err))?;
            record.dialect_ids.insert(dialect_id);
        }
        Ok(Some(record))
    }

    fn create(&self, conn: &Connection, record: &Template) -> StoreResult<RecordId> {
        conn.execute(
            "INSERT INTO templates (
                name,
                category_id,
                language_id,
                orthography_id,
                pre_text,
                main_text,
                post_text,
                also_text
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            rusqlite::params_from_iter(Self::bind_row(record)),
        )
        .map_err(|err| StoreError::backend(StoreOp::Create, "template", err))?;

        let template_id = conn.last_insert_rowid();
        Self::replace_dialect_set(conn, template_id, &record.dialect_ids, StoreOp::Create)?;
        Ok(template_id)
    }

    fn update(&self, conn: &Connection, key: RecordId, record: &Template) -> StoreResult<()> {
        let mut values: Vec<Value> = Self::bind_row(record).into_iter().collect();
        values.push(Value::Integer(key));
        let changed = conn
            .execute(
                "UPDATE templates
                 SET
                    name = ?1,
                    category_id = ?2,
                    language_id = ?3,
                    orthography_id = ?4,
                    pre_text = ?5,
                    main_text = ?6,
                    post_text = ?7,
                    also_text = ?8
                 WHERE id = ?9;",
                rusqlite::params_from_iter(values),
            )
            .map_err(|err| StoreError::backend(StoreOp::Update, "template", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "template",
                key,
            });
        }
        Self::replace_dialect_set(conn, key, &record.dialect_ids, StoreOp::Update)
    }

    fn delete(&self, conn: &Connection, key: RecordId, _record: &Template) -> StoreResult<()> {
        let changed = conn
            .execute("DELETE FROM templates WHERE id = ?1;", [key])
            .map_err(|err| StoreError::backend(StoreOp::Delete, "template", err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                kind: "template",
                key,
            });
        }
        Ok(())
    }
}

fn opt_integer(value: Option<RecordId>) -> Value {
    match value {
        Some(id) => Value::Integer(id),
        None => Value::Null,
    }
}

fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(text) => Value::Text(text.to_string()),
        None => Value::Null,
    }
}
