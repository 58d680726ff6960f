//! Generic repository contract and the table-driven SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow read/write interface caches decorate.
//! - Drive single-table persistence from per-record column metadata so each
//!   reference table does not repeat the same SQL.
//!
//! # Invariants
//! - `create` returns the generated storage key and never reuses caller keys.
//! - `update`/`delete` report `RowNotFound` when no row was affected.
//! - List order is the record's declared `ORDER_BY`, stable across calls.

use crate::model::keys::{Keyed, RecordId};
use crate::repo::{
    ensure_column, ensure_table, RowError, StoreError, StoreOp, StoreResult,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::marker::PhantomData;

/// Narrow persistence contract shared by caches and the orchestrator.
///
/// Implementations operate inside whatever unit of work the caller supplies:
/// a transaction handle dereferences to a `Connection`, so the same calls
/// work inside and outside an explicit transaction.
pub trait Repository<V: Keyed> {
    /// Entity kind used in error and log context.
    fn kind(&self) -> &'static str;
    fn list(&self, conn: &Connection) -> StoreResult<Vec<V>>;
    fn get(&self, conn: &Connection, key: V::Key) -> StoreResult<Option<V>>;
    fn create(&self, conn: &Connection, record: &V) -> StoreResult<V::Key>;
    fn update(&self, conn: &Connection, key: V::Key, record: &V) -> StoreResult<()>;
    fn delete(&self, conn: &Connection, key: V::Key, record: &V) -> StoreResult<()>;
}

impl<V: Keyed, R: Repository<V>> Repository<V> for &R {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn list(&self, conn: &Connection) -> StoreResult<Vec<V>> {
        (**self).list(conn)
    }

    fn get(&self, conn: &Connection, key: V::Key) -> StoreResult<Option<V>> {
        (**self).get(conn, key)
    }

    fn create(&self, conn: &Connection, record: &V) -> StoreResult<V::Key> {
        (**self).create(conn, record)
    }

    fn update(&self, conn: &Connection, key: V::Key, record: &V) -> StoreResult<()> {
        (**self).update(conn, key, record)
    }

    fn delete(&self, conn: &Connection, key: V::Key, record: &V) -> StoreResult<()> {
        (**self).delete(conn, key, record)
    }
}

/// Column metadata binding a record type to its backing table.
pub trait TableRecord: Keyed<Key = RecordId> + Clone {
    const TABLE: &'static str;
    const KIND: &'static str;
    /// Non-key columns in declaration order.
    const COLUMNS: &'static [&'static str];
    /// Deterministic list order clause.
    const ORDER_BY: &'static str;

    /// Decodes one row selected as `id, COLUMNS...`.
    fn from_row(row: &Row<'_>) -> Result<Self, RowError>;

    /// Returns values for `COLUMNS` in declaration order.
    fn bind_values(&self) -> Vec<Value>;
}

/// Table-driven SQLite repository for single-table records.
pub struct SqliteRepository<V> {
    _record: PhantomData<V>,
}

impl<V: TableRecord> SqliteRepository<V> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }

    /// Creates the repository after verifying the backing table is present.
    pub fn try_new(conn: &Connection) -> StoreResult<Self> {
        ensure_table(conn, V::TABLE)?;
        ensure_column(conn, V::TABLE, "id")?;
        for column in V::COLUMNS {
            ensure_column(conn, V::TABLE, column)?;
        }
        Ok(Self::new())
    }

    fn select_sql() -> String {
        format!("SELECT id, {} FROM {}", V::COLUMNS.join(", "), V::TABLE)
    }
}

impl<V: TableRecord> Default for SqliteRepository<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TableRecord> Repository<V> for SqliteRepository<V> {
    fn kind(&self) -> &'static str {
        V::KIND
    }

    fn list(&self, conn: &Connection) -> StoreResult<Vec<V>> {
        let sql = format!("{} ORDER BY {};", Self::select_sql(), V::ORDER_BY);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|err| StoreError::backend(StoreOp::List, V::KIND, err))?;
        let mut rows = stmt
            .query([])
            .map_err(|err| StoreError::backend(StoreOp::List, V::KIND, err))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::List, V::KIND, err))?
        {
            records.push(V::from_row(row).map_err(|err| err.into_store(StoreOp::List, V::KIND))?);
        }
        Ok(records)
    }

    fn get(&self, conn: &Connection, key: RecordId) -> StoreResult<Option<V>> {
        let sql = format!("{} WHERE id = ?1;", Self::select_sql());
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|err| StoreError::backend(StoreOp::Get, V::KIND, err))?;
        let mut rows = stmt
            .query([key])
            .map_err(|err| StoreError::backend(StoreOp::Get, V::KIND, err))?;

        match rows
            .next()
            .map_err(|err| StoreError::backend(StoreOp::Get, V::KIND, err))?
        {
            Some(row) => Ok(Some(
                V::from_row(row).map_err(|err| err.into_store(StoreOp::Get, V::KIND))?,
            )),
            None => Ok(None),
        }
    }

    fn create(&self, conn: &Connection, record: &V) -> StoreResult<RecordId> {
        let placeholders = (1..=V::COLUMNS.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            V::TABLE,
            V::COLUMNS.join(", "),
            placeholders
        );
        conn.execute(&sql, params_from_iter(record.bind_values()))
            .map_err(|err| StoreError::backend(StoreOp::Create, V::KIND, err))?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, conn: &Connection, key: RecordId, record: &V) -> StoreResult<()> {
        let assignments = V::COLUMNS
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{};",
            V::TABLE,
            assignments,
            V::COLUMNS.len() + 1
        );

        let mut values = record.bind_values();
        values.push(Value::Integer(key));
        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(|err| StoreError::backend(StoreOp::Update, V::KIND, err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound { kind: V::KIND, key });
        }
        Ok(())
    }

    fn delete(&self, conn: &Connection, key: RecordId, _record: &V) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1;", V::TABLE);
        let changed = conn
            .execute(&sql, [key])
            .map_err(|err| StoreError::backend(StoreOp::Delete, V::KIND, err))?;
        if changed == 0 {
            return Err(StoreError::RowNotFound { kind: V::KIND, key });
        }
        Ok(())
    }
}
