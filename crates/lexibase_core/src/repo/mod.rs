//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the narrow list/get/create/update/delete contract shared by
//!   caches and the save orchestrator.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Every failure names the operation and entity kind it came from.
//! - Repositories verify connection readiness up front instead of failing
//!   later inside SQL.

use crate::model::keys::RecordId;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod lexeme_repo;
pub mod reference_repo;
mod repository;

pub use repository::{Repository, SqliteRepository, TableRecord};

pub type StoreResult<T> = Result<T, StoreError>;

/// Which repository operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Display for StoreOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{name}")
    }
}

/// Persistence-boundary error carrying operation and entity-kind context.
#[derive(Debug)]
pub enum StoreError {
    /// Opaque SQLite failure.
    Backend {
        op: StoreOp,
        kind: &'static str,
        source: rusqlite::Error,
    },
    /// A single-row mutation matched no row.
    RowNotFound { kind: &'static str, key: RecordId },
    /// Persisted data cannot be converted to a valid record.
    InvalidRow { kind: &'static str, message: String },
    /// Required table is missing from the connected database.
    MissingRequiredTable(&'static str),
    /// Required column is missing from an expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Connection schema is not at the migrated version this code expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl StoreError {
    pub(crate) fn backend(op: StoreOp, kind: &'static str, source: rusqlite::Error) -> Self {
        Self::Backend { op, kind, source }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend { op, kind, source } => {
                write!(f, "storage failure during {kind} {op}: {source}")
            }
            Self::RowNotFound { kind, key } => write!(f, "{kind} row not found: {key}"),
            Self::InvalidRow { kind, message } => {
                write!(f, "invalid persisted {kind} data: {message}")
            }
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "repository requires column `{column}` in table `{table}`")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Row-decoding failure inside a repository implementation.
#[derive(Debug)]
pub enum RowError {
    Sql(rusqlite::Error),
    Invalid(String),
}

impl From<rusqlite::Error> for RowError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl RowError {
    pub(crate) fn into_store(self, op: StoreOp, kind: &'static str) -> StoreError {
        match self {
            Self::Sql(err) => StoreError::backend(op, kind, err),
            Self::Invalid(message) => StoreError::InvalidRow { kind, message },
        }
    }
}

pub(crate) fn ensure_schema_version(
    conn: &Connection,
    expected_version: u32,
) -> StoreResult<()> {
    let actual_version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|err| StoreError::backend(StoreOp::Get, "schema", err))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn ensure_table(conn: &Connection, table: &'static str) -> StoreResult<()> {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )
        .map_err(|err| StoreError::backend(StoreOp::Get, "schema", err))?;
    if exists != 1 {
        return Err(StoreError::MissingRequiredTable(table));
    }
    Ok(())
}

pub(crate) fn ensure_column(
    conn: &Connection,
    table: &'static str,
    column: &'static str,
) -> StoreResult<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table});"))
        .map_err(|err| StoreError::backend(StoreOp::Get, "schema", err))?;
    let mut rows = stmt
        .query([])
        .map_err(|err| StoreError::backend(StoreOp::Get, "schema", err))?;
    while let Some(row) = rows
        .next()
        .map_err(|err| StoreError::backend(StoreOp::Get, "schema", err))?
    {
        let current: String = row
            .get(1)
            .map_err(|err| StoreError::backend(StoreOp::Get, "schema", err))?;
        if current == column {
            return Ok(());
        }
    }
    Err(StoreError::MissingRequiredColumn { table, column })
}
