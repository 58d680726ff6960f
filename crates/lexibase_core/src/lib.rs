//! Core domain logic for the Lexibase dictionary backend.
//! This crate is the single source of truth for aggregate invariants.

pub mod cache;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod template;

pub use cache::{GroupedCache, KeyedCache, ReferenceCatalog};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::keys::{EntityRef, Keyed, RecordId};
pub use model::lexeme::{
    ChangeIntent, Form, GroupAttachment, Lexeme, Link, Mapping, RenderedLabel, Sense, Variant,
};
pub use model::reference::{
    Category, Dialect, FormType, Language, LanguagePair, LinkTargetKind, LinkType, Orthography,
    Template,
};
pub use repo::lexeme_repo::SqliteLexemeRepository;
pub use repo::{Repository, SqliteRepository, StoreError, StoreResult};
pub use service::{
    CompatibilityViolation, InvariantViolation, LexemeService, SaveContext, SaveError, SaveSummary,
};
pub use template::{render_label, resolve_template, RenderIssue};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
