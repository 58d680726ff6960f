//! Shared catalog of reference-table caches.
//!
//! # Responsibility
//! - Bundle the caches the save orchestrator and template engine consult.
//! - Answer cross-language compatibility questions from the pair registry.

use crate::cache::{GroupedCache, KeyedCache};
use crate::model::keys::RecordId;
use crate::model::reference::{
    Category, Dialect, FormType, Language, LanguagePair, LinkType, Orthography, Template,
};
use crate::repo::reference_repo::TemplateRepository;
use crate::repo::{SqliteRepository, StoreResult};
use rusqlite::Connection;

/// All reference caches one process shares across concurrent callers.
pub struct ReferenceCatalog {
    pub languages: KeyedCache<Language, SqliteRepository<Language>>,
    pub categories: KeyedCache<Category, SqliteRepository<Category>>,
    pub orthographies: KeyedCache<Orthography, SqliteRepository<Orthography>>,
    pub form_types: KeyedCache<FormType, SqliteRepository<FormType>>,
    pub link_types: KeyedCache<LinkType, SqliteRepository<LinkType>>,
    /// Dialects grouped by their owning language.
    pub dialects: GroupedCache<Dialect, RecordId, SqliteRepository<Dialect>>,
    /// Pairs grouped by their first language; membership is unordered.
    pub language_pairs: GroupedCache<LanguagePair, RecordId, SqliteRepository<LanguagePair>>,
    /// Templates grouped by classification for automatic lookup.
    pub templates: GroupedCache<Template, RecordId, TemplateRepository>,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self {
            languages: KeyedCache::new(SqliteRepository::new()),
            categories: KeyedCache::new(SqliteRepository::new()),
            orthographies: KeyedCache::new(SqliteRepository::new()),
            form_types: KeyedCache::new(SqliteRepository::new()),
            link_types: KeyedCache::new(SqliteRepository::new()),
            dialects: GroupedCache::new(SqliteRepository::new(), |dialect: &Dialect| {
                dialect.language_id
            }),
            language_pairs: GroupedCache::new(
                SqliteRepository::new(),
                |pair: &LanguagePair| pair.language_a_id,
            ),
            templates: GroupedCache::new(TemplateRepository::new(), |template: &Template| {
                template.category_id
            }),
        }
    }

    /// Returns whether the two languages are registered as compatible,
    /// in either direction.
    pub fn has_language_pair(
        &self,
        conn: &Connection,
        one: RecordId,
        other: RecordId,
    ) -> StoreResult<bool> {
        for group in [one, other] {
            if let Some(pairs) = self.language_pairs.get_by_group(conn, group)? {
                if pairs.iter().any(|pair| pair.connects(one, other)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl Default for ReferenceCatalog {
    fn default() -> Self {
        Self::new()
    }
}
