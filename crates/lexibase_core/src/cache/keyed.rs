//! Single-key read-through cache decorator.

use crate::model::keys::Keyed;
use crate::repo::{Repository, StoreResult};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Loaded<V: Keyed> {
    by_key: BTreeMap<V::Key, V>,
    /// Repository list order, preserved across targeted patches.
    order: Vec<V::Key>,
}

impl<V: Keyed + Clone> Loaded<V> {
    fn build(records: Vec<V>) -> Self {
        let order: Vec<V::Key> = records.iter().map(Keyed::key).collect();
        let by_key = records
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        Self { by_key, order }
    }

    fn remove(&mut self, key: &V::Key) {
        self.by_key.remove(key);
        self.order.retain(|existing| existing != key);
    }
}

/// Read-through cache over one repository, keyed by record identity.
///
/// Reads load lazily; `create` invalidates the whole view (insert order can
/// shift default-sort positions); `update`/`delete` patch the single affected
/// key once the repository confirms the row mutation.
pub struct KeyedCache<V: Keyed, R> {
    repo: R,
    state: RwLock<Option<Loaded<V>>>,
}

impl<V, R> KeyedCache<V, R>
where
    V: Keyed + Clone,
    R: Repository<V>,
{
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            state: RwLock::new(None),
        }
    }

    /// Entity kind served by this cache.
    pub fn kind(&self) -> &'static str {
        self.repo.kind()
    }

    /// Returns one record by key, loading the view on first access.
    pub fn get(&self, conn: &Connection, key: V::Key) -> StoreResult<Option<V>> {
        {
            let guard = self.read_state();
            if let Some(loaded) = guard.as_ref() {
                return Ok(loaded.by_key.get(&key).cloned());
            }
        }
        let guard = self.ensure_loaded(conn)?;
        Ok(guard
            .as_ref()
            .and_then(|loaded| loaded.by_key.get(&key).cloned()))
    }

    /// Returns all records in repository list order.
    pub fn list(&self, conn: &Connection) -> StoreResult<Vec<V>> {
        {
            let guard = self.read_state();
            if let Some(loaded) = guard.as_ref() {
                return Ok(collect_ordered(loaded));
            }
        }
        let guard = self.ensure_loaded(conn)?;
        Ok(guard.as_ref().map(collect_ordered).unwrap_or_default())
    }

    /// Creates through the repository, then drops the cached view.
    pub fn create(&self, conn: &Connection, record: &V) -> StoreResult<V::Key> {
        let key = self.repo.create(conn, record)?;
        self.invalidate();
        Ok(key)
    }

    /// Updates through the repository, then patches the single affected key.
    pub fn update(&self, conn: &Connection, record: &V) -> StoreResult<()> {
        self.repo.update(conn, record.key(), record)?;
        let mut guard = self.write_state();
        let view_is_stale = match guard.as_mut() {
            Some(loaded) => match loaded.by_key.get_mut(&record.key()) {
                Some(slot) => {
                    *slot = record.clone();
                    false
                }
                // Key unseen by the cached view: the view is stale.
                None => true,
            },
            None => false,
        };
        if view_is_stale {
            *guard = None;
        }
        debug!(
            "event=cache_patch module=cache kind={} op=update",
            self.repo.kind()
        );
        Ok(())
    }

    /// Deletes through the repository, then patches the single affected key.
    pub fn delete(&self, conn: &Connection, record: &V) -> StoreResult<()> {
        self.repo.delete(conn, record.key(), record)?;
        let mut guard = self.write_state();
        if let Some(loaded) = guard.as_mut() {
            loaded.remove(&record.key());
        }
        debug!(
            "event=cache_patch module=cache kind={} op=delete",
            self.repo.kind()
        );
        Ok(())
    }

    /// Drops the cached view; the next access reloads from the repository.
    pub fn invalidate(&self) {
        let mut guard = self.write_state();
        *guard = None;
        debug!("event=cache_invalidate module=cache kind={}", self.repo.kind());
    }

    fn ensure_loaded(
        &self,
        conn: &Connection,
    ) -> StoreResult<RwLockWriteGuard<'_, Option<Loaded<V>>>> {
        let mut guard = self.write_state();
        if guard.is_none() {
            let records = self.repo.list(conn)?;
            info!(
                "event=cache_reload module=cache kind={} rows={}",
                self.repo.kind(),
                records.len()
            );
            *guard = Some(Loaded::build(records));
        }
        Ok(guard)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<Loaded<V>>> {
        // A poisoned lock only means a reader/writer panicked; the state slot
        // itself is always either a fully built view or None.
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<Loaded<V>>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn collect_ordered<V: Keyed + Clone>(loaded: &Loaded<V>) -> Vec<V> {
    loaded
        .order
        .iter()
        .filter_map(|key| loaded.by_key.get(key).cloned())
        .collect()
}
