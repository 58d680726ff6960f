//! Grouped-index read-through cache decorator.

use crate::model::keys::Keyed;
use crate::repo::{Repository, StoreResult};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct GroupedLoaded<V: Keyed, G: Ord> {
    by_key: BTreeMap<V::Key, V>,
    /// Repository list order, preserved across targeted patches.
    order: Vec<V::Key>,
    /// Derived secondary index; member lists keep repository list order.
    by_group: BTreeMap<G, Vec<V::Key>>,
}

impl<V: Keyed + Clone, G: Copy + Ord> GroupedLoaded<V, G> {
    fn build(records: Vec<V>, group_of: fn(&V) -> G) -> Self {
        let order: Vec<V::Key> = records.iter().map(Keyed::key).collect();
        let mut by_group: BTreeMap<G, Vec<V::Key>> = BTreeMap::new();
        let mut by_key = BTreeMap::new();
        for record in records {
            by_group
                .entry(group_of(&record))
                .or_default()
                .push(record.key());
            by_key.insert(record.key(), record);
        }
        Self {
            by_key,
            order,
            by_group,
        }
    }

    fn remove(&mut self, key: &V::Key) {
        self.by_key.remove(key);
        self.order.retain(|existing| existing != key);
        self.by_group
            .values_mut()
            .for_each(|members| members.retain(|existing| existing != key));
        self.by_group.retain(|_, members| !members.is_empty());
    }

    fn replace(&mut self, record: V, group_of: fn(&V) -> G) {
        let key = record.key();
        let new_group = group_of(&record);
        let old_group = self
            .by_key
            .get(&key)
            .map(|existing| group_of(existing));
        if old_group != Some(new_group) {
            if let Some(old_group) = old_group {
                if let Some(members) = self.by_group.get_mut(&old_group) {
                    members.retain(|existing| existing != &key);
                    if members.is_empty() {
                        self.by_group.remove(&old_group);
                    }
                }
            }
            self.by_group.entry(new_group).or_default().push(key);
        }
        self.by_key.insert(key, record);
    }
}

/// Read-through cache with a secondary index keyed by a derived group key.
///
/// Same reload discipline as [`super::KeyedCache`]; the group index is a
/// recomputed property, so both maps live under one lock and are rebuilt
/// together, never independently.
pub struct GroupedCache<V: Keyed, G: Ord, R> {
    repo: R,
    group_of: fn(&V) -> G,
    state: RwLock<Option<GroupedLoaded<V, G>>>,
}

impl<V, G, R> GroupedCache<V, G, R>
where
    V: Keyed + Clone,
    G: Copy + Ord,
    R: Repository<V>,
{
    /// Creates the cache with the pure group-key derivation function.
    pub fn new(repo: R, group_of: fn(&V) -> G) -> Self {
        Self {
            repo,
            group_of,
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

    /// Returns the group's members, or `None` for an unknown group key.
    pub fn get_by_group(&self, conn: &Connection, group: G) -> StoreResult<Option<Vec<V>>> {
        {
            let guard = self.read_state();
            if let Some(loaded) = guard.as_ref() {
                return Ok(collect_group(loaded, &group));
            }
        }
        let guard = self.ensure_loaded(conn)?;
        Ok(guard
            .as_ref()
            .and_then(|loaded| collect_group(loaded, &group)))
    }

    /// Creates through the repository, then drops the cached view.
    pub fn create(&self, conn: &Connection, record: &V) -> StoreResult<V::Key> {
        let key = self.repo.create(conn, record)?;
        self.invalidate();
        Ok(key)
    }

    /// Updates through the repository, then patches map and group index.
    pub fn update(&self, conn: &Connection, record: &V) -> StoreResult<()> {
        self.repo.update(conn, record.key(), record)?;
        let mut guard = self.write_state();
        let view_is_stale = match guard.as_mut() {
            Some(loaded) => {
                if loaded.by_key.contains_key(&record.key()) {
                    loaded.replace(record.clone(), self.group_of);
                    false
                } else {
                    // Key unseen by the cached view: the view is stale.
                    true
                }
            }
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

    /// Deletes through the repository, then patches map and group index.
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
    ) -> StoreResult<RwLockWriteGuard<'_, Option<GroupedLoaded<V, G>>>> {
        let mut guard = self.write_state();
        if guard.is_none() {
            let records = self.repo.list(conn)?;
            info!(
                "event=cache_reload module=cache kind={} rows={}",
                self.repo.kind(),
                records.len()
            );
            *guard = Some(GroupedLoaded::build(records, self.group_of));
        }
        Ok(guard)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<GroupedLoaded<V, G>>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<GroupedLoaded<V, G>>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn collect_ordered<V: Keyed + Clone, G: Ord>(loaded: &GroupedLoaded<V, G>) -> Vec<V> {
    loaded
        .order
        .iter()
        .filter_map(|key| loaded.by_key.get(key).cloned())
        .collect()
}

fn collect_group<V: Keyed + Clone, G: Ord>(
    loaded: &GroupedLoaded<V, G>,
    group: &G,
) -> Option<Vec<V>> {
    loaded.by_group.get(group).map(|members| {
        members
            .iter()
            .filter_map(|key| loaded.by_key.get(key).cloned())
            .collect()
    })
}
