use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::naming::{sanitize_name, unique_name};
use crate::types::TorrentItem;

/// What a bulk replace did to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaceOutcome {
    pub applied: bool,
    /// The remote returned nothing while we still had torrents
    pub ignored_empty: bool,
    pub total: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Concurrent catalog of every torrent, the synthetic top-level directory.
///
/// `by_name` is the primary map and is keyed by the sanitized, collision-free
/// directory name so path resolution is a single lookup. `name_by_id` is a
/// secondary index kept in step with it.
pub struct TorrentCatalog {
    by_name: DashMap<String, TorrentItem>,
    name_by_id: DashMap<String, String>,
}

impl TorrentCatalog {
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            name_by_id: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<TorrentItem> {
        self.by_name.get(name).map(|r| r.value().clone())
    }

    pub fn name_of(&self, torrent_id: &str) -> Option<String> {
        self.name_by_id.get(torrent_id).map(|r| r.value().clone())
    }

    pub fn get_by_id(&self, torrent_id: &str) -> Option<TorrentItem> {
        let name = self.name_of(torrent_id)?;
        self.get(&name)
    }

    pub fn contains_id(&self, torrent_id: &str) -> bool {
        self.name_by_id.contains_key(torrent_id)
    }

    /// Every torrent, sorted by directory name.
    pub fn list(&self) -> Vec<TorrentItem> {
        let mut items: Vec<TorrentItem> = self.by_name.iter().map(|r| r.value().clone()).collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub fn ids(&self) -> Vec<String> {
        self.name_by_id.iter().map(|r| r.key().clone()).collect()
    }

    /// Insert or refresh one torrent. A known id keeps its directory name.
    /// Returns the name the torrent is listed under.
    pub fn upsert(&self, mut item: TorrentItem) -> String {
        if let Some(name) = self.name_of(&item.id) {
            if let Some(mut existing) = self.by_name.get_mut(&name) {
                item.inherit(existing.value());
                item.name = name.clone();
                *existing = item;
                return name;
            }
            // Stale secondary index; fall through and allocate a fresh name.
            self.name_by_id.remove(&item.id);
        }
        self.insert_new(item)
    }

    fn insert_new(&self, mut item: TorrentItem) -> String {
        let base = sanitize_name(&item.filename);
        loop {
            let candidate = unique_name(&base, |n| self.by_name.contains_key(n));
            match self.by_name.entry(candidate.clone()) {
                Entry::Vacant(slot) => {
                    item.name = candidate.clone();
                    let id = item.id.clone();
                    slot.insert(item);
                    self.name_by_id.insert(id, candidate.clone());
                    return candidate;
                }
                // Lost a race for this name; pick again.
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn remove_by_id(&self, torrent_id: &str) -> Option<TorrentItem> {
        let (_, name) = self.name_by_id.remove(torrent_id)?;
        let removed = self.by_name.remove(&name).map(|(_, item)| item);
        if removed.is_some() {
            debug!(torrent_id = torrent_id, name = %name, "Removed torrent from catalog");
        }
        removed
    }

    /// Replace the whole catalog with a fresh remote listing.
    ///
    /// An empty listing is ignored unless the catalog is already empty, since
    /// the remote answering with nothing is more often a hiccup than a wipe.
    pub fn replace_all(&self, items: Vec<TorrentItem>) -> ReplaceOutcome {
        if items.is_empty() && !self.is_empty() {
            warn!(
                current = self.len(),
                "Remote returned an empty torrent list; keeping the current catalog"
            );
            return ReplaceOutcome {
                applied: false,
                ignored_empty: true,
                total: self.len(),
                ..Default::default()
            };
        }

        let incoming: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();
        let removed: Vec<String> = self
            .ids()
            .into_iter()
            .filter(|id| !incoming.contains(id))
            .collect();
        for id in &removed {
            self.remove_by_id(id);
        }

        // Known torrents first so they keep their names ahead of new collisions.
        let (known, fresh): (Vec<TorrentItem>, Vec<TorrentItem>) =
            items.into_iter().partition(|i| self.contains_id(&i.id));
        for item in known {
            self.upsert(item);
        }
        let mut added = Vec::with_capacity(fresh.len());
        for item in fresh {
            added.push(item.id.clone());
            self.upsert(item);
        }

        let outcome = ReplaceOutcome {
            applied: true,
            ignored_empty: false,
            total: self.len(),
            added,
            removed,
        };
        info!(
            total = outcome.total,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "Catalog refreshed"
        );
        outcome
    }
}

impl Default for TorrentCatalog {
    fn default() -> Self {
        Self::new()
    }
}
