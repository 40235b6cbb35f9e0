//! Bidirectional tag index.
//!
//! Tracks tag → cached keys and key → tags so that invalidating a tag finds
//! every affected entry, and dropping a key leaves no dangling references.
//! The index carries no lock of its own: [`super::QueryCache`] guards it and
//! the entry store together.
//!
//! It also remembers the epoch at which each tag was last invalidated, so a
//! result computed before that point is not stored afterwards. Marks are
//! pruned once no computation older than them is still running.

use std::collections::{HashMap, HashSet};

use super::keys::{QueryKey, Tag, TagSet};

/// Monotonic counter ordering invalidations against in-flight computations.
pub type Epoch = u64;

#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: HashMap<Tag, HashSet<QueryKey>>,
    key_to_tags: HashMap<QueryKey, TagSet>,
    invalidated: HashMap<Tag, Epoch>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` under every tag in `tags`, replacing any tags it carried before.
    pub fn register(&mut self, key: QueryKey, tags: TagSet) {
        self.forget(&key);
        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.key_to_tags.insert(key, tags);
    }

    /// Removes the tag and returns every key that was indexed under it.
    ///
    /// The returned keys are also detached from their other tags, since the
    /// caller is about to delete those entries.
    pub fn take_tag(&mut self, tag: &Tag) -> HashSet<QueryKey> {
        let keys = self.tag_to_keys.remove(tag).unwrap_or_default();
        for key in &keys {
            self.forget(key);
        }
        keys
    }

    /// Drops all bookkeeping for `key`.
    pub fn forget(&mut self, key: &QueryKey) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<QueryKey> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &QueryKey) -> TagSet {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    pub fn mark_invalidated(&mut self, tag: &Tag, epoch: Epoch) {
        self.invalidated.insert(tag.clone(), epoch);
    }

    /// Whether any of `tags` was invalidated after a computation that began at `epoch`.
    pub fn invalidated_since(&self, tags: &TagSet, epoch: Epoch) -> bool {
        tags.iter().any(|tag| {
            self.invalidated
                .get(tag)
                .is_some_and(|marked| *marked > epoch)
        })
    }

    /// Drops marks that no running computation predates.
    pub fn prune_marks(&mut self, oldest_in_flight: Option<Epoch>) {
        match oldest_in_flight {
            Some(oldest) => self.invalidated.retain(|_, marked| *marked > oldest),
            None => self.invalidated.clear(),
        }
    }

    pub fn mark_count(&self) -> usize {
        self.invalidated.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}
