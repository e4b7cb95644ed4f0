//! Local copies of a peer's incremental map fragments.

use std::collections::BTreeMap;

use crate::wire::MapFragment;
use crate::AgentId;

/// Fragments held locally for one owner, keyed by fragment index.
///
/// Re-delivery of an index already held is ignored, so [`len`](Self::len)
/// counts distinct fragments.
#[derive(Debug, Clone, Default)]
pub struct FragmentStore {
    owner: AgentId,
    fragments: BTreeMap<u32, MapFragment>,
}

impl FragmentStore {
    /// Create an empty store for `owner`'s map.
    pub fn new(owner: AgentId) -> Self {
        Self {
            owner,
            fragments: BTreeMap::new(),
        }
    }

    /// Whose map these fragments belong to.
    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Store a fragment. Returns true if the index was not held yet.
    pub fn insert(&mut self, fragment: MapFragment) -> bool {
        if self.fragments.contains_key(&fragment.index) {
            return false;
        }
        self.fragments.insert(fragment.index, fragment);
        true
    }

    /// Append a locally produced fragment at the next free index.
    pub fn push(&mut self, data: Vec<u8>) -> u32 {
        let index = self.next_index();
        self.fragments.insert(index, MapFragment { index, data });
        index
    }

    /// One past the highest held index.
    pub fn next_index(&self) -> u32 {
        self.fragments
            .keys()
            .next_back()
            .map_or(0, |last| last.saturating_add(1))
    }

    pub fn get(&self, index: u32) -> Option<&MapFragment> {
        self.fragments.get(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.fragments.contains_key(&index)
    }

    /// Number of distinct fragments held.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments in index order.
    pub fn iter(&self) -> impl Iterator<Item = &MapFragment> {
        self.fragments.values()
    }

    /// The requested fragments that are held, with their indices.
    pub fn select(&self, indices: &[u32]) -> (Vec<MapFragment>, Vec<u32>) {
        let mut found = Vec::new();
        let mut supplied = Vec::new();
        for index in indices {
            if let Some(fragment) = self.fragments.get(index) {
                if !supplied.contains(index) {
                    found.push(fragment.clone());
                    supplied.push(*index);
                }
            }
        }
        (found, supplied)
    }
}
