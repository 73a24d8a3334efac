use std::collections::HashSet;

use likesync_core::Item;

/// Outcome of diffing a complete remote listing against the local index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub remote_ids: HashSet<String>,
    /// Remote order, first occurrence of each id.
    pub to_add: Vec<Item>,
    pub to_remove: HashSet<String>,
}

impl SyncPlan {
    pub fn already_present(&self) -> usize {
        self.remote_ids.len() - self.to_add.len()
    }

    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Only call this with a listing that was fetched completely; a failed fetch
/// must never reach here as an empty slice.
pub fn diff(remote_items: &[Item], local_ids: &HashSet<String>) -> SyncPlan {
    let mut remote_ids = HashSet::with_capacity(remote_items.len());
    let mut to_add = Vec::new();
    for item in remote_items {
        if !remote_ids.insert(item.id.clone()) {
            continue;
        }
        if !local_ids.contains(&item.id) {
            to_add.push(item.clone());
        }
    }
    let to_remove = local_ids.difference(&remote_ids).cloned().collect();

    SyncPlan {
        remote_ids,
        to_add,
        to_remove,
    }
}
