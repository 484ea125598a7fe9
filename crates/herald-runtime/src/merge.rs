//! Applying a bulk-fetch result to a store that may already hold pushes.

use std::collections::{HashMap, HashSet};

use herald_core::{Notification, NotificationId};
use herald_settings::FetchMergePolicy;
use tracing::debug;

use crate::store::NotificationStore;

/// Union of `local` and `fetched` by id.
///
/// Local-only records come first in local order, then the fetched records
/// in server order. For ids on both sides the fetched record wins except for
/// `read`, which is the OR of both (reads never revert).
pub fn merge_by_id<'a>(
    local: impl IntoIterator<Item = &'a Notification>,
    fetched: Vec<Notification>,
) -> Vec<Notification> {
    let local: Vec<&Notification> = local.into_iter().collect();
    let fetched_ids: HashSet<&NotificationId> = fetched.iter().map(|n| &n.id).collect();
    let local_read: HashMap<&NotificationId, bool> = local.iter().map(|n| (&n.id, n.read)).collect();

    let mut merged: Vec<Notification> = local
        .iter()
        .filter(|n| !fetched_ids.contains(&n.id))
        .map(|n| (*n).clone())
        .collect();
    let kept_local = merged.len();

    merged.extend(fetched.iter().map(|n| {
        let mut record = n.clone();
        record.read |= local_read.get(&n.id).copied().unwrap_or(false);
        record
    }));

    debug!(
        kept_local,
        fetched = fetched.len(),
        total = merged.len(),
        "merged fetch result"
    );
    merged
}

/// Apply `fetched` to `store` according to `policy`.
pub fn apply_fetch(store: &mut NotificationStore, fetched: Vec<Notification>, policy: FetchMergePolicy) {
    match policy {
        FetchMergePolicy::Merge => store.merge_fetched(fetched),
        FetchMergePolicy::Replace => store.load_initial(fetched),
    }
}
