//! In-memory notification store.
//!
//! Ordered newest-first, ids unique, and an incrementally maintained unread
//! counter that always equals the number of records with `read == false`.
//! The store is owned by the control task; nothing here is synchronized.

use std::collections::{HashSet, VecDeque};

use herald_core::{Notification, NotificationId};
use serde::Serialize;
use tracing::debug;

use crate::merge::merge_by_id;

/// Result of [`NotificationStore::prepend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrependOutcome {
    /// Added at the front.
    Inserted,
    /// A record with this id already exists; the store is unchanged.
    Duplicate,
}

/// Result of [`NotificationStore::mark_read`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The record was unread and is now read.
    Marked,
    /// The record was already read.
    AlreadyRead,
    /// No record with this id.
    NotFound,
}

/// Ordered records plus unread count, taken at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Records, most recent first.
    pub notifications: Vec<Notification>,
    /// Number of records with `read == false`.
    pub unread_count: usize,
}

impl StoreSnapshot {
    /// Total number of records.
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// The notification collection for one user.
#[derive(Debug, Default)]
pub struct NotificationStore {
    records: VecDeque<Notification>,
    ids: HashSet<NotificationId>,
    unread: usize,
}

impl NotificationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with `records` (server order, newest first).
    ///
    /// Later duplicates of an id already seen in `records` are dropped.
    pub fn load_initial(&mut self, records: Vec<Notification>) {
        self.records.clear();
        self.ids.clear();
        for record in records {
            if self.ids.contains(&record.id) {
                debug!(id = %record.id, "dropping duplicate id in loaded records");
                continue;
            }
            let _ = self.ids.insert(record.id.clone());
            self.records.push_back(record);
        }
        self.recount();
    }

    /// Insert `record` at the front.
    pub fn prepend(&mut self, record: Notification) -> PrependOutcome {
        if self.ids.contains(&record.id) {
            return PrependOutcome::Duplicate;
        }
        if !record.read {
            self.unread += 1;
        }
        let _ = self.ids.insert(record.id.clone());
        self.records.push_front(record);
        PrependOutcome::Inserted
    }

    /// Mark the record with `id` as read. Unknown ids and already-read
    /// records are left alone.
    pub fn mark_read(&mut self, id: &NotificationId) -> MarkReadOutcome {
        if !self.ids.contains(id) {
            return MarkReadOutcome::NotFound;
        }
        match self.records.iter_mut().find(|n| &n.id == id) {
            Some(record) if !record.read => {
                record.read = true;
                self.unread = self.unread.saturating_sub(1);
                MarkReadOutcome::Marked
            }
            Some(_) => MarkReadOutcome::AlreadyRead,
            None => MarkReadOutcome::NotFound,
        }
    }

    /// Union `fetched` with the current contents.
    ///
    /// Local records missing from `fetched` stay in front in their current
    /// order; fetched records follow in server order. A record present on
    /// both sides is read if either side says so.
    pub fn merge_fetched(&mut self, fetched: Vec<Notification>) {
        let merged = merge_by_id(&self.records, fetched);
        self.load_initial(merged);
    }

    /// Copy of the ordered records and the unread count.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            notifications: self.records.iter().cloned().collect(),
            unread_count: self.unread,
        }
    }

    /// Record by id.
    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        if !self.ids.contains(id) {
            return None;
        }
        self.records.iter().find(|n| &n.id == id)
    }

    /// Records, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of unread records.
    pub fn unread_count(&self) -> usize {
        self.unread
    }

    fn recount(&mut self) {
        self.unread = self.records.iter().filter(|n| !n.read).count();
    }
}
