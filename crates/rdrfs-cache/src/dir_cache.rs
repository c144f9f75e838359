//! Directory content: enumeration list plus the three sibling name indexes.
//!
//! A [`DirectoryNodes`] lives behind the owning directory object's
//! reader/writer lock. Lookups take it shared; inserts, name removal and
//! the mark-and-sweep pass take it exclusive. Index keys are name hashes;
//! every hit is confirmed by comparing the names.

use crate::dir_entry::{DirEntryFlags, DirectoryEntry, FILE_INDEX_PIOCTL};
use crate::hash::{name_hash, names_equal_ignore_case};
use crate::list::EntryList;
use crate::path::is_dos_8dot3_legal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

type HashIndex = BTreeMap<u32, Vec<Arc<DirectoryEntry>>>;

#[derive(Default)]
pub struct DirectoryNodes {
    entries: EntryList<Arc<DirectoryEntry>>,
    case_sensitive: HashIndex,
    case_insensitive: HashIndex,
    short_names: HashIndex,
    node_count: usize,
    next_file_index: u64,
    pioctl: Option<Arc<DirectoryEntry>>,
}

fn index_insert(index: &mut HashIndex, hash: u32, entry: &Arc<DirectoryEntry>) {
    index.entry(hash).or_default().push(Arc::clone(entry));
}

fn index_remove(index: &mut HashIndex, hash: u32, entry: &Arc<DirectoryEntry>) -> bool {
    let Some(bucket) = index.get_mut(&hash) else {
        return false;
    };
    let before = bucket.len();
    bucket.retain(|e| !Arc::ptr_eq(e, entry));
    let removed = bucket.len() != before;
    if bucket.is_empty() {
        index.remove(&hash);
    }
    removed
}

impl DirectoryNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in enumeration order, fake ones included.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<DirectoryEntry>> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of non-fake entries in the enumeration list.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Enumeration position for the next entry created in this directory.
    pub(crate) fn next_file_index(&mut self) -> u64 {
        self.next_file_index = self.next_file_index.max(FILE_INDEX_PIOCTL) + 1;
        self.next_file_index
    }

    pub fn pioctl(&self) -> Option<&Arc<DirectoryEntry>> {
        self.pioctl.as_ref()
    }

    pub(crate) fn set_pioctl(&mut self, entry: Arc<DirectoryEntry>) {
        self.pioctl = Some(entry);
    }

    /// Adds `entry` to the name indexes and, optionally, the enumeration list.
    pub(crate) fn insert(&mut self, entry: &Arc<DirectoryEntry>, in_enumeration_list: bool) {
        if in_enumeration_list {
            let handle = self.entries.push_back(Arc::clone(entry));
            *entry.list_handle().lock() = Some(handle);
            if !entry.is_fake() {
                self.node_count += 1;
            }
        }
        self.insert_name_entry(entry);
    }

    pub(crate) fn insert_name_entry(&mut self, entry: &Arc<DirectoryEntry>) {
        if entry.file_name().is_empty() || !entry.has_flags(DirEntryFlags::NOT_IN_PARENT_TREE) {
            return;
        }
        index_insert(&mut self.case_sensitive, entry.case_sensitive_hash(), entry);
        index_insert(&mut self.case_insensitive, entry.case_insensitive_hash(), entry);
        if entry.short_name_hash() != 0 {
            index_insert(&mut self.short_names, entry.short_name_hash(), entry);
        }
        entry.clear_flags(DirEntryFlags::NOT_IN_PARENT_TREE);
    }

    /// Removes `entry` from the sibling indexes; a no-op when it is already out.
    pub(crate) fn remove_name_entry(&mut self, entry: &Arc<DirectoryEntry>) {
        if entry.has_flags(DirEntryFlags::NOT_IN_PARENT_TREE) {
            return;
        }
        let removed = index_remove(&mut self.case_sensitive, entry.case_sensitive_hash(), entry);
        debug_assert!(removed, "entry {} missing from case-sensitive index", entry.file_name());
        index_remove(&mut self.case_insensitive, entry.case_insensitive_hash(), entry);
        if entry.short_name_hash() != 0 {
            index_remove(&mut self.short_names, entry.short_name_hash(), entry);
        }
        entry.set_flags(DirEntryFlags::NOT_IN_PARENT_TREE);
        trace!(name = entry.file_name(), "removed name entry");
    }

    /// Unlinks `entry` from the enumeration list. Returns false if it was not linked.
    pub(crate) fn remove_from_list(&mut self, entry: &Arc<DirectoryEntry>) -> bool {
        let Some(handle) = entry.list_handle().lock().take() else {
            return false;
        };
        if self.entries.remove(handle).is_none() {
            return false;
        }
        if !entry.is_fake() {
            debug_assert!(self.node_count > 0, "directory node count underflow");
            self.node_count = self.node_count.saturating_sub(1);
        }
        true
    }

    pub fn lookup_case_sensitive(&self, name: &str) -> Option<Arc<DirectoryEntry>> {
        self.case_sensitive
            .get(&name_hash(name, false))?
            .iter()
            .find(|e| e.file_name() == name && !e.is_deleted())
            .cloned()
    }

    pub fn lookup_case_insensitive(&self, name: &str) -> Option<Arc<DirectoryEntry>> {
        self.case_insensitive
            .get(&name_hash(name, true))?
            .iter()
            .find(|e| names_equal_ignore_case(e.file_name(), name) && !e.is_deleted())
            .cloned()
    }

    pub fn lookup_short_name(&self, name: &str) -> Option<Arc<DirectoryEntry>> {
        self.short_names
            .get(&name_hash(name, true))?
            .iter()
            .find(|e| {
                e.short_name()
                    .map(|s| names_equal_ignore_case(s, name))
                    .unwrap_or(false)
                    && !e.is_deleted()
            })
            .cloned()
    }

    /// Case-sensitive, then case-insensitive, then short name for 8.3-legal names.
    pub fn lookup(&self, name: &str) -> Option<Arc<DirectoryEntry>> {
        self.lookup_case_sensitive(name)
            .or_else(|| self.lookup_case_insensitive(name))
            .or_else(|| {
                if is_dos_8dot3_legal(name) {
                    self.lookup_short_name(name)
                } else {
                    None
                }
            })
    }

    /// Empty iff every entry is fake or already deleted.
    pub fn is_empty_for_delete(&self) -> bool {
        self.entries().all(|e| e.is_fake() || e.is_deleted())
    }

    /// The node count agrees with the non-fake entries on the list.
    pub fn check_node_count(&self) -> bool {
        self.entries().filter(|e| !e.is_fake()).count() == self.node_count
    }

    /// Empties the list and every index, returning the entries in list order.
    pub(crate) fn drain(&mut self) -> Vec<Arc<DirectoryEntry>> {
        let entries = self.entries.drain();
        for entry in &entries {
            entry.list_handle().lock().take();
            entry.set_flags(DirEntryFlags::NOT_IN_PARENT_TREE);
        }
        self.case_sensitive.clear();
        self.case_insensitive.clear();
        self.short_names.clear();
        self.node_count = 0;
        entries
    }
}

/// Drops one open reference on `entry`.
///
/// When the last reference goes away from an entry that was logically
/// deleted while in use, the entry is unlinked from its parent's list and
/// its object reference released. The check runs under the parent's
/// exclusive lock so it cannot interleave with a sweep deciding the
/// entry's fate. The caller must not hold that lock.
pub fn release_directory_entry(entry: &Arc<DirectoryEntry>) {
    if entry.dereference() > 0 {
        return;
    }
    let Some(parent) = entry.parent() else {
        return;
    };
    let unlinked = {
        let mut nodes = parent.directory().write();
        entry.open_reference_count() == 0 && entry.is_deleted() && nodes.remove_from_list(entry)
    };
    if unlinked {
        debug!(name = entry.file_name(), parent = %parent.file_id(), "freeing deleted entry on last release");
        free_entry(entry);
    }
}

/// Releases the object reference an unlinked entry held.
pub(crate) fn free_entry(entry: &DirectoryEntry) {
    let object = entry.object();
    match object.volume() {
        Some(volume) => {
            volume.stats().entry_freed();
            volume.release_object(object);
        }
        None => {
            object.dereference();
        }
    }
    trace!(name = entry.file_name(), fid = %object.file_id(), "freed directory entry");
}
