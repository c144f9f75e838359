//! Directory population and reconciliation against remote listings.
//!
//! Listings are always fetched with no lock held. Applying a listing, the
//! mark-and-sweep pass and content resets run under the directory's
//! exclusive lock, so a reader sees either the whole pre-sweep or the
//! whole post-sweep state. Object references dropped by a sweep are
//! released after the directory lock is let go.

use crate::collaborator::{AuthGroup, NotifyAction, NotifyFilter, RemoteEntry};
use crate::context::CacheContext;
use crate::dir_cache::{free_entry, release_directory_entry, DirectoryNodes};
use crate::dir_entry::{DirEntryFlags, DirectoryEntry, FILE_INDEX_PIOCTL};
use crate::error::{CacheError, Result};
use crate::fid::FileId;
use crate::hash::names_equal_ignore_case;
use crate::object_info::{
    FileType, ObjectFlags, ObjectInfo, FILE_ATTRIBUTE_HIDDEN, FILE_ATTRIBUTE_SYSTEM,
};
use crate::volume::Volume;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Name of the per-directory control entry.
pub const PIOCTL_NAME: &str = "_._AFS_IOCTL_._";

/// Creates the entry for `remote` under `parent`, sharing an existing object when one is registered.
///
/// The object gains one reference held by the returned entry. Metadata is
/// taken from `remote` only when the object is newly created. The caller
/// holds `parent`'s directory lock exclusively.
pub(crate) fn init_dir_entry(
    volume: &Arc<Volume>,
    parent: &Arc<ObjectInfo>,
    remote: &RemoteEntry,
    file_index: u64,
) -> Arc<DirectoryEntry> {
    let mut file_type = remote.file_type;
    let target_name = remote.target_name.as_deref().filter(|t| !t.is_empty());
    if file_type == FileType::SymLink && !remote.target_file_id.has_target() && target_name.is_none() {
        file_type = FileType::Unknown;
    }

    let low_index = remote.file_id.low_index();
    let (object, created) = {
        let mut tree = volume.objects().write();
        match tree.get(low_index).cloned() {
            Some(object) if low_index != 0 => {
                object.reference();
                (object, false)
            }
            _ => {
                let object = volume.allocate_object_info(&mut tree, parent, remote.file_id, low_index);
                object.reference();
                (object, true)
            }
        }
    };

    if created {
        object.update_meta(|meta| {
            meta.apply_remote(remote);
            meta.file_type = file_type;
        });
        if file_type == FileType::Unknown {
            object.set_flags(ObjectFlags::NOT_EVALUATED);
        }
        if remote.file_id.is_complete() {
            object.set_flags(ObjectFlags::HELD_IN_SERVICE);
        }
    }

    volume.stats().entry_created();
    trace!(
        name = %remote.file_name,
        fid = %remote.file_id,
        created,
        file_type = ?file_type,
        "init dir entry"
    );
    Arc::new(DirectoryEntry::new(
        object,
        Arc::downgrade(parent),
        &remote.file_name,
        remote.short_name.as_deref(),
        target_name,
        file_index,
        DirEntryFlags::VALID,
    ))
}

/// Touches every entry named in `listing`, creating the missing ones.
fn apply_listing(
    volume: &Arc<Volume>,
    directory: &Arc<ObjectInfo>,
    nodes: &mut DirectoryNodes,
    listing: &[RemoteEntry],
) -> usize {
    let mut created = 0;
    for remote in listing {
        if remote.file_name.is_empty() || remote.file_name == "." || remote.file_name == ".." {
            continue;
        }
        if let Some(existing) = nodes.lookup_case_sensitive(&remote.file_name) {
            let object = existing.object();
            if object.file_id() == remote.file_id {
                existing.set_flags(DirEntryFlags::VALID);
                if object.data_version() != remote.data_version {
                    object.mark_verify();
                }
                if let Some(target) = remote.target_name.as_deref().filter(|t| !t.is_empty()) {
                    let changed = existing
                        .target_name()
                        .map(|current| !names_equal_ignore_case(&current, target))
                        .unwrap_or(true);
                    if changed {
                        existing.set_target_name(Some(target.to_string()));
                    }
                }
                continue;
            }
            debug!(
                name = %remote.file_name,
                old = %object.file_id(),
                new = %remote.file_id,
                "name now refers to another object"
            );
            existing.clear_flags(DirEntryFlags::VALID);
            nodes.remove_name_entry(&existing);
        }
        let file_index = nodes.next_file_index();
        let entry = init_dir_entry(volume, directory, remote, file_index);
        nodes.insert(&entry, true);
        created += 1;
    }
    created
}

/// Removes every non-fake entry not marked Valid.
///
/// Unreferenced entries are unlinked and returned for freeing; referenced
/// ones are flagged Deleted and dropped from the name indexes only.
fn sweep(nodes: &mut DirectoryNodes) -> Vec<Arc<DirectoryEntry>> {
    let stale: Vec<Arc<DirectoryEntry>> = nodes
        .entries()
        .filter(|e| !e.is_fake() && !e.is_valid())
        .cloned()
        .collect();
    let mut freed = Vec::new();
    for entry in stale {
        nodes.remove_name_entry(&entry);
        if entry.open_reference_count() == 0 {
            if nodes.remove_from_list(&entry) {
                freed.push(entry);
            }
        } else {
            entry.set_flags(DirEntryFlags::DELETED);
            debug!(name = entry.file_name(), open = entry.open_reference_count(), "entry deleted while open");
        }
    }
    debug_assert!(nodes.check_node_count(), "directory node count mismatch after sweep");
    freed
}

fn volume_of(object: &ObjectInfo) -> Result<Arc<Volume>> {
    object
        .volume()
        .ok_or_else(|| CacheError::device_not_ready(format!("volume of {} torn down", object.file_id())))
}

/// Walks `child`'s parent chain looking for `parent`.
pub fn is_child_of_parent(parent: &ObjectInfo, child: &ObjectInfo) -> bool {
    let mut current = child.parent();
    while let Some(object) = current {
        if std::ptr::eq(Arc::as_ptr(&object), parent) {
            return true;
        }
        current = object.parent();
    }
    false
}

/// A directory is empty for delete when every entry is fake or already deleted.
pub fn is_directory_empty_for_delete(directory: &ObjectInfo) -> bool {
    directory.directory().read().is_empty_for_delete()
}

impl CacheContext {
    /// Mark-and-sweep re-validation of `directory` against a fresh listing.
    pub fn validate_directory_cache(
        &self,
        directory: &Arc<ObjectInfo>,
        auth_group: &AuthGroup,
    ) -> Result<()> {
        let volume = volume_of(directory)?;
        let listing = self
            .authority
            .verify_directory_content(&directory.file_id(), auth_group)?;
        self.stats.remote_fetch();

        let freed = {
            let mut nodes = directory.directory().write();
            for entry in nodes.entries() {
                if !entry.is_fake() {
                    entry.clear_flags(DirEntryFlags::VALID);
                }
            }
            let created = apply_listing(&volume, directory, &mut nodes, &listing);
            let freed = sweep(&mut nodes);
            debug!(
                dir = %directory.file_id(),
                listed = listing.len(),
                created,
                freed = freed.len(),
                remaining = nodes.node_count(),
                "validated directory cache"
            );
            freed
        };
        self.stats.sweep();
        directory.set_flags(ObjectFlags::DIRECTORY_ENUMERATED);
        for entry in &freed {
            free_entry(entry);
        }
        Ok(())
    }

    /// First population of `directory`; a no-op once it is enumerated.
    pub fn enumerate_directory(&self, directory: &Arc<ObjectInfo>, auth_group: &AuthGroup) -> Result<()> {
        self.enumerate_with(directory, auth_group, false)
    }

    fn enumerate_with(
        &self,
        directory: &Arc<ObjectInfo>,
        auth_group: &AuthGroup,
        full_refresh: bool,
    ) -> Result<()> {
        if directory.has_flags(ObjectFlags::DIRECTORY_ENUMERATED) {
            return Ok(());
        }
        let volume = volume_of(directory)?;
        let fcb = directory.fcb();
        if let Some(fcb) = &fcb {
            fcb.set_enumeration_event();
        }
        let listing = self
            .authority
            .enumerate_directory(&directory.file_id(), auth_group, full_refresh);
        if let Some(fcb) = &fcb {
            fcb.clear_enumeration_event();
        }
        let listing = listing?;
        self.stats.remote_fetch();

        let mut nodes = directory.directory().write();
        if directory.has_flags(ObjectFlags::DIRECTORY_ENUMERATED) {
            return Ok(());
        }
        let created = apply_listing(&volume, directory, &mut nodes, &listing);
        directory.set_flags(ObjectFlags::DIRECTORY_ENUMERATED);
        debug!(dir = %directory.file_id(), created, full_refresh, "enumerated directory");
        Ok(())
    }

    /// Populates the global root with one entry per share.
    ///
    /// A failed enumeration leaves the global root reset, so the next
    /// attempt starts from an empty listing.
    pub fn enumerate_global_root(&self, auth_group: &AuthGroup) -> Result<()> {
        let root = self.global_root.root();
        match self.enumerate_with(root, auth_group, true) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "global root enumeration failed");
                self.reset_directory_content(root);
                Err(e)
            }
        }
    }

    /// Drops every non-fake entry of `directory` and clears its enumerated state.
    pub fn reset_directory_content(&self, directory: &Arc<ObjectInfo>) {
        let freed = {
            let mut nodes = directory.directory().write();
            for entry in nodes.entries() {
                if !entry.is_fake() {
                    entry.clear_flags(DirEntryFlags::VALID);
                }
            }
            sweep(&mut nodes)
        };
        directory.clear_flags(ObjectFlags::DIRECTORY_ENUMERATED);
        debug!(dir = %directory.file_id(), freed = freed.len(), "reset directory content");
        for entry in &freed {
            free_entry(entry);
        }
    }

    /// Entries of `directory` a caller may list, in enumeration order.
    pub fn list_directory(&self, directory: &ObjectInfo) -> Vec<Arc<DirectoryEntry>> {
        directory
            .directory()
            .read()
            .entries()
            .filter(|e| !e.is_deleted())
            .cloned()
            .collect()
    }

    /// Why a symlink that failed to evaluate cannot be followed.
    ///
    /// If the link's name is still present under `parent` access is
    /// refused; otherwise the name is simply gone.
    pub fn check_symlink_access(&self, parent: &ObjectInfo, name: &str) -> CacheError {
        let found = parent.directory().read().lookup(name).is_some();
        if found {
            CacheError::AccessDenied {
                what: name.to_string(),
            }
        } else {
            CacheError::not_found(name)
        }
    }

    /// Deletes `entry` locally: it disappears from name lookups at once
    /// and is freed when its last open reference is released.
    pub fn delete_directory_entry(&self, entry: &Arc<DirectoryEntry>) -> Result<()> {
        let parent = entry
            .parent()
            .ok_or_else(|| CacheError::invalid_parameter("entry has no parent directory"))?;
        let unlinked = {
            let mut nodes = parent.directory().write();
            if entry.is_deleted() {
                return Err(CacheError::not_found(entry.file_name()));
            }
            entry.set_flags(DirEntryFlags::DELETED);
            entry.clear_flags(DirEntryFlags::VALID);
            nodes.remove_name_entry(entry);
            entry.open_reference_count() == 0 && nodes.remove_from_list(entry)
        };
        self.notify(
            entry.object(),
            NotifyFilter::name_for(entry.object().file_type()),
            NotifyAction::Removed,
        );
        if unlinked {
            free_entry(entry);
        }
        Ok(())
    }

    /// Drops an open reference taken on `entry`.
    pub fn release_directory_entry(&self, entry: &Arc<DirectoryEntry>) {
        release_directory_entry(entry);
    }

    /// The control entry of `directory`, created on first use.
    ///
    /// Its object is private to the entry: it is neither registered in the
    /// volume nor counted against the directory.
    pub fn init_pioctl_entry(&self, directory: &Arc<ObjectInfo>) -> Result<Arc<DirectoryEntry>> {
        let volume = volume_of(directory)?;
        let mut nodes = directory.directory().write();
        if let Some(entry) = nodes.pioctl() {
            return Ok(Arc::clone(entry));
        }
        let object = Arc::new(ObjectInfo::new(
            FileId::default(),
            Arc::downgrade(&volume),
            Arc::downgrade(directory),
        ));
        object.update_meta(|meta| {
            meta.file_type = FileType::PIOCtl;
            meta.file_attributes = FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM;
            meta.expiration = u64::MAX;
        });
        object.reference();
        let entry = Arc::new(DirectoryEntry::new(
            object,
            Arc::downgrade(directory),
            PIOCTL_NAME,
            None,
            None,
            FILE_INDEX_PIOCTL,
            DirEntryFlags::FAKE | DirEntryFlags::VALID,
        ));
        nodes.set_pioctl(Arc::clone(&entry));
        trace!(dir = %directory.file_id(), "created pioctl entry");
        Ok(entry)
    }
}
