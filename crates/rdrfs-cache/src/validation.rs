//! Re-validation of cached objects against the remote authority.
//!
//! [`CacheContext::validate_entry`] is the access-path check with a
//! lock-free fast path; [`CacheContext::verify_entry`] is the lazy
//! background re-verification. Both apply a fetched snapshot by file
//! type. A failed fetch leaves the object marked Verify so the next
//! access retries.

use crate::collaborator::{AuthGroup, NotifyAction, NotifyFilter, RemoteEntry};
use crate::context::CacheContext;
use crate::dir_entry::DirectoryEntry;
use crate::error::{CacheError, Result};
use crate::fcb::{Fcb, FileSizes};
use crate::hash::names_equal_ignore_case;
use crate::object_info::{now_millis, FileType, ObjectFlags, ObjectInfo};
use crate::path::update_name;
use std::sync::Arc;
use tracing::{debug, trace, warn};

const NEEDS_EVALUATION: ObjectFlags = ObjectFlags::NOT_EVALUATED
    .union(ObjectFlags::VERIFY)
    .union(ObjectFlags::VERIFY_DATA);

/// Objects synthesized locally are never sent to the remote authority.
fn is_local_only(entry: &DirectoryEntry) -> bool {
    entry.is_fake()
        || matches!(
            entry.object().file_type(),
            FileType::SpecialShareName | FileType::PIOCtl
        )
}

impl CacheContext {
    /// Makes `entry`'s object trustworthy for the caller.
    ///
    /// Returns without I/O when no evaluation flag is set and the
    /// expiration lies in the future.
    pub fn validate_entry(
        &self,
        entry: &Arc<DirectoryEntry>,
        auth_group: &AuthGroup,
        purge_content: bool,
        fast_call: bool,
    ) -> Result<()> {
        if is_local_only(entry) {
            return Ok(());
        }
        let object = entry.object();
        let flags = object.flags();
        if flags.contains(ObjectFlags::DELETED) || entry.is_deleted() {
            return Err(CacheError::not_found(entry.file_name()));
        }
        if flags.contains(ObjectFlags::OBJECT_INVALID) {
            return Err(CacheError::device_not_ready(format!(
                "object {} is invalid",
                object.file_id()
            )));
        }
        if !flags.intersects(NEEDS_EVALUATION) && object.expiration() >= now_millis() {
            self.stats.fast_path_hit();
            return Ok(());
        }

        self.stats.validation();
        debug!(
            name = entry.file_name(),
            fid = %object.file_id(),
            flags = ?flags,
            "validating entry"
        );
        let remote = self.fetch(object, auth_group, fast_call)?;
        if flags.contains(ObjectFlags::NOT_EVALUATED) || object.file_type() == FileType::Unknown {
            self.update_meta_data(entry, &remote);
            object.complete_verify();
            return Ok(());
        }
        self.apply_by_type(entry, &remote, auth_group, purge_content)
    }

    /// Lazy re-verification of `entry`'s object.
    ///
    /// An unchanged data version with no pending content verification only
    /// refreshes the metadata.
    pub fn verify_entry(&self, entry: &Arc<DirectoryEntry>, auth_group: &AuthGroup) -> Result<()> {
        if is_local_only(entry) {
            return Ok(());
        }
        let object = entry.object();
        let remote = self.fetch(object, auth_group, false)?;
        if remote.data_version == object.data_version()
            && !object.has_flags(ObjectFlags::VERIFY_DATA)
            && remote.target_file_id == object.target_file_id()
        {
            self.update_meta_data(entry, &remote);
            object.complete_verify();
            trace!(fid = %object.file_id(), "verified unchanged");
            return Ok(());
        }
        self.apply_by_type(entry, &remote, auth_group, false)
    }

    /// First evaluation of an object whose type is not yet known.
    pub fn evaluate_node(&self, entry: &Arc<DirectoryEntry>, auth_group: &AuthGroup) -> Result<()> {
        let object = entry.object();
        let remote = self.fetch(object, auth_group, false)?;
        self.update_meta_data(entry, &remote);
        object.complete_verify();
        debug!(fid = %object.file_id(), file_type = ?remote.file_type, "evaluated node");
        Ok(())
    }

    /// Ensures a symlink entry carries its target name.
    pub fn validate_symlink(&self, entry: &Arc<DirectoryEntry>, auth_group: &AuthGroup) -> Result<()> {
        if entry.target_name().is_none() || entry.object().has_flags(ObjectFlags::NOT_EVALUATED) {
            self.evaluate_node(entry, auth_group)?;
        }
        match entry.object().file_type() {
            FileType::SymLink if entry.target_name().is_some() => Ok(()),
            FileType::SymLink => Err(CacheError::not_found(format!(
                "target of {}",
                entry.file_name()
            ))),
            other => {
                trace!(name = entry.file_name(), file_type = ?other, "no longer a symlink");
                Ok(())
            }
        }
    }

    /// Applies a remote snapshot to the object and the entry's target name.
    pub(crate) fn update_meta_data(&self, entry: &DirectoryEntry, remote: &RemoteEntry) {
        entry.object().update_meta(|meta| meta.apply_remote(remote));
        if let Some(target) = remote.target_name.as_deref().filter(|t| !t.is_empty()) {
            let target = update_name(target);
            let changed = entry
                .target_name()
                .map(|current| !names_equal_ignore_case(&current, &target))
                .unwrap_or(true);
            if changed {
                entry.set_target_name(Some(target));
            }
        }
    }

    fn fetch(&self, object: &ObjectInfo, auth_group: &AuthGroup, fast_call: bool) -> Result<RemoteEntry> {
        let parent_id = object.parent().map(|p| p.file_id());
        let result =
            self.authority
                .evaluate_target_by_id(&object.file_id(), parent_id.as_ref(), auth_group, fast_call);
        self.stats.remote_fetch();
        match result {
            Ok(remote) => {
                object.set_flags(ObjectFlags::HELD_IN_SERVICE);
                Ok(remote)
            }
            Err(e) => {
                object.mark_verify();
                debug!(fid = %object.file_id(), error = %e, "metadata fetch failed");
                Err(e)
            }
        }
    }

    fn apply_by_type(
        &self,
        entry: &Arc<DirectoryEntry>,
        remote: &RemoteEntry,
        auth_group: &AuthGroup,
        purge_content: bool,
    ) -> Result<()> {
        let object = entry.object();
        match object.file_type() {
            FileType::MountPoint => {
                let previous = object.target_file_id();
                self.update_meta_data(entry, remote);
                if previous != remote.target_file_id {
                    debug!(
                        fid = %object.file_id(),
                        old = %previous,
                        new = %remote.target_file_id,
                        "mount point target changed"
                    );
                    self.notify(object, NotifyFilter::ATTRIBUTES, NotifyAction::Modified);
                }
                object.complete_verify();
            }
            FileType::SymLink | FileType::DfsLink => {
                self.update_meta_data(entry, remote);
                object.complete_verify();
            }
            FileType::File => {
                let fcb = object.fcb();
                let data_changed = object.data_version() != remote.data_version
                    || object.has_flags(ObjectFlags::VERIFY_DATA);
                if data_changed {
                    if let Some(fcb) = &fcb {
                        if let Err(e) = self.flush_and_purge(fcb) {
                            fcb.record_flush_error(e.to_string());
                        }
                        if purge_content {
                            self.content.tear_down_extents(fcb);
                        }
                    }
                    object.clear_verify_data();
                }
                self.update_meta_data(entry, remote);
                object.complete_verify();
                if let Some(fcb) = &fcb {
                    let sizes = FileSizes {
                        allocation_size: remote.allocation_size,
                        file_size: remote.end_of_file,
                        valid_data_length: remote.end_of_file,
                    };
                    self.content.set_file_sizes(fcb, &sizes);
                }
            }
            FileType::Directory => {
                if object.data_version() != remote.data_version
                    && object.has_flags(ObjectFlags::DIRECTORY_ENUMERATED)
                {
                    self.validate_directory_cache(object, auth_group)?;
                }
                self.update_meta_data(entry, remote);
                object.complete_verify();
            }
            other => {
                warn!(
                    name = entry.file_name(),
                    fid = %object.file_id(),
                    file_type = ?other,
                    "ignoring validation of unsupported file type"
                );
            }
        }
        Ok(())
    }

    /// Flushes then purges cached content under the file's resource lock.
    ///
    /// Both calls run even if the flush fails; the first error is returned.
    pub(crate) fn flush_and_purge(&self, fcb: &Fcb) -> Result<()> {
        fcb.wait_on_queued_flushes();
        let _resource = fcb.lock_resource();
        let flushed = self.content.flush(fcb);
        let purged = self.content.purge(fcb);
        let result = flushed.and(purged);
        if let Err(e) = &result {
            warn!(fid = %fcb.file_id(), error = %e, "flush/purge of cached content failed");
        }
        result
    }
}
