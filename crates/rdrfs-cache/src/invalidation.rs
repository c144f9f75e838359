//! Invalidations pushed by the remote authority.
//!
//! Nothing here fetches metadata. Objects are only marked so the next
//! access re-evaluates them; cached content is flushed, purged or torn
//! down where the reason requires it.

use crate::collaborator::{NotifyAction, NotifyFilter};
use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::fid::FileId;
use crate::object_info::{FileType, ObjectInfo, DATA_VERSION_INVALID};
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    Deleted,
    Flushed,
    DataVersion,
    Creds,
    Other,
}

impl InvalidationReason {
    /// Content of a file must be re-verified, not just its metadata.
    fn invalidates_data(&self) -> bool {
        matches!(self, InvalidationReason::Flushed | InvalidationReason::DataVersion)
    }

    fn notify_filter(&self, file_type: FileType) -> NotifyFilter {
        match self {
            InvalidationReason::Deleted => NotifyFilter::name_for(file_type),
            InvalidationReason::Creds => NotifyFilter::SECURITY,
            InvalidationReason::Flushed | InvalidationReason::DataVersion
                if file_type == FileType::File =>
            {
                NotifyFilter::SIZE | NotifyFilter::LAST_WRITE
            }
            _ => NotifyFilter::ATTRIBUTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub file_id: FileId,
    #[serde(default)]
    pub whole_volume: bool,
    pub reason: InvalidationReason,
}

impl CacheContext {
    /// Entry point for one pushed invalidation.
    pub fn invalidate_cache(&self, event: &InvalidationEvent) -> Result<()> {
        self.stats.invalidation();
        debug!(
            fid = %event.file_id,
            whole_volume = event.whole_volume,
            reason = ?event.reason,
            "invalidate cache"
        );
        let Some(volume) = self.volumes.locate_starve_exclusive(event.file_id.high_index()) else {
            trace!(fid = %event.file_id, "volume not cached, nothing to invalidate");
            return Ok(());
        };
        if event.whole_volume || event.file_id.is_volume() {
            return self.invalidate_volume(&volume, event.reason);
        }
        let Some(object) = volume.locate_object(event.file_id.low_index()) else {
            trace!(fid = %event.file_id, "object not cached, nothing to invalidate");
            return Ok(());
        };
        self.invalidate_object(&object, event.reason)
    }

    fn invalidate_object(&self, object: &ObjectInfo, reason: InvalidationReason) -> Result<()> {
        let file_type = object.file_type();
        if file_type.is_reparse() {
            trace!(fid = %object.file_id(), "invalidating link object only");
        }

        if reason == InvalidationReason::Deleted {
            object.mark_deleted();
            if let Some(parent) = object.parent() {
                // the parent's listing still holds the name; force a sweep
                parent.update_meta(|meta| meta.data_version = DATA_VERSION_INVALID);
                parent.expire();
            }
            self.notify(object, NotifyFilter::name_for(file_type), NotifyAction::Removed);
            return Ok(());
        }

        let mut flushed = Ok(());
        if file_type == FileType::File && reason.invalidates_data() {
            if let Some(fcb) = object.fcb() {
                flushed = self.flush_and_purge(&fcb);
                if let Err(e) = &flushed {
                    fcb.record_flush_error(e.to_string());
                }
                if reason == InvalidationReason::Flushed {
                    self.content.tear_down_extents(&fcb);
                }
            }
        }
        if reason.invalidates_data() {
            object.update_meta(|meta| meta.data_version = DATA_VERSION_INVALID);
        }

        mark_stale(object, reason);
        self.notify(object, reason.notify_filter(file_type), NotifyAction::Modified);

        match reason {
            InvalidationReason::Flushed => flushed,
            _ => Ok(()),
        }
    }

    /// Applies `reason` to every object of `volume`.
    pub fn invalidate_volume(&self, volume: &Volume, reason: InvalidationReason) -> Result<()> {
        let objects = volume.referenced_objects();
        if reason == InvalidationReason::Deleted {
            volume.set_offline(true);
            for object in objects.iter().map(|o| &**o).chain(std::iter::once(&**volume.root())) {
                object.mark_invalid();
                if let Some(fcb) = object.fcb() {
                    fcb.cancel_extents_request();
                    self.content.tear_down_extents(&fcb);
                }
            }
            info!(volume = %volume.volume_id(), objects = objects.len(), "volume deleted");
            self.notify(volume.root(), NotifyFilter::DIR_NAME, NotifyAction::Removed);
            return Ok(());
        }

        volume.set_dirty(true);
        for object in &objects {
            mark_stale(object, reason);
            self.notify(object, reason.notify_filter(object.file_type()), NotifyAction::Modified);
        }
        mark_stale(volume.root(), reason);
        self.notify(volume.root(), reason.notify_filter(FileType::Directory), NotifyAction::Modified);
        debug!(volume = %volume.volume_id(), objects = objects.len(), reason = ?reason, "volume invalidated");
        Ok(())
    }

    /// Takes a volume offline or brings it back.
    ///
    /// Offline cancels in-flight content fetches of open files, tears their
    /// cached content down and marks every object invalid. Online clears
    /// the invalid mark and forces re-verification of every object.
    pub fn set_volume_state(&self, volume_fid: FileId, online: bool) -> Result<()> {
        let volume = self
            .volumes
            .locate_starve_exclusive(volume_fid.high_index())
            .ok_or_else(|| CacheError::not_found(format!("volume {}", volume_fid)))?;
        let objects = volume.referenced_objects();
        volume.set_offline(!online);
        for object in objects.iter().map(|o| &**o).chain(std::iter::once(&**volume.root())) {
            if online {
                object.clear_invalid();
                object.expire();
            } else {
                if let Some(fcb) = object.fcb().filter(|f| f.is_file()) {
                    fcb.cancel_extents_request();
                    self.content.tear_down_extents(&fcb);
                }
                object.mark_invalid();
            }
        }
        if online {
            volume.set_dirty(false);
        }
        info!(volume = %volume.volume_id(), online, objects = objects.len(), "volume state changed");
        Ok(())
    }

    /// Toggles the global root offline, making every resolution fail fast.
    pub fn set_network_state(&self, online: bool) {
        self.global_root.set_offline(!online);
        info!(online, "network state changed");
    }
}

fn mark_stale(object: &ObjectInfo, reason: InvalidationReason) {
    object.expire();
    if object.file_type() == FileType::File && reason.invalidates_data() {
        object.mark_verify_data();
    }
}
