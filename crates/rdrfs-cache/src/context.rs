//! The cache context: every registry, collaborator and synthetic entry the
//! redirector core works against, constructed once and shared by callers.

use crate::collaborator::{
    AuthGroup, ChangeEvent, ChangeNotifier, ContentCache, NotifyAction, NotifyFilter,
    RemoteAuthority, RemoteEntry,
};
use crate::config::CacheConfig;
use crate::dir_cache::{release_directory_entry, DirectoryNodes};
use crate::dir_entry::{DirEntryFlags, DirectoryEntry, FILE_INDEX_DOT, FILE_INDEX_DOT_DOT};
use crate::error::{CacheError, Result};
use crate::event::WorkCounter;
use crate::fcb::{Fcb, FcbKind, FileSizes};
use crate::fid::FileId;
use crate::name_array::NameArray;
use crate::object_info::{FileType, ObjectInfo, FILE_ATTRIBUTE_DIRECTORY};
use crate::volume::{Volume, VolumeFlags, VolumeRef, VolumeRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Identity of the synthetic volume listing every share.
pub const GLOBAL_ROOT_FID: FileId = FileId::volume_root(0, 0);

/// Administrative share names answered without asking the remote authority.
pub const SPECIAL_SHARE_NAMES: [&str; 3] = ["PIPE\\srvsvc", "PIPE\\wkssvc", "IPC$"];

#[derive(Debug, Default)]
pub struct CacheStats {
    objects_allocated: AtomicU64,
    objects_freed: AtomicU64,
    entries_created: AtomicU64,
    entries_freed: AtomicU64,
    validations: AtomicU64,
    fast_path_hits: AtomicU64,
    remote_fetches: AtomicU64,
    invalidations: AtomicU64,
    sweeps: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub objects_allocated: u64,
    pub objects_freed: u64,
    pub entries_created: u64,
    pub entries_freed: u64,
    pub validations: u64,
    pub fast_path_hits: u64,
    pub remote_fetches: u64,
    pub invalidations: u64,
    pub sweeps: u64,
}

impl CacheStats {
    pub(crate) fn object_allocated(&self) {
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn object_freed(&self) {
        self.objects_freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn entry_created(&self) {
        self.entries_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn entry_freed(&self) {
        self.entries_freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn validation(&self) {
        self.validations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fast_path_hit(&self) {
        self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remote_fetch(&self) {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            objects_allocated: self.objects_allocated.load(Ordering::Relaxed),
            objects_freed: self.objects_freed.load(Ordering::Relaxed),
            entries_created: self.entries_created.load(Ordering::Relaxed),
            entries_freed: self.entries_freed.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            remote_fetches: self.remote_fetches.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// An open handle on a directory entry.
///
/// Holds an open reference on the entry and one handle count on the
/// object's [`Fcb`]; both are dropped with the handle.
pub struct FileHandle {
    entry: Arc<DirectoryEntry>,
    fcb: Arc<Fcb>,
}

impl FileHandle {
    pub fn entry(&self) -> &Arc<DirectoryEntry> {
        &self.entry
    }

    pub fn fcb(&self) -> &Arc<Fcb> {
        &self.fcb
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.entry.file_name())
            .field("file_id", &self.fcb.file_id())
            .finish()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        {
            let mut slot = self.entry.object().fcb_slot().lock();
            if self.fcb.close_handle() == 0
                && slot.as_ref().map(|f| Arc::ptr_eq(f, &self.fcb)).unwrap_or(false)
            {
                *slot = None;
            }
        }
        release_directory_entry(&self.entry);
    }
}

pub struct CacheContext {
    pub(crate) config: CacheConfig,
    pub(crate) volumes: VolumeRegistry,
    pub(crate) global_root: Arc<Volume>,
    global_dot: Arc<DirectoryEntry>,
    global_dot_dot: Arc<DirectoryEntry>,
    special_shares: DirectoryNodes,
    pub(crate) authority: Arc<dyn RemoteAuthority>,
    pub(crate) content: Arc<dyn ContentCache>,
    pub(crate) notifier: Arc<dyn ChangeNotifier>,
    queued_releases: WorkCounter,
    pub(crate) stats: Arc<CacheStats>,
}

impl CacheContext {
    pub fn new(
        config: CacheConfig,
        authority: Arc<dyn RemoteAuthority>,
        content: Arc<dyn ContentCache>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(CacheStats::default());

        let root_meta = RemoteEntry {
            file_id: GLOBAL_ROOT_FID,
            file_type: FileType::Directory,
            file_attributes: FILE_ATTRIBUTE_DIRECTORY,
            expiration: u64::MAX,
            ..Default::default()
        };
        let global_root = Volume::new(
            GLOBAL_ROOT_FID,
            &config.server_name,
            &root_meta,
            VolumeFlags::ACTIVE_GLOBAL_ROOT,
            Arc::clone(&authority),
            Arc::clone(&stats),
        );
        let volumes = VolumeRegistry::new();
        drop(volumes.insert(Arc::clone(&global_root)));

        let root = global_root.root();
        let fixed = DirEntryFlags::FAKE | DirEntryFlags::VALID;
        let global_dot = fake_entry(root, ".", FILE_INDEX_DOT, fixed);
        let global_dot_dot = fake_entry(root, "..", FILE_INDEX_DOT_DOT, fixed);

        let mut special_shares = DirectoryNodes::new();
        if config.special_shares_enabled {
            let mut tree = global_root.objects().write();
            for name in SPECIAL_SHARE_NAMES {
                let object = global_root.allocate_object_info(&mut tree, root, FileId::default(), 0);
                object.update_meta(|meta| {
                    meta.file_type = FileType::SpecialShareName;
                    meta.expiration = u64::MAX;
                });
                object.reference();
                let file_index = special_shares.next_file_index();
                let entry = Arc::new(DirectoryEntry::new(
                    object,
                    Arc::downgrade(root),
                    name,
                    None,
                    None,
                    file_index,
                    fixed,
                ));
                special_shares.insert(&entry, true);
            }
        }

        info!(
            server = %config.server_name,
            special_shares = special_shares.len(),
            "cache context initialized"
        );
        Ok(CacheContext {
            config,
            volumes,
            global_root,
            global_dot,
            global_dot_dot,
            special_shares,
            authority,
            content,
            notifier,
            queued_releases: WorkCounter::new(),
            stats,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn volumes(&self) -> &VolumeRegistry {
        &self.volumes
    }

    pub fn global_root(&self) -> &Arc<Volume> {
        &self.global_root
    }

    /// The fixed `.` and `..` entries of the global root.
    pub fn global_dot_entries(&self) -> [&Arc<DirectoryEntry>; 2] {
        [&self.global_dot, &self.global_dot_dot]
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// A name array sized by the configured depth bound.
    pub fn new_name_array(&self, root: Option<&Arc<DirectoryEntry>>) -> NameArray {
        self.init_name_array(root, 0)
    }

    /// A name array of `capacity` elements, 0 meaning the configured length.
    pub fn init_name_array(&self, root: Option<&Arc<DirectoryEntry>>, capacity: usize) -> NameArray {
        let capacity = match capacity {
            0 => self.config.name_array_length,
            n => n,
        };
        NameArray::init(root, capacity)
    }

    /// Looks up a special share by case-insensitive name.
    pub fn lookup_special_share(&self, name: &str) -> Option<Arc<DirectoryEntry>> {
        if !self.config.special_shares_enabled {
            return None;
        }
        self.special_shares.lookup_case_insensitive(name)
    }

    /// Locates the volume rooted at `volume_fid`, building it on first use.
    pub fn mount_volume(&self, volume_fid: FileId, auth_group: &AuthGroup) -> Result<VolumeRef> {
        let volume_fid = volume_fid.to_volume_root();
        if let Some(volume) = self.volumes.locate(volume_fid.high_index()) {
            return Ok(volume);
        }
        if volume_fid.high_index() == GLOBAL_ROOT_FID.high_index() {
            return Err(CacheError::invalid_parameter("the global root is not mountable"));
        }

        let root_meta = self
            .authority
            .evaluate_target_by_id(&volume_fid, None, auth_group, false)?;
        self.stats.remote_fetch();
        if !root_meta.file_type.is_directory() {
            warn!(volume = %volume_fid, file_type = ?root_meta.file_type, "volume root is not a directory");
            return Err(CacheError::not_found(format!("volume root {}", volume_fid)));
        }
        let volume = Volume::new(
            volume_fid,
            "\\",
            &root_meta,
            VolumeFlags::empty(),
            Arc::clone(&self.authority),
            Arc::clone(&self.stats),
        );
        let registered = self.volumes.insert(Arc::clone(&volume));
        if Arc::ptr_eq(registered.arc(), &volume) {
            debug!(volume = %volume_fid, data_version = root_meta.data_version, "mounted volume");
        }
        Ok(registered)
    }

    pub fn release_volume(&self, volume: VolumeRef) {
        trace!(volume = %volume.volume_id(), count = volume.reference_count(), "release volume");
        drop(volume);
    }

    /// Unlinks a volume nothing references and tears its tree down.
    pub fn remove_volume(&self, high_index: u64) -> bool {
        if high_index == GLOBAL_ROOT_FID.high_index() {
            return false;
        }
        match self.volumes.remove_unreferenced(high_index) {
            Some(volume) => {
                let objects = teardown_volume(&volume);
                debug!(volume = %volume.volume_id(), objects, "removed volume");
                true
            }
            None => false,
        }
    }

    /// Tears down every volume, global root included.
    pub fn shutdown(&self) {
        self.wait_on_queued_releases();
        for volume in self.volumes.drain() {
            let objects = teardown_volume(&volume);
            debug!(volume = %volume.volume_id(), objects, "volume torn down");
        }
        info!(stats = ?self.stats.snapshot(), "cache context shut down");
    }

    /// Opens `entry`, creating the object's [`Fcb`] on first open.
    pub fn open(&self, entry: &Arc<DirectoryEntry>) -> Result<FileHandle> {
        let object = entry.object();
        if entry.is_deleted() || object.freshness().is_untrusted() {
            return Err(CacheError::not_found(entry.file_name()));
        }
        if object.volume().map(|v| v.is_offline()).unwrap_or(true) {
            return Err(CacheError::device_not_ready(format!(
                "volume of {} is unavailable",
                object.file_id()
            )));
        }
        let fcb = {
            let mut slot = object.fcb_slot().lock();
            let fcb = slot.get_or_insert_with(|| {
                let meta = object.meta();
                Arc::new(Fcb::new(
                    object.file_id(),
                    FcbKind::for_type(meta.file_type),
                    FileSizes {
                        allocation_size: meta.allocation_size,
                        file_size: meta.end_of_file,
                        valid_data_length: meta.end_of_file,
                    },
                ))
            });
            fcb.open_handle();
            Arc::clone(fcb)
        };
        entry.reference();
        trace!(fid = %object.file_id(), handles = fcb.open_handles(), "opened");
        Ok(FileHandle {
            entry: Arc::clone(entry),
            fcb,
        })
    }

    pub fn close(&self, handle: FileHandle) {
        trace!(fid = %handle.fcb.file_id(), "close");
        drop(handle);
    }

    pub fn begin_release(&self) -> usize {
        self.queued_releases.begin()
    }

    pub fn end_release(&self) -> usize {
        self.queued_releases.end()
    }

    /// Blocks until every release bracketed by `begin_release`/`end_release` finished.
    pub fn wait_on_queued_releases(&self) {
        self.queued_releases.wait_idle();
    }

    /// Reports a change to `object` against the watchers of its parent.
    pub(crate) fn notify(&self, object: &ObjectInfo, filter: NotifyFilter, action: NotifyAction) {
        let directory = object
            .parent()
            .map(|p| p.file_id())
            .unwrap_or_else(|| object.file_id());
        self.notifier.notify(&ChangeEvent {
            directory,
            object: object.file_id(),
            filter,
            action,
        });
    }
}

fn fake_entry(
    root: &Arc<ObjectInfo>,
    name: &str,
    file_index: u64,
    flags: DirEntryFlags,
) -> Arc<DirectoryEntry> {
    root.reference();
    Arc::new(DirectoryEntry::new(
        Arc::clone(root),
        Weak::new(),
        name,
        None,
        None,
        file_index,
        flags,
    ))
}

fn teardown_volume(volume: &Volume) -> usize {
    let objects = volume.objects().read().objects().cloned().collect::<Vec<_>>();
    for object in objects.iter().chain(std::iter::once(volume.root())) {
        object.directory().write().drain();
    }
    volume.clear_objects()
}
