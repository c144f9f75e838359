//! Common fixtures for rdrfs-cache integration tests.
#![allow(dead_code)]

use parking_lot::Mutex;
use rdrfs_cache::{
    AuthGroup, CacheConfig, CacheContext, CacheError, ChangeEvent, ChangeNotifier, ContentCache,
    Fcb, FileId, FileType, MemoryAuthority, NameArray, RemoteEntry, ResolveFlags, Result,
    GLOBAL_ROOT_FID,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const CELL: FileId = FileId::volume_root(1, 7);
pub const OTHER: FileId = FileId::volume_root(1, 8);

pub const CELL_SHARE: FileId = FileId::new(0, 0, 2, 1);
pub const OTHER_SHARE: FileId = FileId::new(0, 0, 3, 1);

pub const A_TXT: FileId = FileId::new(1, 7, 5, 1);
pub const DIR: FileId = FileId::new(1, 7, 6, 1);
pub const SYS_DIR: FileId = FileId::new(1, 7, 7, 1);
pub const B_TXT: FileId = FileId::new(1, 7, 9, 1);
pub const REL_LINK: FileId = FileId::new(1, 7, 10, 1);
pub const UP_LINK: FileId = FileId::new(1, 7, 12, 1);
pub const UNC_LINK: FileId = FileId::new(1, 7, 13, 1);
pub const LOOP_LINK: FileId = FileId::new(1, 7, 14, 1);
pub const DFS_LINK: FileId = FileId::new(1, 7, 15, 1);
pub const MNT: FileId = FileId::new(1, 7, 16, 1);
pub const C_TXT: FileId = FileId::new(1, 8, 5, 1);

/// Content cache that counts every call.
#[derive(Debug, Default)]
pub struct RecordingContentCache {
    flushes: AtomicUsize,
    purges: AtomicUsize,
    tear_downs: AtomicUsize,
    fail_flush: AtomicBool,
}

impl RecordingContentCache {
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::Acquire)
    }

    pub fn tear_downs(&self) -> usize {
        self.tear_downs.load(Ordering::Acquire)
    }

    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::Release);
    }
}

impl ContentCache for RecordingContentCache {
    fn flush(&self, _fcb: &Fcb) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::AcqRel);
        if self.fail_flush.load(Ordering::Acquire) {
            return Err(CacheError::device_not_ready("flush target gone"));
        }
        Ok(())
    }

    fn purge(&self, _fcb: &Fcb) -> Result<()> {
        self.purges.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn flush_extents(&self, _fcb: &Fcb) {}

    fn tear_down_extents(&self, _fcb: &Fcb) {
        self.tear_downs.fetch_add(1, Ordering::AcqRel);
    }
}

/// Notifier that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, object: FileId) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.object == object)
            .copied()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn notify(&self, event: &ChangeEvent) {
        self.events.lock().push(*event);
    }
}

pub fn entry(fid: FileId, name: &str, file_type: FileType) -> RemoteEntry {
    RemoteEntry {
        file_id: fid,
        file_type,
        file_name: name.to_string(),
        data_version: 1,
        ..Default::default()
    }
}

pub fn link(fid: FileId, name: &str, file_type: FileType, target: &str) -> RemoteEntry {
    RemoteEntry {
        target_name: Some(target.to_string()),
        ..entry(fid, name, file_type)
    }
}

pub fn mount_point(fid: FileId, name: &str, target: FileId) -> RemoteEntry {
    RemoteEntry {
        target_file_id: target,
        ..entry(fid, name, FileType::MountPoint)
    }
}

/// Two volumes published as the shares `cell` and `other`.
///
/// ```text
/// \cell            -> volume 1.7
///   a.txt
///   dir\b.txt
///   dir\up         symlink "\a.txt"
///   amd64_win64\
///   rel            symlink "dir"
///   unc            symlink "\\AFS\other\c.txt"
///   loop           symlink "loop"
///   dfs            dfs link "\\fileserver\share"
///   mnt            mount point -> volume 1.8
/// \other           -> volume 1.8
///   c.txt
/// ```
pub fn standard_authority() -> MemoryAuthority {
    let authority = MemoryAuthority::new();
    authority.insert(mount_point(CELL_SHARE, "cell", CELL), Some(GLOBAL_ROOT_FID));
    authority.insert(mount_point(OTHER_SHARE, "other", OTHER), Some(GLOBAL_ROOT_FID));

    authority.insert(entry(CELL, "", FileType::Directory), None);
    authority.insert(
        RemoteEntry {
            end_of_file: 100,
            allocation_size: 4096,
            ..entry(A_TXT, "a.txt", FileType::File)
        },
        Some(CELL),
    );
    authority.insert(entry(DIR, "dir", FileType::Directory), Some(CELL));
    authority.insert(entry(B_TXT, "b.txt", FileType::File), Some(DIR));
    authority.insert(link(UP_LINK, "up", FileType::SymLink, "\\a.txt"), Some(DIR));
    authority.insert(entry(SYS_DIR, "amd64_win64", FileType::Directory), Some(CELL));
    authority.insert(link(REL_LINK, "rel", FileType::SymLink, "dir"), Some(CELL));
    authority.insert(
        link(UNC_LINK, "unc", FileType::SymLink, "\\\\AFS\\other\\c.txt"),
        Some(CELL),
    );
    authority.insert(link(LOOP_LINK, "loop", FileType::SymLink, "loop"), Some(CELL));
    authority.insert(
        link(DFS_LINK, "dfs", FileType::DfsLink, "\\\\fileserver\\share"),
        Some(CELL),
    );
    authority.insert(mount_point(MNT, "mnt", OTHER), Some(CELL));

    authority.insert(entry(OTHER, "", FileType::Directory), None);
    authority.insert(entry(C_TXT, "c.txt", FileType::File), Some(OTHER));
    authority
}

pub struct Fixture {
    pub authority: Arc<MemoryAuthority>,
    pub content: Arc<RecordingContentCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: CacheContext,
}

impl Fixture {
    pub fn new(authority: MemoryAuthority) -> Self {
        Self::with_config(authority, CacheConfig::default())
    }

    pub fn standard() -> Self {
        Self::new(standard_authority())
    }

    pub fn with_config(authority: MemoryAuthority, config: CacheConfig) -> Self {
        let authority = Arc::new(authority);
        let content = Arc::new(RecordingContentCache::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = CacheContext::new(
            config,
            authority.clone(),
            content.clone(),
            notifier.clone(),
        )
        .expect("valid config");
        Fixture {
            authority,
            content,
            notifier,
            ctx,
        }
    }

    pub fn resolve_with(&self, path: &str, flags: ResolveFlags) -> Result<(NameArray, FileId)> {
        let mut names = self.ctx.new_name_array(None);
        let entry = self
            .ctx
            .locate_name_entry(path, &mut names, flags, &AuthGroup::nil())?;
        let fid = entry.object().file_id();
        Ok((names, fid))
    }

    /// Resolves `path` following every link; returns the final object's identity.
    pub fn resolve(&self, path: &str) -> Result<FileId> {
        self.resolve_with(path, ResolveFlags::default())
            .map(|(_, fid)| fid)
    }
}
