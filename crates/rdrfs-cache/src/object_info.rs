//! Per-object cache records.
//!
//! An [`ObjectInfo`] mirrors one remote object inside a volume. Its metadata
//! sits behind a reader/writer lock, its lifecycle flags and reference count
//! are atomics, and it owns the directory content when the object is a
//! directory. The owning volume and the parent are weak back-references; a
//! parent's reference count is bumped explicitly when a child is allocated.

use crate::collaborator::RemoteEntry;
use crate::dir_cache::DirectoryNodes;
use crate::dir_entry::DirectoryEntry;
use crate::fcb::Fcb;
use crate::fid::FileId;
use crate::list::{EntryList, ListHandle};
use crate::volume::Volume;
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x0000_0004;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;

/// Sentinel forcing the next comparison against the remote version to differ.
pub const DATA_VERSION_INVALID: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    MountPoint,
    SymLink,
    DfsLink,
    #[default]
    Unknown,
    Invalid,
    SpecialShareName,
    PIOCtl,
}

impl FileType {
    /// Mount points, symlinks and DFS links resolve to some other object.
    pub fn is_reparse(&self) -> bool {
        matches!(
            self,
            FileType::MountPoint | FileType::SymLink | FileType::DfsLink
        )
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ObjectFlags: u32 {
        const NOT_EVALUATED          = 0x0000_0001;
        const VERIFY                 = 0x0000_0002;
        const VERIFY_DATA            = 0x0000_0004;
        const DELETED                = 0x0000_0008;
        const OBJECT_INVALID         = 0x0000_0010;
        const DIRECTORY_ENUMERATED   = 0x0000_0020;
        const INSERTED_HASH_TREE     = 0x0000_0040;
        const INSERTED_VOLUME_LIST   = 0x0000_0080;
        const HELD_IN_SERVICE        = 0x0000_0100;
    }
}

/// Freshness of cached metadata, derived from the flag bits with their precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Freshness {
    Unevaluated,
    Fresh,
    NeedsMetadataVerify,
    NeedsDataVerify,
    Deleted,
    Invalid,
}

impl Freshness {
    pub fn from_flags(flags: ObjectFlags) -> Self {
        if flags.contains(ObjectFlags::OBJECT_INVALID) {
            Freshness::Invalid
        } else if flags.contains(ObjectFlags::DELETED) {
            Freshness::Deleted
        } else if flags.contains(ObjectFlags::VERIFY_DATA) {
            Freshness::NeedsDataVerify
        } else if flags.contains(ObjectFlags::VERIFY) {
            Freshness::NeedsMetadataVerify
        } else if flags.contains(ObjectFlags::NOT_EVALUATED) {
            Freshness::Unevaluated
        } else {
            Freshness::Fresh
        }
    }

    /// The object must not be trusted regardless of any other state.
    pub fn is_untrusted(&self) -> bool {
        matches!(self, Freshness::Deleted | Freshness::Invalid)
    }
}

/// Milliseconds since the Unix epoch; expirations are absolute in this unit.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cached remote metadata for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub target_file_id: FileId,
    pub file_type: FileType,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_write_time: i64,
    pub change_time: i64,
    pub end_of_file: i64,
    pub allocation_size: i64,
    pub file_attributes: u32,
    pub ea_size: u32,
    pub links: u32,
    pub data_version: u64,
    pub expiration: u64,
}

impl ObjectMeta {
    /// Takes every field from a remote snapshot; reparse objects gain the reparse attribute.
    pub(crate) fn apply_remote(&mut self, remote: &RemoteEntry) {
        self.target_file_id = remote.target_file_id;
        self.expiration = remote.expiration;
        self.data_version = remote.data_version;
        self.file_type = remote.file_type;
        self.creation_time = remote.creation_time;
        self.last_access_time = remote.last_access_time;
        self.last_write_time = remote.last_write_time;
        self.change_time = remote.change_time;
        self.end_of_file = remote.end_of_file;
        self.allocation_size = remote.allocation_size;
        self.file_attributes = remote.file_attributes;
        if remote.file_type.is_reparse() {
            self.file_attributes |= FILE_ATTRIBUTE_REPARSE_POINT;
        }
        self.ea_size = remote.ea_size;
        self.links = remote.links;
    }
}

pub struct ObjectInfo {
    file_id: FileId,
    volume: Weak<Volume>,
    parent: Weak<ObjectInfo>,
    meta: RwLock<ObjectMeta>,
    flags: AtomicU32,
    reference_count: AtomicI64,
    directory: RwLock<DirectoryNodes>,
    fcb: Mutex<Option<Arc<Fcb>>>,
    list_handle: Mutex<Option<ListHandle>>,
    created: Instant,
}

impl ObjectInfo {
    pub(crate) fn new(file_id: FileId, volume: Weak<Volume>, parent: Weak<ObjectInfo>) -> Self {
        ObjectInfo {
            file_id,
            volume,
            parent,
            meta: RwLock::new(ObjectMeta::default()),
            flags: AtomicU32::new(0),
            reference_count: AtomicI64::new(0),
            directory: RwLock::new(DirectoryNodes::new()),
            fcb: Mutex::new(None),
            list_handle: Mutex::new(None),
            created: Instant::now(),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn volume(&self) -> Option<Arc<Volume>> {
        self.volume.upgrade()
    }

    pub fn parent(&self) -> Option<Arc<ObjectInfo>> {
        self.parent.upgrade()
    }

    pub fn has_parent(&self) -> bool {
        self.parent.strong_count() > 0
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn meta(&self) -> ObjectMeta {
        self.meta.read().clone()
    }

    pub fn file_type(&self) -> FileType {
        self.meta.read().file_type
    }

    pub fn data_version(&self) -> u64 {
        self.meta.read().data_version
    }

    pub fn expiration(&self) -> u64 {
        self.meta.read().expiration
    }

    pub fn target_file_id(&self) -> FileId {
        self.meta.read().target_file_id
    }

    pub(crate) fn update_meta<R>(&self, f: impl FnOnce(&mut ObjectMeta) -> R) -> R {
        f(&mut self.meta.write())
    }

    pub(crate) fn directory(&self) -> &RwLock<DirectoryNodes> {
        &self.directory
    }

    /// Looks `name` up in the cached directory content.
    pub fn lookup_child(&self, name: &str) -> Option<Arc<DirectoryEntry>> {
        self.directory.read().lookup(name)
    }

    /// Number of real entries in the cached directory content.
    pub fn child_count(&self) -> usize {
        self.directory.read().node_count()
    }

    pub(crate) fn list_handle(&self) -> &Mutex<Option<ListHandle>> {
        &self.list_handle
    }

    pub fn fcb(&self) -> Option<Arc<Fcb>> {
        self.fcb.lock().clone()
    }

    pub(crate) fn fcb_slot(&self) -> &Mutex<Option<Arc<Fcb>>> {
        &self.fcb
    }

    // flags

    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub fn has_flags(&self, flags: ObjectFlags) -> bool {
        self.flags().contains(flags)
    }

    pub(crate) fn set_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn freshness(&self) -> Freshness {
        Freshness::from_flags(self.flags())
    }

    pub fn mark_verify(&self) {
        self.set_flags(ObjectFlags::VERIFY);
    }

    /// Content re-verification always implies metadata re-verification.
    pub fn mark_verify_data(&self) {
        self.set_flags(ObjectFlags::VERIFY | ObjectFlags::VERIFY_DATA);
    }

    pub(crate) fn clear_verify_data(&self) {
        self.clear_flags(ObjectFlags::VERIFY_DATA);
    }

    /// A successful metadata fetch was applied.
    pub(crate) fn complete_verify(&self) {
        self.clear_flags(ObjectFlags::VERIFY | ObjectFlags::NOT_EVALUATED);
    }

    pub fn mark_deleted(&self) {
        self.set_flags(ObjectFlags::DELETED);
    }

    pub fn mark_invalid(&self) {
        self.set_flags(ObjectFlags::OBJECT_INVALID);
    }

    pub fn clear_invalid(&self) {
        self.clear_flags(ObjectFlags::OBJECT_INVALID);
    }

    /// Forces re-evaluation on next access: expiration reset and Verify set.
    pub(crate) fn expire(&self) {
        self.meta.write().expiration = 0;
        self.mark_verify();
    }

    // reference counting

    pub fn reference_count(&self) -> i64 {
        self.reference_count.load(Ordering::Acquire)
    }

    pub(crate) fn reference(&self) -> i64 {
        self.reference_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn dereference(&self) -> i64 {
        let count = self.reference_count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(count >= 0, "object {} reference count underflow", self.file_id);
        count
    }
}

impl fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectInfo")
            .field("file_id", &self.file_id)
            .field("file_type", &self.file_type())
            .field("flags", &self.flags())
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

/// Indexed registry of a volume's objects plus the flat list used by sweeps.
#[derive(Default)]
pub struct ObjectTree {
    pub(crate) index: BTreeMap<u64, Arc<ObjectInfo>>,
    pub(crate) list: EntryList<Arc<ObjectInfo>>,
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, low_index: u64) -> Option<&Arc<ObjectInfo>> {
        self.index.get(&low_index)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<ObjectInfo>> {
        self.list.iter().map(|(_, object)| object)
    }

    pub(crate) fn insert(&mut self, object: &Arc<ObjectInfo>, hash_index: u64) {
        let previous = self.index.insert(hash_index, Arc::clone(object));
        debug_assert!(previous.is_none(), "duplicate object index {:#x}", hash_index);
        let handle = self.list.push_back(Arc::clone(object));
        *object.list_handle().lock() = Some(handle);
        object.set_flags(ObjectFlags::INSERTED_HASH_TREE | ObjectFlags::INSERTED_VOLUME_LIST);
    }

    /// Unlinks `object` according to its inserted flags.
    pub(crate) fn remove(&mut self, object: &ObjectInfo) {
        if object.has_flags(ObjectFlags::INSERTED_HASH_TREE) {
            let removed = self.index.remove(&object.file_id().low_index());
            debug_assert!(removed.is_some(), "object {} missing from index", object.file_id());
            object.clear_flags(ObjectFlags::INSERTED_HASH_TREE);
        }
        if object.has_flags(ObjectFlags::INSERTED_VOLUME_LIST) {
            if let Some(handle) = object.list_handle().lock().take() {
                let removed = self.list.remove(handle);
                debug_assert!(removed.is_some(), "object {} missing from list", object.file_id());
            }
            object.clear_flags(ObjectFlags::INSERTED_VOLUME_LIST);
        }
    }

    pub(crate) fn clear(&mut self) -> Vec<Arc<ObjectInfo>> {
        self.index.clear();
        let objects = self.list.drain();
        for object in &objects {
            object.list_handle().lock().take();
            object.clear_flags(ObjectFlags::INSERTED_HASH_TREE | ObjectFlags::INSERTED_VOLUME_LIST);
        }
        objects
    }
}
