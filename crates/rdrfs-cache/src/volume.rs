//! Mounted volumes and the registry that indexes them.
//!
//! A [`Volume`] owns its root object and root entry plus the indexed object
//! registry for everything below the root. Lookups through either registry
//! bump the found record's reference count before the index lock is
//! released and hand back a guard ([`VolumeRef`], [`ObjectRef`]) that drops
//! the reference on every exit path.

use crate::collaborator::{RemoteAuthority, RemoteEntry};
use crate::context::CacheStats;
use crate::dir_entry::{DirEntryFlags, DirectoryEntry};
use crate::fid::FileId;
use crate::object_info::{ObjectFlags, ObjectInfo, ObjectTree};
use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VolumeFlags: u32 {
        const OFFLINE            = 0x0000_0001;
        const ACTIVE_GLOBAL_ROOT = 0x0000_0002;
        const DIRTY_INFORMATION  = 0x0000_0004;
    }
}

pub struct Volume {
    volume_id: FileId,
    flags: RwLock<VolumeFlags>,
    reference_count: AtomicI64,
    root: Arc<ObjectInfo>,
    root_entry: Arc<DirectoryEntry>,
    objects: RwLock<ObjectTree>,
    authority: Arc<dyn RemoteAuthority>,
    stats: Arc<CacheStats>,
}

impl Volume {
    pub(crate) fn new(
        volume_id: FileId,
        root_name: &str,
        root_meta: &RemoteEntry,
        flags: VolumeFlags,
        authority: Arc<dyn RemoteAuthority>,
        stats: Arc<CacheStats>,
    ) -> Arc<Self> {
        let entry_flags = if flags.contains(VolumeFlags::ACTIVE_GLOBAL_ROOT) {
            DirEntryFlags::VALID | DirEntryFlags::FAKE
        } else {
            DirEntryFlags::VALID
        };
        Arc::new_cyclic(|weak: &Weak<Volume>| {
            let root = Arc::new(ObjectInfo::new(volume_id, weak.clone(), Weak::new()));
            root.update_meta(|meta| meta.apply_remote(root_meta));
            let root_entry = Arc::new(DirectoryEntry::new(
                Arc::clone(&root),
                Weak::new(),
                root_name,
                None,
                None,
                0,
                entry_flags,
            ));
            root.reference();
            Volume {
                volume_id,
                flags: RwLock::new(flags),
                reference_count: AtomicI64::new(0),
                root,
                root_entry,
                objects: RwLock::new(ObjectTree::new()),
                authority,
                stats,
            }
        })
    }

    pub fn volume_id(&self) -> FileId {
        self.volume_id
    }

    pub fn high_index(&self) -> u64 {
        self.volume_id.high_index()
    }

    pub fn root(&self) -> &Arc<ObjectInfo> {
        &self.root
    }

    pub fn root_entry(&self) -> &Arc<DirectoryEntry> {
        &self.root_entry
    }

    pub(crate) fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub(crate) fn objects(&self) -> &RwLock<ObjectTree> {
        &self.objects
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn flags(&self) -> VolumeFlags {
        *self.flags.read()
    }

    pub fn is_offline(&self) -> bool {
        self.flags().contains(VolumeFlags::OFFLINE)
    }

    pub fn is_global_root(&self) -> bool {
        self.flags().contains(VolumeFlags::ACTIVE_GLOBAL_ROOT)
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        let mut flags = self.flags.write();
        flags.set(VolumeFlags::OFFLINE, offline);
        debug!(volume = %self.volume_id, offline, "volume state");
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.flags.write().set(VolumeFlags::DIRTY_INFORMATION, dirty);
    }

    pub fn reference_count(&self) -> i64 {
        self.reference_count.load(Ordering::Acquire)
    }

    pub(crate) fn reference(&self) -> i64 {
        self.reference_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn dereference(&self) -> i64 {
        let count = self.reference_count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(count >= 0, "volume {} reference count underflow", self.volume_id);
        count
    }

    /// Shared lookup by low index; the result holds a reference.
    pub fn locate_object(&self, low_index: u64) -> Option<ObjectRef> {
        let tree = self.objects.read();
        let object = tree.get(low_index)?;
        object.reference();
        Some(ObjectRef(Arc::clone(object)))
    }

    /// Every registered object, each referenced while the registry is held shared.
    pub(crate) fn referenced_objects(&self) -> Vec<ObjectRef> {
        let tree = self.objects.read();
        tree.objects().map(|o| ObjectRef::new(Arc::clone(o))).collect()
    }

    /// Creates an object below `parent`, inserting it when `hash_index` is non-zero.
    ///
    /// The caller holds the registry exclusively and passes its guard in.
    pub(crate) fn allocate_object_info(
        self: &Arc<Self>,
        tree: &mut ObjectTree,
        parent: &Arc<ObjectInfo>,
        file_id: FileId,
        hash_index: u64,
    ) -> Arc<ObjectInfo> {
        debug_assert!(
            parent
                .volume()
                .map(|v| Arc::ptr_eq(&v, self))
                .unwrap_or(false),
            "parent {} belongs to another volume",
            parent.file_id()
        );
        parent.reference();
        let object = Arc::new(ObjectInfo::new(
            file_id,
            Arc::downgrade(self),
            Arc::downgrade(parent),
        ));
        if hash_index != 0 {
            tree.insert(&object, hash_index);
        }
        self.stats.object_allocated();
        trace!(fid = %file_id, parent = %parent.file_id(), "allocated object info");
        object
    }

    /// Drops one reference and frees the object if that was the last one.
    pub fn release_object(&self, object: &Arc<ObjectInfo>) {
        if object.dereference() == 0 {
            self.delete_object_info(object);
        }
    }

    /// Unlinks and frees `object` if it is still inserted and unreferenced.
    ///
    /// The count is re-checked under the exclusive registry lock, so a
    /// lookup racing with the final release keeps the object alive.
    pub(crate) fn delete_object_info(&self, object: &Arc<ObjectInfo>) -> bool {
        {
            let mut tree = self.objects.write();
            let inserted = object
                .flags()
                .intersects(ObjectFlags::INSERTED_HASH_TREE | ObjectFlags::INSERTED_VOLUME_LIST);
            if object.reference_count() != 0 || !inserted {
                return false;
            }
            tree.remove(object);
        }
        self.finish_free(object);
        true
    }

    fn finish_free(&self, object: &Arc<ObjectInfo>) {
        if object.has_flags(ObjectFlags::HELD_IN_SERVICE) {
            self.authority.release_fid(&object.file_id());
            object.clear_flags(ObjectFlags::HELD_IN_SERVICE);
        }
        self.stats.object_freed();
        trace!(fid = %object.file_id(), "freed object info");
        if let Some(parent) = object.parent() {
            match parent.volume() {
                Some(volume) => volume.release_object(&parent),
                None => {
                    parent.dereference();
                }
            }
        }
    }

    /// Unlinks every object; used when the volume is torn down.
    pub(crate) fn clear_objects(&self) -> usize {
        let objects = self.objects.write().clear();
        for object in &objects {
            if object.has_flags(ObjectFlags::HELD_IN_SERVICE) {
                self.authority.release_fid(&object.file_id());
                object.clear_flags(ObjectFlags::HELD_IN_SERVICE);
            }
        }
        objects.len()
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("volume_id", &self.volume_id)
            .field("flags", &self.flags())
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

/// Counted handle on a volume.
#[derive(Debug)]
pub struct VolumeRef(Arc<Volume>);

impl VolumeRef {
    pub(crate) fn new(volume: Arc<Volume>) -> Self {
        volume.reference();
        VolumeRef(volume)
    }

    pub fn arc(&self) -> &Arc<Volume> {
        &self.0
    }
}

impl Deref for VolumeRef {
    type Target = Volume;

    fn deref(&self) -> &Volume {
        &self.0
    }
}

impl Drop for VolumeRef {
    fn drop(&mut self) {
        self.0.dereference();
    }
}

/// Counted handle on an object; dropping it may free the object.
pub struct ObjectRef(Arc<ObjectInfo>);

impl ObjectRef {
    pub(crate) fn new(object: Arc<ObjectInfo>) -> Self {
        object.reference();
        ObjectRef(object)
    }

    pub fn arc(&self) -> &Arc<ObjectInfo> {
        &self.0
    }
}

impl Deref for ObjectRef {
    type Target = ObjectInfo;

    fn deref(&self) -> &ObjectInfo {
        &self.0
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        match self.0.volume() {
            Some(volume) => volume.release_object(&self.0),
            None => {
                self.0.dereference();
            }
        }
    }
}

/// Registry of mounted volumes keyed by high index.
#[derive(Default)]
pub struct VolumeRegistry {
    tree: RwLock<BTreeMap<u64, Arc<Volume>>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    pub fn locate(&self, high_index: u64) -> Option<VolumeRef> {
        let tree = self.tree.read();
        tree.get(&high_index).map(|v| VolumeRef::new(Arc::clone(v)))
    }

    /// Shared lookup that does not queue behind waiting writers.
    ///
    /// Used on the invalidation path so consistency fixups make progress
    /// while lookups hold the registry shared.
    pub fn locate_starve_exclusive(&self, high_index: u64) -> Option<VolumeRef> {
        let tree = self.tree.read_recursive();
        tree.get(&high_index).map(|v| VolumeRef::new(Arc::clone(v)))
    }

    /// Inserts `volume` unless one with the same key exists; returns the registered one.
    pub(crate) fn insert(&self, volume: Arc<Volume>) -> VolumeRef {
        let mut tree = self.tree.write();
        let registered = tree
            .entry(volume.high_index())
            .or_insert_with(|| Arc::clone(&volume));
        VolumeRef::new(Arc::clone(registered))
    }

    /// Removes the volume if nothing references it.
    pub(crate) fn remove_unreferenced(&self, high_index: u64) -> Option<Arc<Volume>> {
        let mut tree = self.tree.write();
        let volume = tree.get(&high_index)?;
        if volume.reference_count() != 0 {
            return None;
        }
        tree.remove(&high_index)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Volume>> {
        let mut tree = self.tree.write();
        std::mem::take(&mut *tree).into_values().collect()
    }

    /// Snapshot of every registered volume.
    pub fn volumes(&self) -> Vec<Arc<Volume>> {
        self.tree.read().values().cloned().collect()
    }
}
