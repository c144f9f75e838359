//! A name under a parent directory, bound to the object it names.

use crate::hash::name_hash;
use crate::list::ListHandle;
use crate::object_info::ObjectInfo;
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DirEntryFlags: u32 {
        const VALID                       = 0x0000_0001;
        const FAKE                        = 0x0000_0002;
        const DELETED                     = 0x0000_0004;
        const NOT_IN_PARENT_TREE          = 0x0000_0008;
        const RELEASE_NAME_BUFFER         = 0x0000_0010;
        const RELEASE_TARGET_NAME_BUFFER  = 0x0000_0020;
    }
}

/// Fixed enumeration positions of the synthetic entries.
pub const FILE_INDEX_DOT: u64 = 1;
pub const FILE_INDEX_DOT_DOT: u64 = 2;
pub const FILE_INDEX_PIOCTL: u64 = 3;

pub struct DirectoryEntry {
    object: Arc<ObjectInfo>,
    parent: Weak<ObjectInfo>,
    file_name: String,
    short_name: Option<String>,
    target_name: RwLock<Option<String>>,
    file_index: u64,
    flags: AtomicU32,
    open_reference_count: AtomicI64,
    case_sensitive_hash: u32,
    case_insensitive_hash: u32,
    short_name_hash: u32,
    list_handle: Mutex<Option<ListHandle>>,
}

impl DirectoryEntry {
    /// Builds an entry that is not yet in any parent index.
    pub(crate) fn new(
        object: Arc<ObjectInfo>,
        parent: Weak<ObjectInfo>,
        file_name: &str,
        short_name: Option<&str>,
        target_name: Option<&str>,
        file_index: u64,
        flags: DirEntryFlags,
    ) -> Self {
        let (case_sensitive_hash, case_insensitive_hash) = if file_name.is_empty() {
            (0, 0)
        } else {
            (name_hash(file_name, false), name_hash(file_name, true))
        };
        let short_name = short_name.filter(|s| !s.is_empty()).map(str::to_string);
        let short_name_hash = short_name
            .as_deref()
            .map(|s| name_hash(s, true))
            .unwrap_or(0);
        DirectoryEntry {
            object,
            parent,
            file_name: file_name.to_string(),
            short_name,
            target_name: RwLock::new(target_name.filter(|t| !t.is_empty()).map(str::to_string)),
            file_index,
            flags: AtomicU32::new((flags | DirEntryFlags::NOT_IN_PARENT_TREE).bits()),
            open_reference_count: AtomicI64::new(0),
            case_sensitive_hash,
            case_insensitive_hash,
            short_name_hash,
            list_handle: Mutex::new(None),
        }
    }

    pub fn object(&self) -> &Arc<ObjectInfo> {
        &self.object
    }

    pub fn parent(&self) -> Option<Arc<ObjectInfo>> {
        self.parent.upgrade()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn short_name(&self) -> Option<&str> {
        self.short_name.as_deref()
    }

    pub fn target_name(&self) -> Option<String> {
        self.target_name.read().clone()
    }

    /// Replaces the link target under the entry lock.
    pub(crate) fn set_target_name(&self, target: Option<String>) {
        let mut current = self.target_name.write();
        if target.is_some() && current.is_some() {
            self.set_flags(DirEntryFlags::RELEASE_TARGET_NAME_BUFFER);
        }
        *current = target;
    }

    pub fn file_index(&self) -> u64 {
        self.file_index
    }

    pub fn case_sensitive_hash(&self) -> u32 {
        self.case_sensitive_hash
    }

    pub fn case_insensitive_hash(&self) -> u32 {
        self.case_insensitive_hash
    }

    pub fn short_name_hash(&self) -> u32 {
        self.short_name_hash
    }

    pub(crate) fn list_handle(&self) -> &Mutex<Option<ListHandle>> {
        &self.list_handle
    }

    pub fn flags(&self) -> DirEntryFlags {
        DirEntryFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub fn has_flags(&self, flags: DirEntryFlags) -> bool {
        self.flags().contains(flags)
    }

    pub(crate) fn set_flags(&self, flags: DirEntryFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flags(&self, flags: DirEntryFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_fake(&self) -> bool {
        self.has_flags(DirEntryFlags::FAKE)
    }

    pub fn is_deleted(&self) -> bool {
        self.has_flags(DirEntryFlags::DELETED)
    }

    pub fn is_valid(&self) -> bool {
        self.has_flags(DirEntryFlags::VALID)
    }

    pub fn open_reference_count(&self) -> i64 {
        self.open_reference_count.load(Ordering::Acquire)
    }

    pub(crate) fn reference(&self) -> i64 {
        self.open_reference_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn dereference(&self) -> i64 {
        let count = self.open_reference_count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(count >= 0, "entry {} open count underflow", self.file_name);
        count
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("file_name", &self.file_name)
            .field("file_id", &self.object.file_id())
            .field("flags", &self.flags())
            .field("open_reference_count", &self.open_reference_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fid::FileId;

    fn entry(name: &str, short: Option<&str>) -> DirectoryEntry {
        let object = Arc::new(ObjectInfo::new(FileId::new(1, 2, 3, 4), Weak::new(), Weak::new()));
        DirectoryEntry::new(object, Weak::new(), name, short, None, 7, DirEntryFlags::empty())
    }

    #[test]
    fn test_new_entry_is_not_in_parent_tree() {
        let e = entry("foo", None);
        assert!(e.has_flags(DirEntryFlags::NOT_IN_PARENT_TREE));
        assert!(!e.is_valid());
        assert_eq!(e.file_index(), 7);
    }

    #[test]
    fn test_hashes_computed_for_named_entry() {
        let e = entry("Foo", None);
        assert_eq!(e.case_sensitive_hash(), name_hash("Foo", false));
        assert_eq!(e.case_insensitive_hash(), name_hash("FOO", true));
        assert_eq!(e.short_name_hash(), 0);
    }

    #[test]
    fn test_empty_name_has_no_hash() {
        let e = entry("", None);
        assert_eq!(e.case_sensitive_hash(), 0);
        assert_eq!(e.case_insensitive_hash(), 0);
    }

    #[test]
    fn test_short_name_hash() {
        let e = entry("LongFileName.text", Some("LONGFI~1.TEX"));
        assert_eq!(e.short_name(), Some("LONGFI~1.TEX"));
        assert_eq!(e.short_name_hash(), name_hash("longfi~1.tex", true));
    }

    #[test]
    fn test_target_name_replacement_flags_buffer() {
        let e = entry("link", None);
        e.set_target_name(Some("a".to_string()));
        assert!(!e.has_flags(DirEntryFlags::RELEASE_TARGET_NAME_BUFFER));
        e.set_target_name(Some("b".to_string()));
        assert!(e.has_flags(DirEntryFlags::RELEASE_TARGET_NAME_BUFFER));
        assert_eq!(e.target_name().as_deref(), Some("b"));
        e.set_target_name(None);
        assert_eq!(e.target_name(), None);
    }

    #[test]
    fn test_open_reference_count() {
        let e = entry("foo", None);
        assert_eq!(e.reference(), 1);
        assert_eq!(e.reference(), 2);
        assert_eq!(e.dereference(), 1);
        assert_eq!(e.open_reference_count(), 1);
    }
}
