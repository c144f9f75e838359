//! Interfaces to the subsystems this cache drives but does not own.
//!
//! * [`RemoteAuthority`] answers metadata and directory listing requests.
//! * [`ContentCache`] flushes and purges cached file content.
//! * [`ChangeNotifier`] delivers directory change notifications.
//!
//! None of these are called with a directory or registry lock held unless
//! noted on the calling operation.

use crate::error::Result;
use crate::fcb::{Fcb, FileSizes};
use crate::fid::FileId;
use crate::object_info::FileType;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

/// Credential context a request is evaluated under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthGroup(Uuid);

impl AuthGroup {
    pub fn new() -> Self {
        AuthGroup(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        AuthGroup(Uuid::nil())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        AuthGroup(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// Metadata snapshot for one object as reported by the remote authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEntry {
    pub file_id: FileId,
    pub target_file_id: FileId,
    pub file_type: FileType,
    pub file_name: String,
    pub short_name: Option<String>,
    pub target_name: Option<String>,
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

pub trait RemoteAuthority: Send + Sync {
    /// Current metadata for `file_id`.
    fn evaluate_target_by_id(
        &self,
        file_id: &FileId,
        parent_id: Option<&FileId>,
        auth_group: &AuthGroup,
        fast_call: bool,
    ) -> Result<RemoteEntry>;

    /// Listing of the directory `dir_id`.
    fn enumerate_directory(
        &self,
        dir_id: &FileId,
        auth_group: &AuthGroup,
        full_refresh: bool,
    ) -> Result<Vec<RemoteEntry>>;

    /// Listing used by mark-and-sweep re-validation.
    fn verify_directory_content(
        &self,
        dir_id: &FileId,
        auth_group: &AuthGroup,
    ) -> Result<Vec<RemoteEntry>> {
        self.enumerate_directory(dir_id, auth_group, true)
    }

    /// The cache no longer holds `file_id`.
    fn release_fid(&self, file_id: &FileId) {
        trace!(fid = %file_id, "release fid");
    }

    fn is_available(&self) -> bool {
        true
    }
}

pub trait ContentCache: Send + Sync {
    fn flush(&self, fcb: &Fcb) -> Result<()>;

    fn purge(&self, fcb: &Fcb) -> Result<()>;

    fn flush_extents(&self, fcb: &Fcb);

    fn tear_down_extents(&self, fcb: &Fcb);

    fn set_file_sizes(&self, fcb: &Fcb, sizes: &FileSizes) {
        fcb.set_sizes(*sizes);
    }
}

/// Content cache with nothing cached.
#[derive(Debug, Default)]
pub struct NoopContentCache;

impl ContentCache for NoopContentCache {
    fn flush(&self, _fcb: &Fcb) -> Result<()> {
        Ok(())
    }

    fn purge(&self, _fcb: &Fcb) -> Result<()> {
        Ok(())
    }

    fn flush_extents(&self, _fcb: &Fcb) {}

    fn tear_down_extents(&self, _fcb: &Fcb) {}
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct NotifyFilter: u32 {
        const FILE_NAME   = 0x0000_0001;
        const DIR_NAME    = 0x0000_0002;
        const NAME        = 0x0000_0003;
        const ATTRIBUTES  = 0x0000_0004;
        const SIZE        = 0x0000_0008;
        const LAST_WRITE  = 0x0000_0010;
        const SECURITY    = 0x0000_0100;
    }
}

impl NotifyFilter {
    /// `DIR_NAME` for directories, `FILE_NAME` for everything else.
    pub fn name_for(file_type: FileType) -> Self {
        if file_type.is_directory() {
            NotifyFilter::DIR_NAME
        } else {
            NotifyFilter::FILE_NAME
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotifyAction {
    Added,
    Removed,
    Modified,
}

/// A change to `object` reported against the watchers of `directory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub directory: FileId,
    pub object: FileId,
    pub filter: NotifyFilter,
    pub action: NotifyAction,
}

pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: &ChangeEvent);
}

/// Notifier that only logs.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl ChangeNotifier for TracingNotifier {
    fn notify(&self, event: &ChangeEvent) {
        debug!(
            directory = %event.directory,
            object = %event.object,
            filter = ?event.filter,
            action = ?event.action,
            "change notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_group_identity() {
        let a = AuthGroup::new();
        let b = AuthGroup::new();
        assert_ne!(a, b);
        assert_eq!(AuthGroup::nil(), AuthGroup::default());
        assert_eq!(AuthGroup::from_uuid(a.id()), a);
    }

    #[test]
    fn test_notify_filter_name_for() {
        assert_eq!(NotifyFilter::name_for(FileType::Directory), NotifyFilter::DIR_NAME);
        assert_eq!(NotifyFilter::name_for(FileType::File), NotifyFilter::FILE_NAME);
        assert_eq!(NotifyFilter::name_for(FileType::SymLink), NotifyFilter::FILE_NAME);
        assert_eq!(NotifyFilter::NAME, NotifyFilter::FILE_NAME | NotifyFilter::DIR_NAME);
    }

    #[test]
    fn test_remote_entry_defaults_from_json() {
        let entry: RemoteEntry =
            serde_json::from_str(r#"{"file_name":"a","file_type":"File","data_version":3}"#).unwrap();
        assert_eq!(entry.file_name, "a");
        assert_eq!(entry.file_type, FileType::File);
        assert_eq!(entry.data_version, 3);
        assert_eq!(entry.file_id, FileId::default());
        assert!(entry.target_name.is_none());
    }

    #[test]
    fn test_noop_content_cache_sets_sizes() {
        let fcb = Fcb::new(FileId::new(1, 2, 3, 4), crate::fcb::FcbKind::File, FileSizes::default());
        let cache = NoopContentCache;
        let sizes = FileSizes {
            allocation_size: 4096,
            file_size: 10,
            valid_data_length: 10,
        };
        cache.set_file_sizes(&fcb, &sizes);
        assert_eq!(fcb.sizes(), sizes);
        assert!(cache.flush(&fcb).is_ok());
        assert!(cache.purge(&fcb).is_ok());
    }
}
