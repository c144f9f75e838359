#![warn(missing_docs)]

//! RDRFS redirector cache subsystem.
//!
//! Client-side object and namespace cache for a remote filesystem exposed
//! as `\\server\share\...` paths: per-volume object trees, per-directory
//! name indexes, path resolution across mount points and symlinks,
//! freshness validation against a remote authority and pushed
//! invalidations.

pub mod collaborator;
pub mod config;
pub mod context;
pub mod dir_cache;
pub mod dir_entry;
pub mod directory;
pub mod error;
pub mod event;
pub mod fcb;
pub mod fid;
pub mod hash;
pub mod invalidation;
pub mod list;
pub mod memory;
pub mod name_array;
pub mod object_info;
pub mod path;
pub mod resolve;
pub mod status;
pub mod validation;
pub mod volume;

pub use collaborator::{
    AuthGroup, ChangeEvent, ChangeNotifier, ContentCache, NoopContentCache, NotifyAction,
    NotifyFilter, RemoteAuthority, RemoteEntry, TracingNotifier,
};
pub use config::CacheConfig;
pub use context::{CacheContext, FileHandle, StatsSnapshot, GLOBAL_ROOT_FID};
pub use dir_entry::{DirEntryFlags, DirectoryEntry};
pub use error::{CacheError, Result};
pub use fcb::{Fcb, FileSizes};
pub use fid::FileId;
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use memory::MemoryAuthority;
pub use name_array::NameArray;
pub use object_info::{FileType, Freshness, ObjectFlags, ObjectInfo};
pub use resolve::ResolveFlags;
pub use status::{DriverStatus, ObjectStatus, StatusQuery};
pub use volume::{Volume, VolumeRef};
