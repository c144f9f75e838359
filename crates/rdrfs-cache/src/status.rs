//! Read-only status queries.

use crate::collaborator::AuthGroup;
use crate::context::CacheContext;
use crate::dir_entry::DirectoryEntry;
use crate::error::{CacheError, Result};
use crate::fid::FileId;
use crate::object_info::{FileType, Freshness, ObjectFlags, ObjectInfo};
use crate::resolve::ResolveFlags;
use serde::{Deserialize, Serialize};

/// Snapshot of one cached object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub file_id: FileId,
    pub target_file_id: FileId,
    pub file_type: FileType,
    pub flags: ObjectFlags,
    pub freshness: Freshness,
    pub expiration: u64,
    pub data_version: u64,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_write_time: i64,
    pub change_time: i64,
    pub end_of_file: i64,
    pub allocation_size: i64,
    pub file_attributes: u32,
    pub ea_size: u32,
    pub links: u32,
    pub reference_count: i64,
    pub file_name: Option<String>,
    pub target_name: Option<String>,
}

impl ObjectStatus {
    fn capture(object: &ObjectInfo, entry: Option<&DirectoryEntry>) -> Self {
        let meta = object.meta();
        let flags = object.flags();
        ObjectStatus {
            file_id: object.file_id(),
            target_file_id: meta.target_file_id,
            file_type: meta.file_type,
            flags,
            freshness: Freshness::from_flags(flags),
            expiration: meta.expiration,
            data_version: meta.data_version,
            creation_time: meta.creation_time,
            last_access_time: meta.last_access_time,
            last_write_time: meta.last_write_time,
            change_time: meta.change_time,
            end_of_file: meta.end_of_file,
            allocation_size: meta.allocation_size,
            file_attributes: meta.file_attributes,
            ea_size: meta.ea_size,
            links: meta.links,
            reference_count: object.reference_count(),
            file_name: entry.map(|e| e.file_name().to_string()),
            target_name: entry.and_then(|e| e.target_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusQuery {
    FileId(FileId),
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Ready,
    NotReady,
    NoService,
}

impl CacheContext {
    pub fn get_object_status(&self, query: &StatusQuery, auth_group: &AuthGroup) -> Result<ObjectStatus> {
        match query {
            StatusQuery::FileId(fid) => {
                if !fid.is_complete() {
                    return Err(CacheError::invalid_parameter(format!(
                        "file id {} is incomplete",
                        fid
                    )));
                }
                let volume = self
                    .volumes
                    .locate(fid.high_index())
                    .ok_or_else(|| CacheError::invalid_parameter(format!("no volume for {}", fid)))?;
                if fid.is_volume() {
                    return Ok(ObjectStatus::capture(volume.root(), Some(&**volume.root_entry())));
                }
                let object = volume
                    .locate_object(fid.low_index())
                    .ok_or_else(|| CacheError::invalid_parameter(format!("{} is not cached", fid)))?;
                Ok(ObjectStatus::capture(&object, None))
            }
            StatusQuery::Path(path) => {
                let mut names = self.new_name_array(None);
                let entry = self.locate_name_entry(path, &mut names, ResolveFlags::no_reparse(), auth_group)?;
                Ok(ObjectStatus::capture(entry.object(), Some(&*entry)))
            }
        }
    }

    pub fn driver_status(&self) -> DriverStatus {
        if !self.authority.is_available() {
            DriverStatus::NoService
        } else if self.global_root.is_offline() {
            DriverStatus::NotReady
        } else {
            DriverStatus::Ready
        }
    }
}
