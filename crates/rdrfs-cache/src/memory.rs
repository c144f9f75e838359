//! In-memory remote authority.
//!
//! Backs the status tool and the tests: a flat map of remote objects plus
//! the child list of every directory, loadable from a JSON fixture.

use crate::collaborator::{AuthGroup, RemoteAuthority, RemoteEntry};
use crate::error::{CacheError, Result};
use crate::fid::FileId;
use crate::object_info::now_millis;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Lifetime given to snapshots stored without an expiration.
pub const DEFAULT_TTL_MILLIS: u64 = 60_000;

/// One object of a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureNode {
    #[serde(default)]
    pub parent: Option<FileId>,
    #[serde(flatten)]
    pub entry: RemoteEntry,
}

pub struct MemoryAuthority {
    objects: DashMap<FileId, RemoteEntry>,
    children: DashMap<FileId, Vec<FileId>>,
    available: AtomicBool,
    ttl_millis: AtomicU64,
    evaluate_calls: AtomicUsize,
    enumerate_calls: AtomicUsize,
    released: Mutex<Vec<FileId>>,
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuthority {
    pub fn new() -> Self {
        MemoryAuthority {
            objects: DashMap::new(),
            children: DashMap::new(),
            available: AtomicBool::new(true),
            ttl_millis: AtomicU64::new(DEFAULT_TTL_MILLIS),
            evaluate_calls: AtomicUsize::new(0),
            enumerate_calls: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fixture(nodes: Vec<FixtureNode>) -> Self {
        let authority = Self::new();
        for node in nodes {
            authority.insert(node.entry, node.parent);
        }
        authority
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let nodes: Vec<FixtureNode> = serde_json::from_str(json)
            .map_err(|e| CacheError::invalid_parameter(format!("fixture: {}", e)))?;
        Ok(Self::from_fixture(nodes))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let authority = Self::from_json_str(&json)?;
        debug!(path = %path.display(), objects = authority.objects.len(), "loaded fixture");
        Ok(authority)
    }

    /// Adds or replaces `entry`, listing it under `parent` when given.
    pub fn insert(&self, entry: RemoteEntry, parent: Option<FileId>) {
        let fid = entry.file_id;
        if let Some(parent) = parent {
            let mut children = self.children.entry(parent).or_default();
            if !children.contains(&fid) {
                children.push(fid);
            }
        }
        self.objects.insert(fid, entry);
    }

    /// Forgets `fid` and unlists it from every directory.
    pub fn remove(&self, fid: &FileId) -> Option<RemoteEntry> {
        for mut children in self.children.iter_mut() {
            children.retain(|c| c != fid);
        }
        self.children.remove(fid);
        self.objects.remove(fid).map(|(_, entry)| entry)
    }

    pub fn update(&self, fid: &FileId, f: impl FnOnce(&mut RemoteEntry)) -> bool {
        match self.objects.get_mut(fid) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    pub fn set_data_version(&self, fid: &FileId, data_version: u64) -> bool {
        self.update(fid, |e| e.data_version = data_version)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn set_ttl_millis(&self, ttl: u64) {
        self.ttl_millis.store(ttl, Ordering::Relaxed);
    }

    pub fn evaluate_calls(&self) -> usize {
        self.evaluate_calls.load(Ordering::Acquire)
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::Acquire)
    }

    /// Identities the cache reported as no longer held.
    pub fn released(&self) -> Vec<FileId> {
        self.released.lock().clone()
    }

    fn snapshot(&self, fid: &FileId) -> Option<RemoteEntry> {
        let mut entry = self.objects.get(fid)?.clone();
        if entry.expiration == 0 {
            entry.expiration = now_millis() + self.ttl_millis.load(Ordering::Relaxed);
        }
        Some(entry)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheError::device_not_ready("remote authority unavailable"))
        }
    }
}

impl RemoteAuthority for MemoryAuthority {
    fn evaluate_target_by_id(
        &self,
        file_id: &FileId,
        _parent_id: Option<&FileId>,
        _auth_group: &AuthGroup,
        _fast_call: bool,
    ) -> Result<RemoteEntry> {
        self.evaluate_calls.fetch_add(1, Ordering::AcqRel);
        self.check_available()?;
        trace!(fid = %file_id, "evaluate");
        self.snapshot(file_id)
            .ok_or_else(|| CacheError::not_found(file_id.to_string()))
    }

    fn enumerate_directory(
        &self,
        dir_id: &FileId,
        _auth_group: &AuthGroup,
        _full_refresh: bool,
    ) -> Result<Vec<RemoteEntry>> {
        self.enumerate_calls.fetch_add(1, Ordering::AcqRel);
        self.check_available()?;
        if !self.objects.contains_key(dir_id) && !dir_id.is_volume() {
            return Err(CacheError::not_found(dir_id.to_string()));
        }
        let children = self
            .children
            .get(dir_id)
            .map(|c| c.value().clone())
            .unwrap_or_default();
        Ok(children.iter().filter_map(|fid| self.snapshot(fid)).collect())
    }

    fn release_fid(&self, file_id: &FileId) {
        self.released.lock().push(*file_id);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_info::FileType;

    #[test]
    fn test_fixture_round_trip() {
        let json = r#"[
            {"file_id":{"cell":1,"volume":7,"vnode":1,"unique":1},"file_type":"Directory"},
            {"parent":{"cell":1,"volume":7,"vnode":1,"unique":1},
             "file_id":{"cell":1,"volume":7,"vnode":5,"unique":1},
             "file_name":"a.txt","file_type":"File","data_version":2}
        ]"#;
        let authority = MemoryAuthority::from_json_str(json).unwrap();
        let listing = authority
            .enumerate_directory(&FileId::volume_root(1, 7), &AuthGroup::nil(), true)
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].file_name, "a.txt");
        assert_eq!(listing[0].file_type, FileType::File);
        assert!(listing[0].expiration > now_millis());
        assert_eq!(authority.enumerate_calls(), 1);
    }

    #[test]
    fn test_remove_unlists() {
        let authority = MemoryAuthority::new();
        let dir = FileId::volume_root(1, 7);
        let file = FileId::new(1, 7, 5, 1);
        authority.insert(RemoteEntry { file_id: dir, ..Default::default() }, None);
        authority.insert(RemoteEntry { file_id: file, ..Default::default() }, Some(dir));
        assert!(authority.remove(&file).is_some());
        let listing = authority.enumerate_directory(&dir, &AuthGroup::nil(), false).unwrap();
        assert!(listing.is_empty());
        assert!(authority
            .evaluate_target_by_id(&file, None, &AuthGroup::nil(), false)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_unavailable() {
        let authority = MemoryAuthority::new();
        authority.set_available(false);
        assert!(!authority.is_available());
        let err = authority
            .evaluate_target_by_id(&FileId::new(1, 1, 1, 1), None, &AuthGroup::nil(), false)
            .unwrap_err();
        assert!(matches!(err, CacheError::DeviceNotReady { .. }));
    }

    #[test]
    fn test_bad_fixture() {
        assert!(MemoryAuthority::from_json_str("{}").is_err());
    }
}
