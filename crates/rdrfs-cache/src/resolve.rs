//! Name resolution: walking `\server\share\...` paths through the cache.
//!
//! The walk keeps its position in a caller-owned [`NameArray`]. Each
//! component is looked up under the current directory's shared lock and
//! pushed onto the array before that lock is released, so the entry is
//! referenced before anything can sweep it. Mount points replace the
//! current element with the target volume root; symlinks splice their
//! target components into the remaining path.

use crate::collaborator::AuthGroup;
use crate::context::CacheContext;
use crate::dir_entry::DirectoryEntry;
use crate::directory::PIOCTL_NAME;
use crate::error::{CacheError, Result};
use crate::hash::names_equal_ignore_case;
use crate::name_array::NameArray;
use crate::object_info::{FileType, ObjectInfo};
use crate::path::{contains_sys_name, is_relative_name, split_components, substitute_sys_name, update_name};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveFlags {
    /// Return a final mount point itself rather than its target volume root.
    pub no_mount_point_eval: bool,
    /// Return a final symlink itself rather than its target.
    pub no_symlink_eval: bool,
}

impl ResolveFlags {
    /// Neither a final mount point nor a final symlink is followed.
    pub fn no_reparse() -> Self {
        ResolveFlags {
            no_mount_point_eval: true,
            no_symlink_eval: true,
        }
    }
}

impl CacheContext {
    /// Resolves `path` to a directory entry.
    ///
    /// On success the entry is the current element of `names`, which holds
    /// the references for the whole walk. On failure `names` still holds
    /// whatever was walked; dropping it releases everything.
    pub fn locate_name_entry(
        &self,
        path: &str,
        names: &mut NameArray,
        flags: ResolveFlags,
        auth_group: &AuthGroup,
    ) -> Result<Arc<DirectoryEntry>> {
        let path = update_name(path);
        if is_relative_name(&path) {
            return Err(CacheError::path_invalid(path));
        }
        let mut components: VecDeque<String> = split_components(&path).into();
        let server = components
            .pop_front()
            .ok_or_else(|| CacheError::path_invalid(path.clone()))?;
        if !names_equal_ignore_case(&server, &self.config.server_name) {
            return Err(CacheError::path_invalid(path));
        }
        if self.global_root.is_offline() {
            return Err(CacheError::device_not_ready("network is offline"));
        }

        names.reset(Some(self.global_root.root_entry()));
        trace!(path = %path, "locate name entry");

        while let Some(component) = components.pop_front() {
            let is_final = components.is_empty();
            if component == "." {
                continue;
            }
            if component == ".." {
                if names.count() > 1 {
                    names.backup();
                }
                continue;
            }

            let current = names
                .current()
                .cloned()
                .ok_or_else(|| CacheError::path_invalid(path.clone()))?;
            let entry = self.lookup_component(current.object(), &component, &mut components, names, auth_group)?;
            let is_final = is_final || components.is_empty();

            if entry.object().volume().map(|v| v.is_offline()).unwrap_or(false) {
                return Err(CacheError::device_not_ready(format!(
                    "volume of {} is offline",
                    entry.file_name()
                )));
            }
            self.validate_entry(&entry, auth_group, false, false)?;

            match entry.object().file_type() {
                FileType::MountPoint if !is_final || !flags.no_mount_point_eval => {
                    let root = self.traverse_mount_point(&entry, auth_group)?;
                    names.replace_current(&root)?;
                }
                FileType::SymLink if !is_final || !flags.no_symlink_eval => {
                    self.traverse_symlink(&entry, names, &mut components, auth_group)?;
                }
                FileType::DfsLink if !is_final => {
                    let target = entry.target_name().unwrap_or_default();
                    debug!(name = entry.file_name(), target = %target, "dfs link in path");
                    return Err(CacheError::Reparse { target });
                }
                FileType::Directory | FileType::MountPoint | FileType::SymLink => {}
                _ if !is_final => {
                    return Err(CacheError::path_invalid(format!(
                        "{} is not a directory",
                        entry.file_name()
                    )));
                }
                _ => {}
            }
        }

        names
            .current()
            .cloned()
            .ok_or_else(|| CacheError::path_invalid(path))
    }

    /// Finds `component` under `directory` and pushes it onto `names`.
    fn lookup_component(
        &self,
        directory: &Arc<ObjectInfo>,
        component: &str,
        remaining: &mut VecDeque<String>,
        names: &mut NameArray,
        auth_group: &AuthGroup,
    ) -> Result<Arc<DirectoryEntry>> {
        let in_global_root = Arc::ptr_eq(directory, self.global_root.root());
        if in_global_root {
            self.enumerate_global_root(auth_group)?;
        } else {
            if !directory.file_type().is_directory() {
                return Err(CacheError::path_invalid(format!(
                    "{} is not a directory",
                    directory.file_id()
                )));
            }
            self.enumerate_directory(directory, auth_group)?;
            if names_equal_ignore_case(component, PIOCTL_NAME) {
                let entry = self.init_pioctl_entry(directory)?;
                names.insert_next(&entry)?;
                return Ok(entry);
            }
        }

        let candidates: Vec<String> = if contains_sys_name(component) {
            self.config
                .sysnames
                .iter()
                .filter_map(|sys| substitute_sys_name(component, sys))
                .collect()
        } else {
            vec![component.to_string()]
        };
        for name in &candidates {
            let nodes = directory.directory().read();
            if let Some(entry) = nodes.lookup(name) {
                names.insert_next(&entry)?;
                return Ok(entry);
            }
        }

        if in_global_root {
            if let Some(next) = remaining.front() {
                let joined = format!("{}\\{}", component, next);
                if let Some(entry) = self.lookup_special_share(&joined) {
                    remaining.pop_front();
                    names.insert_next(&entry)?;
                    return Ok(entry);
                }
            }
            if let Some(entry) = self.lookup_special_share(component) {
                names.insert_next(&entry)?;
                return Ok(entry);
            }
        }
        Err(CacheError::not_found(component))
    }

    /// Root entry of the volume a mount point leads to.
    fn traverse_mount_point(
        &self,
        entry: &Arc<DirectoryEntry>,
        auth_group: &AuthGroup,
    ) -> Result<Arc<DirectoryEntry>> {
        let object = entry.object();
        if !object.target_file_id().has_target() {
            self.evaluate_node(entry, auth_group)?;
        }
        let target = object.target_file_id();
        if !target.has_target() {
            return Err(CacheError::not_found(format!(
                "target of mount point {}",
                entry.file_name()
            )));
        }
        let volume = self.mount_volume(target, auth_group)?;
        if volume.is_offline() {
            return Err(CacheError::device_not_ready(format!(
                "volume {} is offline",
                volume.volume_id()
            )));
        }
        let root = Arc::clone(volume.root_entry());
        self.validate_entry(&root, auth_group, false, false)?;
        trace!(mount_point = entry.file_name(), volume = %volume.volume_id(), "crossed mount point");
        Ok(root)
    }

    /// Splices the target of the symlink on top of `names` into the walk.
    fn traverse_symlink(
        &self,
        entry: &Arc<DirectoryEntry>,
        names: &mut NameArray,
        remaining: &mut VecDeque<String>,
        auth_group: &AuthGroup,
    ) -> Result<()> {
        let links = names.increment_link_count();
        if links > self.config.max_link_count {
            return Err(CacheError::TooManyLinks {
                limit: self.config.max_link_count,
            });
        }

        let target = match entry.target_name() {
            Some(target) => target,
            None => {
                if let Err(e) = self.validate_symlink(entry, auth_group) {
                    if e.is_not_found() {
                        if let Some(parent) = entry.parent() {
                            return Err(self.check_symlink_access(&parent, entry.file_name()));
                        }
                    }
                    return Err(e);
                }
                entry
                    .target_name()
                    .ok_or_else(|| CacheError::not_found(format!("target of {}", entry.file_name())))?
            }
        };
        let target = update_name(&target);
        debug!(link = entry.file_name(), target = %target, links, "following symlink");

        let mut target_components = split_components(&target);
        if target.starts_with("\\\\") {
            if target_components.is_empty()
                || !names_equal_ignore_case(&target_components[0], &self.config.server_name)
            {
                return Err(CacheError::path_invalid(target));
            }
            target_components.remove(0);
            names.reset(Some(self.global_root.root_entry()));
        } else if target.starts_with('\\') {
            names.backup();
            while names.count() > 1
                && !names.current_element().map(|e| e.is_root()).unwrap_or(true)
            {
                names.backup();
            }
        } else {
            names.backup();
        }
        for component in target_components.into_iter().rev() {
            remaining.push_front(component);
        }
        Ok(())
    }
}
