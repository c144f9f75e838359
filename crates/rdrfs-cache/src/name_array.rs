//! The bounded path-walk stack used by name resolution.
//!
//! Every element holds an open reference on its directory entry and a
//! reference on the entry's volume for as long as it is in the array.
//! Dropping the array releases all of them.

use crate::config::DEFAULT_NAME_ARRAY_LENGTH;
use crate::dir_cache::release_directory_entry;
use crate::dir_entry::DirectoryEntry;
use crate::error::{CacheError, Result};
use crate::fid::FileId;
use crate::path::split_components;
use crate::volume::VolumeRef;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub struct NameArrayElement {
    entry: Arc<DirectoryEntry>,
    component: String,
    file_id: FileId,
    root: bool,
    _volume: Option<VolumeRef>,
}

impl NameArrayElement {
    fn new(entry: &Arc<DirectoryEntry>) -> Self {
        entry.reference();
        let object = entry.object();
        NameArrayElement {
            entry: Arc::clone(entry),
            component: entry.file_name().to_string(),
            file_id: object.file_id(),
            root: !object.has_parent(),
            _volume: object.volume().map(VolumeRef::new),
        }
    }

    pub fn entry(&self) -> &Arc<DirectoryEntry> {
        &self.entry
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// The element is a volume root or the global root.
    pub fn is_root(&self) -> bool {
        self.root
    }
}

impl Drop for NameArrayElement {
    fn drop(&mut self) {
        release_directory_entry(&self.entry);
    }
}

impl fmt::Debug for NameArrayElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameArrayElement")
            .field("component", &self.component)
            .field("file_id", &self.file_id)
            .field("root", &self.root)
            .finish()
    }
}

#[derive(Debug)]
pub struct NameArray {
    elements: Vec<NameArrayElement>,
    capacity: usize,
    link_count: usize,
}

impl NameArray {
    /// An array of `capacity` elements, 0 meaning [`DEFAULT_NAME_ARRAY_LENGTH`].
    ///
    /// [`CacheContext::init_name_array`](crate::context::CacheContext::init_name_array)
    /// maps 0 to the configured length instead.
    pub fn init(root: Option<&Arc<DirectoryEntry>>, capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_NAME_ARRAY_LENGTH
        } else {
            capacity
        };
        let mut elements = Vec::with_capacity(capacity);
        if let Some(root) = root {
            elements.push(NameArrayElement::new(root));
        }
        NameArray {
            elements,
            capacity,
            link_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[NameArrayElement] {
        &self.elements
    }

    pub fn current(&self) -> Option<&Arc<DirectoryEntry>> {
        self.elements.last().map(|e| &e.entry)
    }

    pub fn current_element(&self) -> Option<&NameArrayElement> {
        self.elements.last()
    }

    /// The element below the current one.
    pub fn get_parent(&self) -> Option<&Arc<DirectoryEntry>> {
        let count = self.elements.len();
        if count < 2 {
            return None;
        }
        Some(&self.elements[count - 2].entry)
    }

    pub fn link_count(&self) -> usize {
        self.link_count
    }

    pub(crate) fn increment_link_count(&mut self) -> usize {
        self.link_count += 1;
        self.link_count
    }

    /// Pushes `entry`; pushing the current top again changes nothing.
    pub fn insert_next(&mut self, entry: &Arc<DirectoryEntry>) -> Result<()> {
        if let Some(current) = self.current() {
            if Arc::ptr_eq(current, entry) {
                return Ok(());
            }
        }
        if self.elements.len() >= self.capacity {
            return Err(CacheError::InsufficientResources);
        }
        self.elements.push(NameArrayElement::new(entry));
        trace!(name = entry.file_name(), count = self.elements.len(), "name array push");
        Ok(())
    }

    /// Replaces the current element, pushing when the array is empty.
    pub fn replace_current(&mut self, entry: &Arc<DirectoryEntry>) -> Result<()> {
        match self.elements.last_mut() {
            None => self.insert_next(entry),
            Some(current) if Arc::ptr_eq(&current.entry, entry) => Ok(()),
            Some(current) => {
                let previous = std::mem::replace(current, NameArrayElement::new(entry));
                trace!(
                    old = previous.component(),
                    new = entry.file_name(),
                    "name array replace"
                );
                Ok(())
            }
        }
    }

    /// Pops the current element and returns the new current entry.
    pub fn backup(&mut self) -> Option<&Arc<DirectoryEntry>> {
        if let Some(popped) = self.elements.pop() {
            trace!(name = popped.component(), count = self.elements.len(), "name array pop");
        }
        self.current()
    }

    /// Copies `related` up to and including `upto` (everything when `None`).
    ///
    /// The copied elements take their own references; the link count is
    /// carried over.
    pub fn populate_from_related(
        &mut self,
        related: &NameArray,
        upto: Option<&Arc<DirectoryEntry>>,
    ) -> Result<()> {
        self.elements.clear();
        for element in &related.elements {
            if self.elements.len() >= self.capacity {
                return Err(CacheError::InsufficientResources);
            }
            self.elements.push(NameArrayElement::new(&element.entry));
            if upto.map(|u| Arc::ptr_eq(u, &element.entry)).unwrap_or(false) {
                break;
            }
        }
        self.link_count = related.link_count;
        Ok(())
    }

    /// Rebuilds the array from `root` along the cached components of `path`.
    ///
    /// Stops with `NotFound` at the first component missing from the cache;
    /// the elements resolved so far stay in the array.
    pub fn populate(&mut self, path: &str, root: &Arc<DirectoryEntry>) -> Result<()> {
        self.reset(Some(root));
        for component in split_components(path) {
            let Some(current) = self.current().cloned() else {
                return Err(CacheError::not_found(component));
            };
            // reference taken before the directory lock is let go
            let nodes = current.object().directory().read();
            match nodes.lookup(&component) {
                Some(entry) => self.insert_next(&entry)?,
                None => return Err(CacheError::not_found(component)),
            }
        }
        Ok(())
    }

    /// Releases every element and restarts at `entry`; the link count is kept.
    pub fn reset(&mut self, entry: Option<&Arc<DirectoryEntry>>) {
        self.elements.clear();
        if let Some(entry) = entry {
            self.elements.push(NameArrayElement::new(entry));
        }
    }

    pub fn free(&mut self) {
        self.elements.clear();
        self.link_count = 0;
    }

    pub fn dump(&self) {
        trace!(count = self.elements.len(), capacity = self.capacity, links = self.link_count, "name array");
        for (index, element) in self.elements.iter().enumerate() {
            trace!(
                index,
                component = element.component(),
                fid = %element.file_id,
                root = element.root,
                open = element.entry.open_reference_count(),
                "  element"
            );
        }
    }
}

impl Drop for NameArray {
    fn drop(&mut self) {
        self.free();
    }
}
