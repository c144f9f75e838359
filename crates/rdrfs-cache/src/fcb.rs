//! Open-file state attached to an object while it is open.

use crate::event::{Event, WorkCounter};
use crate::fid::FileId;
use crate::object_info::FileType;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FcbKind {
    File,
    Directory,
    Other,
}

impl FcbKind {
    pub fn for_type(file_type: FileType) -> Self {
        match file_type {
            FileType::File => FcbKind::File,
            FileType::Directory => FcbKind::Directory,
            _ => FcbKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSizes {
    pub allocation_size: i64,
    pub file_size: i64,
    pub valid_data_length: i64,
}

/// Status of the outstanding cached-content fetch for a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentsStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct Fcb {
    file_id: FileId,
    kind: FcbKind,
    resource: Mutex<()>,
    sizes: Mutex<FileSizes>,
    extents_status: Mutex<ExtentsStatus>,
    extents_complete: Event,
    queued_flushes: WorkCounter,
    enumerations: WorkCounter,
    open_handles: AtomicI64,
    last_flush_error: Mutex<Option<String>>,
}

impl Fcb {
    pub fn new(file_id: FileId, kind: FcbKind, sizes: FileSizes) -> Self {
        Fcb {
            file_id,
            kind,
            resource: Mutex::new(()),
            sizes: Mutex::new(sizes),
            extents_status: Mutex::new(ExtentsStatus::Idle),
            extents_complete: Event::new(true),
            queued_flushes: WorkCounter::new(),
            enumerations: WorkCounter::new(),
            open_handles: AtomicI64::new(0),
            last_flush_error: Mutex::new(None),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn kind(&self) -> FcbKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == FcbKind::File
    }

    /// Per-file resource held across flush and purge.
    pub fn lock_resource(&self) -> MutexGuard<'_, ()> {
        self.resource.lock()
    }

    pub fn sizes(&self) -> FileSizes {
        *self.sizes.lock()
    }

    pub fn set_sizes(&self, sizes: FileSizes) {
        *self.sizes.lock() = sizes;
    }

    pub fn open_handles(&self) -> i64 {
        self.open_handles.load(Ordering::Acquire)
    }

    pub(crate) fn open_handle(&self) -> i64 {
        self.open_handles.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn close_handle(&self) -> i64 {
        let count = self.open_handles.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(count >= 0, "fcb {} handle count underflow", self.file_id);
        count
    }

    // cached-content fetch

    pub fn extents_status(&self) -> ExtentsStatus {
        *self.extents_status.lock()
    }

    pub fn begin_extents_request(&self) {
        *self.extents_status.lock() = ExtentsStatus::InProgress;
        self.extents_complete.reset();
    }

    pub fn complete_extents_request(&self) {
        let mut status = self.extents_status.lock();
        if *status == ExtentsStatus::InProgress {
            *status = ExtentsStatus::Completed;
        }
        drop(status);
        self.extents_complete.set();
    }

    /// Marks the outstanding fetch cancelled and releases anyone waiting on it.
    pub fn cancel_extents_request(&self) {
        *self.extents_status.lock() = ExtentsStatus::Cancelled;
        self.extents_complete.set();
        debug!(fid = %self.file_id, "extents request cancelled");
    }

    pub fn wait_for_extents(&self) -> ExtentsStatus {
        self.extents_complete.wait();
        self.extents_status()
    }

    // queued flushes

    pub fn begin_queued_flush(&self) -> usize {
        self.queued_flushes.begin()
    }

    pub fn end_queued_flush(&self) -> usize {
        self.queued_flushes.end()
    }

    pub fn wait_on_queued_flushes(&self) {
        self.queued_flushes.wait_idle();
    }

    // directory enumeration

    pub fn set_enumeration_event(&self) -> usize {
        self.enumerations.begin()
    }

    pub fn clear_enumeration_event(&self) -> usize {
        self.enumerations.end()
    }

    pub fn is_enumeration_in_process(&self) -> bool {
        !self.enumerations.is_idle()
    }

    pub fn last_flush_error(&self) -> Option<String> {
        self.last_flush_error.lock().clone()
    }

    pub(crate) fn record_flush_error(&self, error: String) {
        *self.last_flush_error.lock() = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn file_fcb() -> Fcb {
        Fcb::new(FileId::new(1, 2, 3, 4), FcbKind::File, FileSizes::default())
    }

    #[test]
    fn test_kind_for_type() {
        assert_eq!(FcbKind::for_type(FileType::File), FcbKind::File);
        assert_eq!(FcbKind::for_type(FileType::Directory), FcbKind::Directory);
        assert_eq!(FcbKind::for_type(FileType::SymLink), FcbKind::Other);
    }

    #[test]
    fn test_extents_lifecycle() {
        let fcb = file_fcb();
        assert_eq!(fcb.extents_status(), ExtentsStatus::Idle);
        fcb.begin_extents_request();
        assert_eq!(fcb.extents_status(), ExtentsStatus::InProgress);
        fcb.complete_extents_request();
        assert_eq!(fcb.wait_for_extents(), ExtentsStatus::Completed);
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let fcb = Arc::new(file_fcb());
        fcb.begin_extents_request();
        let waiter = {
            let fcb = Arc::clone(&fcb);
            thread::spawn(move || fcb.wait_for_extents())
        };
        fcb.cancel_extents_request();
        assert_eq!(waiter.join().unwrap(), ExtentsStatus::Cancelled);
    }

    #[test]
    fn test_complete_after_cancel_keeps_cancelled() {
        let fcb = file_fcb();
        fcb.begin_extents_request();
        fcb.cancel_extents_request();
        fcb.complete_extents_request();
        assert_eq!(fcb.extents_status(), ExtentsStatus::Cancelled);
    }

    #[test]
    fn test_enumeration_events() {
        let fcb = Fcb::new(FileId::new(1, 2, 3, 4), FcbKind::Directory, FileSizes::default());
        assert!(!fcb.is_enumeration_in_process());
        fcb.set_enumeration_event();
        fcb.set_enumeration_event();
        assert!(fcb.is_enumeration_in_process());
        fcb.clear_enumeration_event();
        assert!(fcb.is_enumeration_in_process());
        fcb.clear_enumeration_event();
        assert!(!fcb.is_enumeration_in_process());
    }

    #[test]
    fn test_wait_on_queued_flushes() {
        let fcb = Arc::new(file_fcb());
        fcb.begin_queued_flush();
        let flusher = {
            let fcb = Arc::clone(&fcb);
            thread::spawn(move || {
                fcb.end_queued_flush();
            })
        };
        fcb.wait_on_queued_flushes();
        flusher.join().unwrap();
    }

    #[test]
    fn test_handles() {
        let fcb = file_fcb();
        assert_eq!(fcb.open_handle(), 1);
        assert_eq!(fcb.open_handle(), 2);
        assert_eq!(fcb.close_handle(), 1);
        assert_eq!(fcb.open_handles(), 1);
    }

    #[test]
    fn test_sizes() {
        let fcb = file_fcb();
        let sizes = FileSizes {
            allocation_size: 8192,
            file_size: 5000,
            valid_data_length: 5000,
        };
        fcb.set_sizes(sizes);
        assert_eq!(fcb.sizes(), sizes);
    }
}
