//! Key and record descriptors over caller buffers
//!
//! A descriptor handed to the engine points straight into caller memory, so
//! the memory must stay put and stay alive until the call returns. `PinSet`
//! borrows every such buffer for the lifetime of the guard; the borrow checker
//! keeps the buffers from being moved, freed or mutated while the guard is
//! alive, and dropping the guard is the release.

use std::cell::Cell;
use std::marker::PhantomData;
use std::slice;

use libc::c_void;
use log::trace;

use crate::constants::{MAX_KEY_SIZE, MAX_RECORD_SIZE};
use crate::error::{Error, Result};
use crate::ffi::{RawKey, RawRecord};

thread_local! {
    static PINNED: Cell<usize> = const { Cell::new(0) };
}

/// Number of buffers currently pinned by the calling thread.
///
/// Every call pins on the calling thread and releases before it returns, so
/// this reads zero between calls.
pub fn pinned_buffers() -> usize {
    PINNED.with(|count| count.get())
}

/// Scope guard over the buffers referenced by one engine call
#[derive(Debug)]
pub(crate) struct PinSet<'a> {
    pinned: usize,
    _buffers: PhantomData<&'a [u8]>,
}

impl<'a> PinSet<'a> {
    pub(crate) fn new() -> Self {
        PinSet {
            pinned: 0,
            _buffers: PhantomData,
        }
    }

    /// Pins `key` and returns a descriptor pointing at it
    pub(crate) fn key(&mut self, key: &'a [u8]) -> Result<RawKey> {
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge { len: key.len() });
        }
        let data = self.pin(key);
        Ok(RawKey {
            size: key.len() as u16,
            data,
            ..RawKey::default()
        })
    }

    /// Pins `record` and returns a descriptor pointing at it
    pub(crate) fn record(&mut self, record: &'a [u8]) -> Result<RawRecord> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(Error::RecordTooLarge { len: record.len() });
        }
        let data = self.pin(record);
        Ok(RawRecord {
            size: record.len() as u32,
            data,
            ..RawRecord::default()
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.pinned
    }

    // The engine contract takes `void *` but never writes through caller keys
    // or records.
    fn pin(&mut self, buf: &'a [u8]) -> *mut c_void {
        self.pinned += 1;
        PINNED.with(|count| count.set(count.get() + 1));
        buf.as_ptr() as *mut c_void
    }
}

impl Drop for PinSet<'_> {
    fn drop(&mut self) {
        if self.pinned > 0 {
            trace!("releasing {} pinned buffers", self.pinned);
            PINNED.with(|count| count.set(count.get() - self.pinned));
        }
    }
}

/// Copies the bytes a key descriptor points at into a fresh buffer.
///
/// # Safety
///
/// `key.data` must be valid for reads of `key.size` bytes, or `key.size`
/// must be zero.
pub(crate) unsafe fn copy_key(key: &RawKey) -> Vec<u8> {
    copy_out(key.data, key.size as usize)
}

/// Copies the bytes a record descriptor points at into a fresh buffer.
///
/// # Safety
///
/// `record.data` must be valid for reads of `record.size` bytes, or
/// `record.size` must be zero.
pub(crate) unsafe fn copy_record(record: &RawRecord) -> Vec<u8> {
    copy_out(record.data, record.size as usize)
}

unsafe fn copy_out(data: *const c_void, len: usize) -> Vec<u8> {
    if data.is_null() || len == 0 {
        return Vec::new();
    }
    slice::from_raw_parts(data as *const u8, len).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_are_released_on_drop() {
        let key = b"alpha".to_vec();
        let record = vec![7u8; 32];
        assert_eq!(pinned_buffers(), 0);
        {
            let mut pins = PinSet::new();
            let raw_key = pins.key(&key).unwrap();
            let raw_record = pins.record(&record).unwrap();
            assert_eq!(raw_key.size, 5);
            assert_eq!(raw_record.size, 32);
            assert_eq!(pins.len(), 2);
            assert_eq!(pinned_buffers(), 2);

            let copied = unsafe { copy_key(&raw_key) };
            assert_eq!(copied, key);
        }
        assert_eq!(pinned_buffers(), 0);
    }

    #[test]
    fn oversized_key_is_rejected_without_pinning() {
        let key = vec![0u8; MAX_KEY_SIZE + 1];
        let mut pins = PinSet::new();
        let err = pins.key(&key).unwrap_err();
        assert!(matches!(err, Error::KeyTooLarge { len } if len == MAX_KEY_SIZE + 1));
        assert_eq!(pins.len(), 0);
        assert_eq!(pinned_buffers(), 0);
    }

    #[test]
    fn largest_key_fits_the_wire_format() {
        let key = vec![1u8; MAX_KEY_SIZE];
        let mut pins = PinSet::new();
        let raw = pins.key(&key).unwrap();
        assert_eq!(raw.size, u16::MAX);
    }

    #[test]
    fn null_descriptor_copies_to_empty() {
        let raw = RawRecord::default();
        assert!(unsafe { copy_record(&raw) }.is_empty());
    }
}
