//! Bulk operations
//!
//! A batch of inserts, finds and erases is sent to the engine in a single
//! call. Each `Operation` is projected onto a `RawOperation` whose key and
//! record descriptors point into the operation's own buffers; the buffers are
//! pinned for exactly the duration of the call and the engine's answers are
//! written back into the same `Operation` values afterwards.

use std::ptr;

use log::{trace, warn};

use crate::constants::{EraseFlags, FindFlags, InsertFlags, OP_ERASE, OP_FIND, OP_INSERT};
use crate::engine::Engine;
use crate::error::{Error, IntoResult, Result, Status};
use crate::ffi::{DbPtr, RawOperation, TxnPtr};
use crate::value::{copy_key, copy_record, PinSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Erase,
    Find,
}

impl OperationKind {
    pub fn tag(self) -> i32 {
        match self {
            OperationKind::Insert => OP_INSERT,
            OperationKind::Erase => OP_ERASE,
            OperationKind::Find => OP_FIND,
        }
    }
}

/// One logical operation of a batch.
///
/// `key` and `record` are inputs before the call and may be replaced by the
/// call: a successful find gets a fresh copy of the stored record, and also
/// of the matched key when approximate matching was requested. `result` is
/// `None` until a batch containing the operation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    kind: OperationKind,
    flags: u32,
    pub key: Option<Vec<u8>>,
    pub record: Option<Vec<u8>>,
    result: Option<Status>,
}

impl Operation {
    pub fn insert(key: impl Into<Vec<u8>>, record: impl Into<Vec<u8>>, flags: InsertFlags) -> Self {
        Operation::new(OperationKind::Insert, Some(key.into()), Some(record.into()), flags.bits())
    }

    /// Insert into a record-number database; the engine assigns the key
    pub fn insert_recno(record: impl Into<Vec<u8>>, flags: InsertFlags) -> Self {
        Operation::new(OperationKind::Insert, None, Some(record.into()), flags.bits())
    }

    pub fn find(key: impl Into<Vec<u8>>, flags: FindFlags) -> Self {
        Operation::new(OperationKind::Find, Some(key.into()), None, flags.bits())
    }

    pub fn erase(key: impl Into<Vec<u8>>, flags: EraseFlags) -> Self {
        Operation::new(OperationKind::Erase, Some(key.into()), None, flags.bits())
    }

    fn new(kind: OperationKind, key: Option<Vec<u8>>, record: Option<Vec<u8>>, flags: u32) -> Self {
        Operation {
            kind,
            flags,
            key,
            record,
            result: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Status the engine reported for this operation
    pub fn result(&self) -> Option<Status> {
        self.result
    }

    /// True once the operation ran and the engine reported success
    pub fn succeeded(&self) -> bool {
        self.result == Some(Status::Success)
    }

    fn is_approximate(&self) -> bool {
        FindFlags::from_bits_retain(self.flags).is_approximate()
    }

    /// Builds the wire projection, pinning the buffers it references.
    /// Records are only sent with inserts.
    fn to_wire<'a>(&'a self, pins: &mut PinSet<'a>) -> Result<RawOperation> {
        let mut raw = RawOperation::new(self.kind.tag(), self.flags);
        if let Some(key) = &self.key {
            raw.key = pins.key(key)?;
        }
        if self.kind == OperationKind::Insert {
            if let Some(record) = &self.record {
                raw.record = pins.record(record)?;
            }
        }
        Ok(raw)
    }

    /// Writes the engine's answer for this operation back.
    ///
    /// # Safety
    ///
    /// Descriptors the engine filled in must still point at valid memory.
    unsafe fn apply(&mut self, raw: &RawOperation) {
        let status = Status::from(raw.result);
        self.result = Some(status);
        if !status.is_success() {
            return;
        }
        match self.kind {
            OperationKind::Find => {
                self.record = Some(copy_record(&raw.record));
                if self.is_approximate() {
                    self.key = Some(copy_key(&raw.key));
                }
            }
            OperationKind::Insert
                if self.key.as_ref().map_or(true, Vec::is_empty) && !raw.key.data.is_null() =>
            {
                self.key = Some(copy_key(&raw.key));
            }
            _ => {}
        }
    }
}

/// Runs `operations` against `db` in a single engine call.
///
/// The operations are updated in place and slot `i` of the batch always
/// answers operation `i`:
///
/// - every operation gets its `result`, success or not; a failing operation
///   does not fail the batch
/// - a successful find replaces `record` with a copy of the stored record, and
///   `key` with a copy of the matched key when `LT_MATCH` or `GT_MATCH` is set
/// - a successful insert without a key or with an empty one (record-number
///   databases) receives the key the engine assigned
///
/// A key or record too large for the wire format fails the whole call with
/// `Error::Operation` before the engine is invoked. If the engine rejects the
/// batch as a whole, `Error::Engine` is returned and no operation is touched;
/// some operations may still have been applied by the engine.
pub(crate) fn bulk_operations(
    engine: &dyn Engine,
    db: DbPtr,
    txn: TxnPtr,
    operations: &mut [Operation],
    flags: u32,
) -> Result<()> {
    if operations.is_empty() {
        trace!("bulk call with an empty batch");
        let status = unsafe { engine.db_bulk_operations(db, txn, ptr::null_mut(), 0, flags) };
        return status.into_result();
    }

    let mut wire: Vec<RawOperation> = Vec::with_capacity(operations.len());
    let status = {
        let mut pins = PinSet::new();
        for (index, operation) in operations.iter().enumerate() {
            let raw = operation.to_wire(&mut pins).map_err(|source| {
                warn!("operation {} of a bulk call cannot be marshalled: {}", index, source);
                Error::Operation {
                    index,
                    source: Box::new(source),
                }
            })?;
            wire.push(raw);
        }
        trace!(
            "bulk call with {} operations, {} pinned buffers",
            wire.len(),
            pins.len()
        );
        unsafe { engine.db_bulk_operations(db, txn, wire.as_mut_ptr(), wire.len(), flags) }
    };

    let status = Status::from(status);
    trace!("bulk call returned {:?}", status);
    status.into_result()?;

    for (operation, raw) in operations.iter_mut().zip(&wire) {
        unsafe { operation.apply(raw) };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_only_sent_with_inserts() {
        let insert = Operation::insert(b"k".to_vec(), b"v".to_vec(), InsertFlags::empty());
        let mut find = Operation::find(b"k".to_vec(), FindFlags::empty());
        find.record = Some(b"ignored".to_vec());

        let mut pins = PinSet::new();
        let raw_insert = insert.to_wire(&mut pins).unwrap();
        let raw_find = find.to_wire(&mut pins).unwrap();

        assert_eq!(raw_insert.kind, OP_INSERT);
        assert_eq!(raw_insert.record.size, 1);
        assert_eq!(raw_find.kind, OP_FIND);
        assert!(raw_find.record.data.is_null());
        assert_eq!(pins.len(), 3);
    }

    #[test]
    fn recno_insert_sends_a_null_key() {
        let op = Operation::insert_recno(b"payload".to_vec(), InsertFlags::empty());
        let mut pins = PinSet::new();
        let raw = op.to_wire(&mut pins).unwrap();
        assert!(raw.key.data.is_null());
        assert_eq!(raw.key.size, 0);
        assert_eq!(pins.len(), 1);
    }

    #[test]
    fn empty_insert_key_is_replaced_by_the_assigned_one() {
        let assigned = 7u32.to_le_bytes();
        let mut op = Operation::insert(Vec::new(), b"payload".to_vec(), InsertFlags::empty());
        let mut raw = RawOperation::new(OP_INSERT, 0);
        raw.key.data = assigned.as_ptr() as *mut _;
        raw.key.size = assigned.len() as u16;
        unsafe { op.apply(&raw) };
        assert!(op.succeeded());
        assert_eq!(op.key.as_deref(), Some(&assigned[..]));
    }

    #[test]
    fn failed_operation_keeps_its_buffers() {
        let mut op = Operation::find(b"missing".to_vec(), FindFlags::empty());
        let mut raw = RawOperation::new(OP_FIND, 0);
        raw.result = Status::KeyNotFound.code();
        unsafe { op.apply(&raw) };
        assert_eq!(op.result(), Some(Status::KeyNotFound));
        assert_eq!(op.key.as_deref(), Some(&b"missing"[..]));
        assert_eq!(op.record, None);
    }
}
