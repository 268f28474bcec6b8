use log::{debug, warn};
use std::ptr;

use crate::constants::TxnFlags;
use crate::env::Environment;
use crate::error::{IntoResult, Result};
use crate::ffi::TxnPtr;

/// A pending transaction.
///
/// Dropping a transaction that was neither committed nor aborted aborts it.
/// Databases and cursors take the transaction by reference, so it cannot be
/// finished while a cursor created in it is still alive.
pub struct Transaction<'env> {
    env: &'env Environment,
    handle: TxnPtr,
    flags: TxnFlags,
    finished: bool,
}

unsafe impl Send for Transaction<'_> {}
unsafe impl Sync for Transaction<'_> {}

/// Handle passed to the engine for an optional transaction
pub(crate) fn txn_handle(txn: Option<&Transaction<'_>>) -> TxnPtr {
    txn.map_or(ptr::null_mut(), |txn| txn.handle)
}

impl<'env> Transaction<'env> {
    pub(crate) fn begin(env: &'env Environment, flags: TxnFlags) -> Result<Self> {
        let mut handle: TxnPtr = ptr::null_mut();
        {
            let _guard = env.lock();
            unsafe {
                env.engine()
                    .txn_begin(&mut handle, env.handle(), ptr::null(), ptr::null_mut(), flags.bits())
                    .into_result()?;
            }
        }
        debug!("began transaction with flags {:?}", flags);
        Ok(Transaction {
            env,
            handle,
            flags,
            finished: false,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(TxnFlags::READ_ONLY)
    }

    /// Makes the transaction's changes visible to everyone
    pub fn commit(mut self) -> Result<()> {
        let _guard = self.env.lock();
        unsafe { self.env.engine().txn_commit(self.handle, 0) }.into_result()?;
        self.finished = true;
        debug!("committed transaction");
        Ok(())
    }

    pub fn abort(mut self) -> Result<()> {
        self.abort_raw()
    }

    fn abort_raw(&mut self) -> Result<()> {
        let _guard = self.env.lock();
        unsafe { self.env.engine().txn_abort(self.handle, 0) }.into_result()?;
        self.finished = true;
        debug!("aborted transaction");
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.abort_raw() {
            warn!("failed to abort transaction on drop: {}", err);
        }
    }
}
