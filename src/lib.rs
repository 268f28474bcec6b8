//! Rust bindings for the upscaledb embedded key-value engine.
//!
//! The binding forwards to an [`Engine`]: the linked C library when the
//! `native` feature is enabled, or the in-process [`MemoryEngine`]. Batches
//! of inserts, finds and erases go through [`Database::bulk_operations`] in a
//! single engine call.

pub mod constants;
mod cursor;
mod database;
pub mod engine;
mod env;
mod error;
pub mod ffi;
mod memory;
mod operation;
mod query;
mod transaction;
mod types;
mod value;

pub use constants::{
    CloseFlags, CountFlags, CursorMove, DbFlags, EnvFlags, EraseFlags, FindFlags, InsertFlags,
    TxnFlags,
};
pub use cursor::Cursor;
pub use database::Database;
#[cfg(feature = "native")]
pub use engine::NativeEngine;
pub use engine::{default_engine, Engine};
pub use env::{Environment, EnvironmentBuilder};
pub use error::{Error, Result, Status};
pub use memory::MemoryEngine;
pub use operation::{Operation, OperationKind};
pub use query::QueryResult;
pub use transaction::Transaction;
pub use types::{version, Parameter, Version};
pub use value::pinned_buffers;
