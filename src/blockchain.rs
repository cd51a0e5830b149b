// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// the block model and ledger handle, the balance/lock engine, block
// validation, and primary validator schedule resolution.

pub mod core;
pub use core::*;
