//! LedgerChain - An account-based ledger with chunked block storage and
//! periodic blockchain state snapshots
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, the ledger handle, balance/lock engine, validation, schedule
//! - [`request`] - Signed change requests and their stateless checks
//! - [`genesis`] - Genesis state construction and root file import
//!
//! ## Cryptography
//! - [`crypto`] - Signatures and verification (secp256k1), content hashing
//!
//! ## Storage
//! - [`persistence`] - Backend trait, in-memory backend, backend selection
//! - [`storage`] - Chunked block files, blockchain state files, block cursor
//! - [`cache`] - Caching utilities
//!
//! ## Networking
//! - [`sync`] - Pulling blocks and states from peers
//! - [`node`] - Process-level wiring
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod genesis;
pub mod request;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Storage
// ============================================================================
pub mod cache;
pub mod persistence;
pub mod storage;

// ============================================================================
// Networking
// ============================================================================
pub mod node;
pub mod sync;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
