//! End-to-end test suite for cellsync.
//!
//! Drives the sync engine against scripted chains, through both the
//! in-process mock and a real JSON-RPC server, with RocksDB persistence.

pub mod fake_node;
pub mod helpers;
