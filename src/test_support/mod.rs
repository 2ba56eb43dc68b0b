//! Helpers for the crate's unit tests.
//!
//! Integration suites under `tests/` cannot see this module; they include
//! `socket_guard.rs` by path from `tests/support/mod.rs`.

pub mod socket_guard;
