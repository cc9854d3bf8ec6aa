// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the nearby proximity engine.
//!
//! WAL-mode SQLite with embedded refinery migrations and a single-writer
//! model via `tokio-rusqlite`. Typed query modules cover the work queue,
//! entities and their cached payloads, processed history, and the
//! TTL key-value state store.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteStorage;
pub use database::Database;
pub use queries::state::{StateEntry, StateWrite};
