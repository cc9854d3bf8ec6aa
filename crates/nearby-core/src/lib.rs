// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the nearby proximity engine.
//!
//! Holds the error type, the domain types shared by every crate (entities,
//! queue items, cache payloads, quota snapshots), the clock abstraction, and
//! the adapter traits at the two external seams: the entity store and the
//! routing provider.

pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::NearbyError;
pub use time::{Clock, ManualClock, SystemClock};
pub use traits::{EntityStore, RoutingProvider};
pub use types::{
    ApiCategory, CachePayload, Candidate, Coordinates, Entity, EntityType, IsochronePayload,
    NearbyItem, ProcessedRecord, Progress, Provider, QueueItem, QueueStats, QueueStatus,
    QuotaSnapshot, QuotaSource, RateHeaders, RelationType,
};
