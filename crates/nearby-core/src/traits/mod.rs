// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits at the engine's external seams.
//!
//! The host environment supplies the entity store and the routing provider.
//! Both use `#[async_trait]` so the engine can hold them as trait objects.

pub mod entity_store;
pub mod routing;

pub use entity_store::EntityStore;
pub use routing::{MatrixRow, RoutingError, RoutingProvider, RoutingReply};
