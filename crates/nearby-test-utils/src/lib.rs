// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for nearby integration tests.
//!
//! Provides a scripted routing provider and a temp-SQLite entity store so
//! engine scenarios run fast and deterministically without the network.
//!
//! # Components
//!
//! - [`MockRouting`] - routing provider with scripted replies and call capture
//! - [`TestStore`] - temp database, storage adapter and manual clock
//! - [`test_config`] - config tuned for tests (routing mode, no throttle)

pub mod mock_routing;
pub mod store;

pub use mock_routing::MockRouting;
pub use nearby_core::ManualClock;
pub use store::{TestStore, test_config, test_epoch};
