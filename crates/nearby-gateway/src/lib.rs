// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated HTTP trigger surface for the nearby engine.
//!
//! The host's cron, or anything else holding the token, calls
//! `POST /v1/trigger` to get a batch run going without waiting for it.
//! Entity writers report changes so the ripple enqueue can run.

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::AuthConfig;
pub use server::{GatewayState, MetricsRender, ServerConfig, router, start_server};
