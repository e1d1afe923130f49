//! # Brewline
//!
//! HTTP server and CLI around `brewline-core`.
//!
//! - [`api`]: axum REST API (inventory, orders, payments, loyalty, audit)
//! - [`cli`]: clap commands for operators
//! - [`config`]: TOML configuration, also the engine's settings provider
//! - [`events`]: engine events published through `tracing`

pub mod api;
pub mod cli;
pub mod config;
pub mod events;
