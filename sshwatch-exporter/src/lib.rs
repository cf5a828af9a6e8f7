//! Prometheus exporter for agentless SSH telemetry.
//!
//! Every request to the metrics endpoint triggers a scrape of the whole
//! fleet: one SSH session per host, run concurrently, merged into a single
//! snapshot rendered in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   HTTP Server   │────>│ FleetCollector  │────>│  N x ssh hosts  │
//! │   (/metrics)    │<────│   (snapshot)    │<────│ (/proc, df, ls) │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! sshwatch-exporter --config sshwatch.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod render;

pub use config::{ConfigError, ExporterConfig, HttpAuth};
pub use http::HttpServer;
pub use render::render;
