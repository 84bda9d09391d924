//! `armlink-client` – Cell Client
//!
//! Ties the stream, motion and jogging crates together for one cell of a
//! robot-control service.
//!
//! # Modules
//!
//! - [`config`] – [`ClientConfig`]: `~/.armlink/config.toml` plus
//!   `ARMLINK_*` environment overrides.
//! - [`client`] – [`CellClient`]: instance URL normalisation, cell-scoped
//!   REST and stream URLs.
//! - [`metadata`] – the [`MetadataSource`] collaborator with REST and
//!   in-memory implementations.
//! - [`motion_group`] – [`ConnectedMotionGroup`]: live, noise-free state of
//!   one motion group plus its static metadata and jogging entry point.
//! - [`telemetry`] – `tracing` subscriber / OTLP initialisation.

pub mod client;
pub mod config;
pub mod metadata;
pub mod motion_group;
pub mod telemetry;

pub use client::CellClient;
pub use config::{ClientConfig, JoggingTransport, ReconnectSettings};
pub use metadata::{GroupMetadata, MetadataSource, RestMetadataSource, StaticMetadataSource};
pub use motion_group::ConnectedMotionGroup;
