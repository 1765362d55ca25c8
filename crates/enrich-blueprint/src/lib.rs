//! # Enrich Blueprint
//!
//! Collects callbacks, rewrites them through a chain of transforms and
//! registers them with a host so that the host's one-writer-per-output rule
//! holds.
//!
//! ## Pipeline
//!
//! ```text
//! add_callback ──► Blueprint.callbacks
//!                        │ resolve_callbacks (transforms, by rank)
//!                        ▼
//!                  rewritten callbacks
//!                        │ group_callbacks (server-side only)
//!                        ▼
//!                  one dispatch per output group ──► CallbackHost::register
//!
//! layout ──► Transform::transform_layout (every transform) ──► layout_value
//! ```
//!
//! [`SimulatedHost`] is an in-process host for tests and tooling.

pub mod blueprint;
pub mod config;
pub mod group;
pub mod host;
pub mod transform;

pub use blueprint::{Blueprint, Layout, LayoutFn};
pub use config::{
    BackendKind, BlockingConfig, ConfigError, EnrichConfig, MultiplexerConfig, PrefixConfig,
    ServersideConfig,
};
pub use group::{group_callbacks, partition};
pub use host::{CallbackHost, SimulatedHost};
pub use transform::{
    BlockingPolicy, BlockingTransform, CycleBreakerTransform, LogTransform, MultiplexerTransform,
    NoOutputTransform, PrefixIdTransform, ProxyLocation, ServersideTransform, Transform,
    TriggerTransform,
};
