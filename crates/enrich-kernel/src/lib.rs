//! # Enrich Kernel
//!
//! The vocabulary shared by every enrich layer: how components are
//! identified, how callbacks bind to their properties, and what a callback
//! hands back to the host.
//!
//! ## Architecture
//!
//! ```text
//! ComponentId        ← simple token | flat key → value map (with wildcards)
//!     │
//! Dependency         ← (id, property, role) + per-binding options
//!     │
//! Callback           ← outputs / inputs / states + handler + options
//!     │
//! Outcome            ← Updated(values) | Skipped
//! ```
//!
//! Nothing here registers, renders or stores anything.

pub mod callback;
pub mod component;
pub mod context;
pub mod dependency;
pub mod error;
pub mod identifier;

pub use callback::{
    Callback, CallbackBuilder, CallbackFunction, CallbackOptions, ClientsideFunction, Handler,
    HandlerFn, Outcome, OutputValue,
};
pub use component::{Component, Extension};
pub use context::{CallbackContext, LogLevel, LogRecord, LogSink, Triggered};
pub use dependency::{Dependency, DependencyOptions, Role, ServersideOptions};
pub use error::{CallbackError, EnrichError};
pub use identifier::{ALL, ALL_SMALLER, ComponentId, IdValue, MATCH, StructuredId, Wildcard};
