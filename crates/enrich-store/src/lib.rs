//! # Enrich Store
//!
//! Server-side value storage for callback outputs that should not travel to
//! the browser. Values are written to a [`ServersideBackend`] and the client
//! only ever sees a [`ServersideRef`] string.
//!
//! Backends: [`FileSystemBackend`] (default; shared across processes on one
//! host) and [`MemoryBackend`] (single process). Others plug in through the
//! trait.

pub mod backend;
pub mod error;
pub mod filesystem;
pub mod key;
pub mod memory;

pub use backend::{BackendRegistry, ServersideBackend};
pub use error::StoreError;
pub use filesystem::FileSystemBackend;
pub use key::{KeyMaterial, REFERENCE_PREFIX, ServersideRef, canonical_json_bytes, random_key};
pub use memory::MemoryBackend;
