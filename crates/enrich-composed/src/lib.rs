//! # Enrich Composed
//!
//! Reusable component classes with their own callbacks, state and aliased
//! properties, usable any number of times in one layout.
//!
//! ## Flow
//!
//! ```text
//! instantiate(definition, id, props) ──► Component (kind = class, extension = Definition)
//!
//! ComposedComponentTransform::apply
//!     collect   layout ──► Scope tree (one scope per class + id shape)
//!     declare   each new scope ──► ComposedComponent::declare_callbacks
//!     rewrite   "self" / aliases / local ids ──► mangled ids
//!
//! ComposedComponentTransform::transform_layout
//!     component ids ──► conform / wrap (see `mangle`)
//! ```
//!
//! Register the transform with a blueprint like any other; it ranks first
//! so every later transform works on mangled ids.

pub mod definition;
pub mod mangle;
pub mod scope;
pub mod transform;

pub use definition::{Alias, ComposedComponent, Definition, ScopeCallbacks, instantiate};
pub use mangle::{CHILD_MARKER, SELF, TYPE_NAME};
pub use scope::Scope;
pub use transform::{ComposedComponentTransform, ComposedRegistry, ScopeInfo};
