//! The transform chain.
//!
//! A transform has two hooks. [`Transform::apply`] rewrites the whole
//! callback set once, before registration. [`Transform::transform_layout`]
//! rewrites the component tree and may run many times (layout functions are
//! re-evaluated on every render), so it must be idempotent.
//!
//! The chain runs in ascending [`Transform::rank`]; ties keep insertion
//! order. Default ranks:
//!
//! ```text
//! composed  -10   prefix   0   cycle-breaker  5   trigger  10   log  20
//! blocking  30   multiplexer 40  no-output 50  serverside 60
//! ```

pub mod blocking;
pub mod cycle_breaker;
pub mod log;
pub mod multiplexer;
pub mod no_output;
pub mod prefix;
pub mod serverside;
pub mod trigger;

pub use blocking::{BlockingPolicy, BlockingTransform};
pub use cycle_breaker::CycleBreakerTransform;
pub use log::LogTransform;
pub use multiplexer::{MultiplexerTransform, ProxyLocation};
pub use no_output::NoOutputTransform;
pub use prefix::PrefixIdTransform;
pub use serverside::ServersideTransform;
pub use trigger::TriggerTransform;

use enrich_kernel::{Callback, Component, EnrichError};
use std::fmt;

pub trait Transform: Send + Sync + fmt::Debug {
    /// Unique name; used to detect missing dependencies and to mark
    /// callbacks as already rewritten.
    fn name(&self) -> &'static str;

    fn rank(&self) -> i32 {
        50
    }

    /// Transforms this one needs in the chain. Added by the blueprint when
    /// no transform with the same name is present.
    fn dependencies(&self) -> Vec<Box<dyn Transform>> {
        Vec::new()
    }

    /// Rewrite the callback set. `layout` is the untransformed layout, when
    /// the blueprint has one.
    fn apply(
        &mut self,
        callbacks: Vec<Callback>,
        layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError>;

    /// Rewrite the component tree. Must be idempotent.
    fn transform_layout(&self, _layout: &mut Component) -> Result<(), EnrichError> {
        Ok(())
    }

    /// Drop state gathered by `apply`.
    fn reset(&mut self) {}
}

/// Append `component` to the root's children unless a component with the
/// same id already exists.
pub(crate) fn append_once(layout: &mut Component, component: Component) {
    if let Some(id) = &component.id
        && layout.find(id).is_some()
    {
        return;
    }
    layout.push_child(component);
}
