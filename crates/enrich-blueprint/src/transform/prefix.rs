//! Id prefixing, for embedding a blueprint without id collisions.
//!
//! `"x"` becomes `"{prefix}-x"`. In structured ids every string value is
//! prefixed; integers, booleans and wildcards are left alone. The escape
//! predicate keeps selected simple ids (by default anchors: `a-*`,
//! `anchor-*`) untouched.

use super::Transform;
use enrich_kernel::{Callback, Component, ComponentId, EnrichError, IdValue};
use std::fmt;
use std::sync::Arc;

pub const NAME: &str = "prefix";

pub type EscapeFn = dyn Fn(&str) -> bool + Send + Sync;

pub fn default_escape(id: &str) -> bool {
    id.starts_with("a-") || id.starts_with("anchor-")
}

#[derive(Clone)]
pub struct PrefixIdTransform {
    prefix: String,
    escape: Arc<EscapeFn>,
}

impl fmt::Debug for PrefixIdTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixIdTransform")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PrefixIdTransform {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            escape: Arc::new(default_escape),
        }
    }

    pub fn with_escape(mut self, escape: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.escape = Arc::new(escape);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn apply_prefix(&self, id: &ComponentId) -> ComponentId {
        match id {
            ComponentId::Simple(s) if (self.escape)(s) => id.clone(),
            ComponentId::Simple(s) => ComponentId::Simple(format!("{}-{s}", self.prefix)),
            ComponentId::Structured(sid) => {
                let mut out = sid.clone();
                for value in out.values_mut() {
                    if let IdValue::Str(s) = value {
                        *s = format!("{}-{s}", self.prefix);
                    }
                }
                ComponentId::Structured(out)
            }
        }
    }
}

impl Transform for PrefixIdTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        0
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        let mark = format!("{NAME}:{}", self.prefix);
        for callback in &mut callbacks {
            if !callback.mark_applied(&mark) {
                continue;
            }
            for dependency in callback.dependencies_mut() {
                dependency.id = self.apply_prefix(&dependency.id);
            }
        }
        Ok(callbacks)
    }

    fn transform_layout(&self, layout: &mut Component) -> Result<(), EnrichError> {
        let mark = format!("{NAME}:{}", self.prefix);
        layout.walk_mut(&mut |node| {
            let Some(id) = node.id.clone() else {
                return;
            };
            if node.mark_rewritten(&mark) {
                node.id = Some(self.apply_prefix(&id));
            }
        });
        Ok(())
    }
}
