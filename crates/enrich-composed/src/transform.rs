//! The composed-component transform.
//!
//! `apply` collects the scope tree from the layout (plus explicitly
//! registered instances), declares each scope's callbacks once, and
//! rewrites every dependency to mangled ids. `transform_layout` mangles
//! the ids of the component tree the same way.

use crate::definition::Definition;
use crate::mangle::{conform, make_generic, nest, qualify};
use crate::scope::Scope;
use enrich_blueprint::Transform;
use enrich_kernel::{Callback, Component, ComponentId, EnrichError, StructuredId};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const NAME: &str = "composed";
/// Runs before every other transform so that they see mangled ids.
pub const RANK: i32 = -10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scope as seen from outside the transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    pub class: String,
    pub generic: StructuredId,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Generic ids of the scopes whose callbacks are declared.
    declared: Mutex<BTreeSet<String>>,
    root: Mutex<Option<Scope>>,
}

/// Shared view of what a [`ComposedComponentTransform`] collected. Stays
/// usable once the transform itself has moved into a blueprint.
#[derive(Debug, Clone, Default)]
pub struct ComposedRegistry {
    state: Arc<RegistryState>,
}

impl ComposedRegistry {
    pub fn is_declared(&self, generic: &StructuredId) -> bool {
        lock(&self.state.declared).contains(&generic.to_string())
    }

    /// The scope serving the component with mangled id `id`.
    pub fn find_scope_for_id(&self, id: &ComponentId) -> Result<ScopeInfo, EnrichError> {
        let root = lock(&self.state.root);
        id.as_structured()
            .and_then(|structured| root.as_ref()?.find_scope(structured))
            .map(|scope| ScopeInfo {
                class: scope.class().to_string(),
                generic: scope.generic().clone(),
            })
            .ok_or_else(|| EnrichError::UnresolvedId {
                id: id.clone(),
                scope: "root".to_string(),
            })
    }

    /// Mangle a component created at runtime as a child of the mounted
    /// composed component `parent`.
    ///
    /// Composed components inside `component` must have had their
    /// callbacks declared, either through the layout or through
    /// [`ComposedComponentTransform::register_explicit`].
    pub fn wrap(&self, parent: &ComponentId, mut component: Component) -> Result<Component, EnrichError> {
        let base = parent.as_structured().cloned().ok_or_else(|| {
            EnrichError::Layout(format!("'{parent}' is not the id of a composed component"))
        })?;
        rewrite_ids(&mut component, &base)?;

        let declared = lock(&self.state.declared);
        let mut undeclared = None;
        component.walk(&mut |node| {
            if undeclared.is_none()
                && let (Some(definition), Some(ComponentId::Structured(id))) =
                    (Definition::of(node), &node.id)
                && !declared.contains(&make_generic(id).to_string())
            {
                undeclared = Some(definition.class_name().to_string());
            }
        });
        match undeclared {
            Some(class) => Err(EnrichError::invalid_composed(
                class,
                "no callbacks are declared for this id shape; \
                 register an instance with register_explicit at setup",
            )),
            None => Ok(component),
        }
    }

    fn reset(&self) {
        lock(&self.state.declared).clear();
        *lock(&self.state.root) = None;
    }
}

#[derive(Debug, Default)]
pub struct ComposedComponentTransform {
    registry: ComposedRegistry,
    explicit: Vec<Component>,
}

impl ComposedComponentTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> ComposedRegistry {
        self.registry.clone()
    }

    /// Declare callbacks for a composed component that is only added at
    /// runtime. Any instance with the id shape of the runtime instances
    /// will do.
    pub fn register_explicit(&mut self, component: Component) -> Result<(), EnrichError> {
        if Definition::of(&component).is_none() {
            return Err(EnrichError::invalid_composed(
                component.kind.clone(),
                "only composed component instances can be registered",
            ));
        }
        self.explicit.push(component);
        Ok(())
    }
}

impl Transform for ComposedComponentTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        RANK
    }

    fn apply(
        &mut self,
        callbacks: Vec<Callback>,
        layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        let mut root = Scope::root();
        if let Some(layout) = layout {
            root.absorb([layout])?;
        }
        root.absorb(&self.explicit)?;

        let mut declared_callbacks = Vec::new();
        root.declare_callbacks(&mut lock(&self.registry.state.declared), &mut declared_callbacks)?;

        let base = StructuredId::new();
        let mut resolved = Vec::with_capacity(callbacks.len() + declared_callbacks.len());
        for mut callback in callbacks {
            if callback.mark_applied(NAME) {
                root.rewrite(&base, &mut callback)?;
            }
            resolved.push(callback);
        }
        resolved.extend(declared_callbacks);

        *lock(&self.registry.state.root) = Some(root);
        Ok(resolved)
    }

    fn transform_layout(&self, layout: &mut Component) -> Result<(), EnrichError> {
        rewrite_ids(layout, &StructuredId::new())
    }

    fn reset(&mut self) {
        self.registry.reset();
    }
}

/// Mangle the ids of `node` and its descendants under `base`. Nodes this
/// pass already rewrote are skipped with their subtree.
fn rewrite_ids(node: &mut Component, base: &StructuredId) -> Result<(), EnrichError> {
    if node.rewritten_by.contains(NAME) {
        return Ok(());
    }
    let mut inner = None;
    if let Some(id) = node.id.clone() {
        let rewritten = match Definition::of(node) {
            Some(definition) => {
                let full = nest(base, conform(definition.class_name(), &id)?);
                inner = Some(full.clone());
                ComponentId::Structured(full)
            }
            None => qualify(base, &id),
        };
        if rewritten != id {
            debug!(from = %id, to = %rewritten, "id mangled");
        }
        node.original_id.get_or_insert(id);
        node.id = Some(rewritten);
        node.mark_rewritten(NAME);
    }
    let base = inner.as_ref().unwrap_or(base);
    for child in &mut node.children {
        rewrite_ids(child, base)?;
    }
    Ok(())
}
