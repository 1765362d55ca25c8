//! The scope tree.
//!
//! One [`Scope`] per composed class and id shape found in the layout. The
//! root scope holds every id outside composed components; each composed
//! child opens a scope keyed by its generic id, and instances that share
//! a generic id share (and extend) one scope. Scopes resolve the local ids
//! and aliases used by callbacks into fully mangled ids.

use crate::definition::{Alias, Definition, ScopeCallbacks};
use crate::mangle::{SELF, conform, is_self, make_generic, nest, qualify};
use crate::transform::NAME;
use enrich_kernel::{Callback, Component, ComponentId, EnrichError, StructuredId};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const ROOT_CLASS: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScopeChild {
    local: ComponentId,
    kind: String,
    /// Key of the child's own scope, for composed children.
    scope: Option<String>,
}

/// A resolved `(id, property)` pair.
pub type Resolved = (ComponentId, String);

#[derive(Debug)]
pub struct Scope {
    class: String,
    definition: Option<Definition>,
    generic: StructuredId,
    aliases: BTreeMap<String, Alias>,
    children: Vec<ScopeChild>,
    scopes: BTreeMap<String, Scope>,
}

impl Scope {
    pub fn root() -> Self {
        Self {
            class: ROOT_CLASS.to_string(),
            definition: None,
            generic: StructuredId::new(),
            aliases: BTreeMap::new(),
            children: Vec::new(),
            scopes: BTreeMap::new(),
        }
    }

    fn for_definition(definition: &Definition, generic: StructuredId) -> Self {
        Self {
            class: definition.class_name().to_string(),
            aliases: definition.resolved_aliases(),
            definition: Some(definition.clone()),
            generic,
            children: Vec::new(),
            scopes: BTreeMap::new(),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Pattern matching every instance of this scope.
    pub fn generic(&self) -> &StructuredId {
        &self.generic
    }

    pub fn key(&self) -> String {
        self.generic.to_string()
    }

    pub fn is_root(&self) -> bool {
        self.definition.is_none()
    }

    /// Local ids of the children, in discovery order.
    pub fn children(&self) -> impl Iterator<Item = &ComponentId> {
        self.children.iter().map(|child| &child.local)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    fn owns_properties(&self) -> bool {
        self.definition
            .as_ref()
            .is_some_and(|definition| !definition.properties().is_empty())
    }

    /// Collect `components` and their descendants into this scope, stopping
    /// at composed boundaries (each opens a child scope).
    pub fn absorb<'a>(
        &mut self,
        components: impl IntoIterator<Item = &'a Component>,
    ) -> Result<(), EnrichError> {
        for component in components {
            self.absorb_node(component)?;
        }
        Ok(())
    }

    fn absorb_node(&mut self, node: &Component) -> Result<(), EnrichError> {
        // Already mangled by another pass (embedded layouts).
        if node.rewritten_by.contains(NAME) {
            return Ok(());
        }
        match (&node.id, Definition::of(node)) {
            (Some(id), Some(definition)) => return self.absorb_composed(id, definition, node),
            (Some(id), None) => self.add_child(id, &node.kind, None)?,
            (None, Some(definition)) => {
                return Err(EnrichError::invalid_composed(
                    definition.class_name(),
                    "instances need an id",
                ));
            }
            (None, None) => {}
        }
        self.absorb(&node.children)
    }

    fn absorb_composed(
        &mut self,
        local: &ComponentId,
        definition: &Definition,
        node: &Component,
    ) -> Result<(), EnrichError> {
        let generic = make_generic(&nest(&self.generic, conform(definition.class_name(), local)?));
        let key = generic.to_string();
        self.add_child(local, definition.class_name(), Some(key.clone()))?;
        let scope = match self.scopes.entry(key) {
            Entry::Occupied(entry) => {
                debug!(scope = %entry.key(), id = %local, "merging instance into scope");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                debug!(scope = %entry.key(), class = definition.class_name(), "new scope");
                entry.insert(Scope::for_definition(definition, generic))
            }
        };
        scope.absorb(&node.children)
    }

    fn add_child(
        &mut self,
        local: &ComponentId,
        kind: &str,
        scope: Option<String>,
    ) -> Result<(), EnrichError> {
        if self.children.iter().any(|c| c.local == *local && c.kind == kind) {
            return Ok(());
        }
        // Plain children resolve the same way whatever their kind, so only
        // pairs involving a composed child can be ambiguous.
        let composed = scope.is_some();
        let rivals = self
            .children
            .iter()
            .filter(|c| c.kind != kind && (composed || c.scope.is_some()));
        for other in rivals {
            if other.local == *local {
                return Err(EnrichError::DuplicateId {
                    id: local.clone(),
                    first: other.kind.clone(),
                    second: kind.to_string(),
                });
            }
            if let (ComponentId::Structured(id), Some(theirs)) = (local, other.local.as_structured())
                && theirs.same_shape(id)
            {
                return Err(EnrichError::DuplicateShape {
                    shape: make_generic(id).to_string(),
                    first: other.kind.clone(),
                    second: kind.to_string(),
                });
            }
        }
        self.children.push(ScopeChild {
            local: local.clone(),
            kind: kind.to_string(),
            scope,
        });
        Ok(())
    }

    /// Resolve a local `(id, property)` under `base`, the id of the
    /// instance (or the generic id, for callbacks serving every instance).
    pub fn resolve(
        &self,
        base: &StructuredId,
        id: &ComponentId,
        property: &str,
    ) -> Result<Resolved, EnrichError> {
        self.resolve_chain(base, id, property, &mut Vec::new())
    }

    fn resolve_chain(
        &self,
        base: &StructuredId,
        id: &ComponentId,
        property: &str,
        chain: &mut Vec<(String, String)>,
    ) -> Result<Resolved, EnrichError> {
        if is_self(id) {
            if self.is_root() {
                return Err(self.unresolved(id));
            }
            let Some(alias) = self.aliases.get(property) else {
                return Ok((ComponentId::Structured(base.clone()), property.to_string()));
            };
            let step = format!("{}.{property}", self.key());
            let label = format!("{}.{property}", self.class);
            if chain.iter().any(|(seen, _)| *seen == step) {
                let mut labels: Vec<String> = chain.iter().map(|(_, l)| l.clone()).collect();
                labels.push(label);
                return Err(EnrichError::CyclicAlias {
                    class: self.class.clone(),
                    chain: labels,
                });
            }
            chain.push((step, label));
            return self.resolve_chain(base, &alias.id, &alias.property, chain);
        }

        let child = self
            .children
            .iter()
            .find(|child| child.local == *id)
            .or_else(|| self.children.iter().find(|child| id.matches(&child.local)));
        let Some(child) = child else {
            if self.is_root() {
                warn!(id = %id, property, "id not found in the layout, left unchanged");
                return Ok((id.clone(), property.to_string()));
            }
            return Err(self.unresolved(id));
        };
        let Some(key) = &child.scope else {
            return Ok((qualify(base, id), property.to_string()));
        };
        let scope = self
            .scopes
            .get(key)
            .ok_or_else(|| EnrichError::Layout(format!("scope {key} was never collected")))?;
        let child_base = nest(base, conform(&scope.class, id)?);
        if scope.aliases.contains_key(property) {
            scope.resolve_chain(&child_base, &ComponentId::from(SELF), property, chain)
        } else {
            Ok((ComponentId::Structured(child_base), property.to_string()))
        }
    }

    fn unresolved(&self, id: &ComponentId) -> EnrichError {
        EnrichError::UnresolvedId {
            id: id.clone(),
            scope: self.class.clone(),
        }
    }

    /// Rewrite every dependency of `callback` through [`Scope::resolve`].
    pub fn rewrite(&self, base: &StructuredId, callback: &mut Callback) -> Result<(), EnrichError> {
        for dependency in callback.dependencies_mut() {
            let (id, property) = self.resolve(base, &dependency.id, &dependency.property)?;
            if id != dependency.id || property != dependency.property {
                debug!(from = %dependency, to = %format!("{id}.{property}"), "dependency resolved");
            }
            dependency.id = id;
            dependency.property = property;
        }
        Ok(())
    }

    /// Declare the callbacks of this scope and every scope below it whose
    /// generic id is not in `declared` yet, rewritten to generic ids.
    pub(crate) fn declare_callbacks(
        &self,
        declared: &mut BTreeSet<String>,
        out: &mut Vec<Callback>,
    ) -> Result<(), EnrichError> {
        if let Some(definition) = &self.definition
            && declared.insert(self.key())
        {
            let mut collected = ScopeCallbacks::default();
            definition.declare_callbacks(&mut collected);
            info!(class = %self.class, scope = %self.generic, callbacks = collected.len(), "declaring composed callbacks");
            for mut callback in collected.into_callbacks() {
                self.check_internal(&callback)?;
                self.rewrite(&self.generic, &mut callback)?;
                callback.mark_applied(NAME);
                out.push(callback);
            }
        }
        for scope in self.scopes.values() {
            scope.declare_callbacks(declared, out)?;
        }
        Ok(())
    }

    fn check_internal(&self, callback: &Callback) -> Result<(), EnrichError> {
        let writes_children = callback
            .outputs
            .iter()
            .any(|output| is_self(&output.id) && output.property == "children");
        if writes_children && self.owns_properties() {
            return Err(EnrichError::invalid_composed(
                &self.class,
                format!(
                    "callback '{}' writes self.children, which holds the property stores; \
                     write to an inner component instead",
                    callback.name()
                ),
            ));
        }
        Ok(())
    }

    /// The scope whose generic id matches the mangled `id`.
    pub fn find_scope(&self, id: &StructuredId) -> Option<&Scope> {
        self.scopes.values().find_map(|scope| {
            if scope.generic.matches(id) {
                Some(scope)
            } else {
                scope.find_scope(id)
            }
        })
    }
}
