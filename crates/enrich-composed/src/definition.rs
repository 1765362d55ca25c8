//! Composed component definitions and their instances.

use enrich_kernel::{
    Callback, CallbackBuilder, ClientsideFunction, Component, ComponentId, EnrichError,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Prop of the `Store` children that hold a component's own properties.
pub const PROPERTY_PROP: &str = "data";

/// A named property forwarded to `(id, property)`: a child's property, or
/// (with id `"self"`) another property of the component itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub id: ComponentId,
    pub property: String,
}

impl Alias {
    pub fn new(id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            property: property.into(),
        }
    }
}

/// A reusable component class with its own children, state and callbacks.
///
/// Callbacks declared in [`ComposedComponent::declare_callbacks`] use local
/// ids: `"self"` for the component itself (with its properties and
/// aliases), or the ids its layout gave to children. They are declared once
/// per class and id shape and serve every instance.
pub trait ComposedComponent: Send + Sync + 'static {
    /// Unique name of the class; tagged into every instance id.
    fn class_name(&self) -> &str;

    /// Own properties, each kept in a hidden `Store` child.
    fn properties(&self) -> Vec<String> {
        Vec::new()
    }

    fn aliases(&self) -> BTreeMap<String, Alias> {
        BTreeMap::new()
    }

    /// Children of an instance, given the initial values of its properties
    /// and aliases.
    fn layout(&self, props: &BTreeMap<String, Value>) -> Vec<Component>;

    fn declare_callbacks(&self, _callbacks: &mut ScopeCallbacks) {}
}

/// Shared handle to a definition, attached to every instance as the
/// component's extension.
#[derive(Clone)]
pub struct Definition(Arc<dyn ComposedComponent>);

impl Definition {
    pub fn new(definition: impl ComposedComponent) -> Self {
        Self(Arc::new(definition))
    }

    /// The definition behind a component, if it is a composed instance.
    pub fn of(component: &Component) -> Option<&Definition> {
        component.extension_as::<Definition>()
    }

    /// Own properties first, as aliases to their stores, then the declared
    /// aliases.
    pub fn resolved_aliases(&self) -> BTreeMap<String, Alias> {
        let mut aliases: BTreeMap<String, Alias> = self
            .properties()
            .into_iter()
            .map(|property| {
                let alias = Alias::new(property.as_str(), PROPERTY_PROP);
                (property, alias)
            })
            .collect();
        aliases.extend(self.aliases());
        aliases
    }
}

impl Deref for Definition {
    type Target = dyn ComposedComponent;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Definition").field(&self.class_name()).finish()
    }
}

/// Build an instance: the definition's layout followed by one `Store` per
/// own property, under a component of kind `class_name`.
///
/// `props` carries initial values for properties and aliases; unset
/// properties start as `null`.
pub fn instantiate(
    definition: &Definition,
    id: impl Into<ComponentId>,
    props: BTreeMap<String, Value>,
) -> Result<Component, EnrichError> {
    let class = definition.class_name().to_string();
    let properties = definition.properties();
    let aliases = definition.aliases();

    let clashing: Vec<&String> = properties.iter().filter(|p| aliases.contains_key(*p)).collect();
    if !clashing.is_empty() {
        return Err(EnrichError::invalid_composed(
            class,
            format!("properties {clashing:?} are also declared as aliases"),
        ));
    }
    if let Some(unknown) = props
        .keys()
        .find(|key| !properties.contains(*key) && !aliases.contains_key(*key))
    {
        return Err(EnrichError::invalid_composed(
            class,
            format!("unknown property '{unknown}'"),
        ));
    }

    let stores = properties.iter().map(|property| {
        Component::store()
            .with_id(property.as_str())
            .with_prop(PROPERTY_PROP, props.get(property).cloned().unwrap_or(Value::Null))
    });
    let children: Vec<Component> = definition.layout(&props).into_iter().chain(stores).collect();

    Ok(Component::new(class)
        .with_id(id)
        .with_children(children)
        .with_extension(Arc::new(definition.clone())))
}

/// Collects the callbacks a definition declares, still in local ids.
#[derive(Debug, Default)]
pub struct ScopeCallbacks {
    callbacks: Vec<Callback>,
}

impl ScopeCallbacks {
    pub fn add(&mut self, callback: Callback) {
        self.callbacks.push(callback);
    }

    pub fn add_clientside(&mut self, builder: CallbackBuilder, function: ClientsideFunction) {
        self.callbacks.push(builder.clientside(function));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn into_callbacks(self) -> Vec<Callback> {
        self.callbacks
    }
}
