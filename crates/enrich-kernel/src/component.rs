//! The component tree.
//!
//! Only the parts the engine reads or rewrites are modelled: the component
//! type, its `id`, its element `children` and a bag of other properties.
//! Rendering is the host's business.

use crate::identifier::ComponentId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Opaque per-node payload attached by higher layers (e.g. a composed
/// component definition). Never serialized.
pub type Extension = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ComponentId>,
    /// The id before any rewrite pass touched it.
    #[serde(skip)]
    pub original_id: Option<ComponentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Component>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, Value>,
    #[serde(skip)]
    pub extension: Option<Extension>,
    /// Layout rewrites that already touched this node's id.
    #[serde(skip)]
    pub rewritten_by: BTreeSet<String>,
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.id == other.id
            && self.children == other.children
            && self.props == other.props
    }
}

impl Component {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn div() -> Self {
        Self::new("Div")
    }

    pub fn store() -> Self {
        Self::new("Store")
    }

    /// An invisible placeholder, used as a sink for synthetic outputs.
    pub fn hidden_div(id: impl Into<ComponentId>) -> Self {
        Self::div()
            .with_id(id)
            .with_prop("style", json!({"display": "none"}))
    }

    pub fn with_id(mut self, id: impl Into<ComponentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: Value) -> Self {
        self.props.insert(name.into(), value);
        self
    }

    pub fn with_child(mut self, child: Component) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Component>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Record a rewrite of this node's id. Returns `false` if `rewrite`
    /// already ran on it.
    pub fn mark_rewritten(&mut self, rewrite: &str) -> bool {
        self.rewritten_by.insert(rewrite.to_string())
    }

    pub fn push_child(&mut self, child: Component) {
        self.children.push(child);
    }

    /// Downcast the attached extension.
    pub fn extension_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extension.as_deref().and_then(|ext| ext.downcast_ref::<T>())
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Component)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Pre-order traversal with mutable access. A node's children are visited
    /// after the node itself, so `visit` may replace them.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Component)) {
        visit(self);
        for child in &mut self.children {
            child.walk_mut(visit);
        }
    }

    /// Fallible pre-order traversal with mutable access.
    pub fn try_walk_mut<E>(
        &mut self,
        visit: &mut impl FnMut(&mut Component) -> Result<(), E>,
    ) -> Result<(), E> {
        visit(self)?;
        for child in &mut self.children {
            child.try_walk_mut(visit)?;
        }
        Ok(())
    }

    pub fn find(&self, id: &ComponentId) -> Option<&Component> {
        if self.id.as_ref() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &ComponentId) -> Option<&mut Component> {
        if self.id.as_ref() == Some(id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// All ids in the tree, pre-order.
    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids = Vec::new();
        self.walk(&mut |node| {
            if let Some(id) = &node.id {
                ids.push(id.clone());
            }
        });
        ids
    }

    /// Components whose id is selected by `pattern` (exact for simple ids).
    pub fn find_matching(&self, pattern: &ComponentId) -> Vec<&Component> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if let Some(id) = &node.id
                && pattern.matches(id)
            {
                found.push(node);
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{ALL, StructuredId};

    fn sample() -> Component {
        Component::div().with_children([
            Component::new("Button").with_id("btn"),
            Component::div().with_id("wrap").with_children([
                Component::new("Input").with_id(StructuredId::new().with("type", "in").with("index", 0)),
                Component::new("Input").with_id(StructuredId::new().with("type", "in").with("index", 1)),
            ]),
        ])
    }

    #[test]
    fn ids_are_listed_in_pre_order() {
        let ids: Vec<String> = sample().ids().iter().map(ToString::to_string).collect();
        assert_eq!(
            ids,
            vec![
                "btn".to_string(),
                "wrap".to_string(),
                r#"{"index":0,"type":"in"}"#.to_string(),
                r#"{"index":1,"type":"in"}"#.to_string(),
            ]
        );
    }

    #[test]
    fn find_mut_reaches_nested_nodes() {
        let mut layout = sample();
        let node = layout
            .find_mut(&ComponentId::from("wrap"))
            .expect("wrap should exist");
        node.push_child(Component::store().with_id("extra"));
        assert!(layout.find(&ComponentId::from("extra")).is_some());
    }

    #[test]
    fn pattern_lookup_returns_every_match() {
        let layout = sample();
        let pattern = ComponentId::from(StructuredId::new().with("type", "in").with("index", ALL));
        assert_eq!(layout.find_matching(&pattern).len(), 2);
    }

    #[test]
    fn hidden_div_serializes_with_display_none() {
        let div = Component::hidden_div("sink");
        let value = serde_json::to_value(&div).expect("component should serialize");
        assert_eq!(
            value,
            json!({"type": "Div", "id": "sink", "props": {"style": {"display": "none"}}})
        );
    }

    #[test]
    fn extension_is_downcast_by_type() {
        let node = Component::div().with_extension(Arc::new(42_u32));
        assert_eq!(node.extension_as::<u32>(), Some(&42));
        assert!(node.extension_as::<String>().is_none());
    }
}
