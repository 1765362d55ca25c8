//! Output multiplexing.
//!
//! The host allows one writer per output. When several callbacks target the
//! same output, each writer is redirected to its own proxy `Store` and a
//! relay callback copies whichever proxy changed last onto the real output.
//!
//! ```text
//! cb_a ─► Store(log_children_proxy_0).data ─┐
//!                                           ├─► relay ─► log.children
//! cb_b ─► Store(log_children_proxy_1).data ─┘
//! ```
//!
//! Structured outputs get structured proxies (the target id plus a
//! `_multiplexer` key), one per concrete component in the layout. Only the
//! `ALL` wildcard can be multiplexed.

use super::Transform;
use super::serverside;
use enrich_kernel::{
    Callback, Component, ComponentId, Dependency, EnrichError, Outcome, StructuredId, Wildcard,
};
use std::collections::{BTreeSet, HashMap};

pub const NAME: &str = "multiplexer";
pub const PROXY_KEY: &str = "_multiplexer";
pub const PROXY_PROPERTY: &str = "data";

/// Where proxy stores are mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxyLocation {
    /// Wrap each target in a `Div` next to its proxies.
    #[default]
    InPlace,
    /// Append all proxies to the given container.
    Container(ComponentId),
}

#[derive(Debug, Clone)]
struct ProxyPlan {
    target: ComponentId,
    property: String,
    count: usize,
}

impl ProxyPlan {
    /// Concrete proxy ids for one concrete target id.
    fn proxies_for(&self, concrete: &ComponentId) -> Vec<ComponentId> {
        (0..self.count)
            .map(|i| proxy_id(concrete, &self.property, i))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MultiplexerTransform {
    location: ProxyLocation,
    plans: Vec<ProxyPlan>,
}

impl MultiplexerTransform {
    pub fn new(location: ProxyLocation) -> Self {
        Self {
            location,
            plans: Vec::new(),
        }
    }
}

impl Transform for MultiplexerTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        40
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        let mut order: Vec<String> = Vec::new();
        let mut writers: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (ci, callback) in callbacks.iter().enumerate() {
            for (oi, output) in callback.outputs.iter().enumerate() {
                let key = output.key_without_wildcards();
                let slots = writers.entry(key.clone()).or_default();
                if slots.is_empty() {
                    order.push(key);
                }
                slots.push((ci, oi));
            }
        }

        let mut relays = Vec::new();
        for key in order {
            let slots = &writers[&key];
            let distinct: BTreeSet<usize> = slots.iter().map(|(ci, _)| *ci).collect();
            if distinct.len() < 2 || shares_group(&callbacks, &distinct) {
                continue;
            }
            for &(ci, oi) in slots {
                let output = &callbacks[ci].outputs[oi];
                if let Some(wildcard) = output.wildcards().into_iter().find(|w| *w != Wildcard::All) {
                    return Err(EnrichError::UnsupportedWildcard {
                        dependency: output.to_string(),
                        wildcard,
                    });
                }
            }

            let (first_ci, first_oi) = slots[0];
            let target = callbacks[first_ci].outputs[first_oi].clone();
            let mut proxies = Vec::with_capacity(slots.len());
            let mut allow_duplicate = false;
            for (i, &(ci, oi)) in slots.iter().enumerate() {
                let output = &mut callbacks[ci].outputs[oi];
                allow_duplicate |= output.options.allow_duplicate;
                let proxy = proxy_id(&output.id, &output.property, i);
                let mut redirected = Dependency::output(proxy.clone(), PROXY_PROPERTY);
                redirected.options.serverside = output.options.serverside.take();
                *output = redirected;
                proxies.push(proxy);
            }
            tracing::debug!(output = %target.key(), writers = proxies.len(), "multiplexing output");

            relays.push(relay(&target, proxies, allow_duplicate));
            self.plans.push(ProxyPlan {
                target: target.id.clone(),
                property: target.property.clone(),
                count: slots.len(),
            });
        }

        callbacks.extend(relays);
        Ok(callbacks)
    }

    fn transform_layout(&self, layout: &mut Component) -> Result<(), EnrichError> {
        for plan in &self.plans {
            let targets: Vec<ComponentId> = match &plan.target {
                ComponentId::Simple(_) => vec![plan.target.clone()],
                pattern => layout
                    .find_matching(pattern)
                    .into_iter()
                    .filter_map(|c| c.id.clone())
                    .collect(),
            };
            for target in targets {
                let stores: Vec<Component> = plan
                    .proxies_for(&target)
                    .into_iter()
                    .filter(|id| layout.find(id).is_none())
                    .map(|id| Component::store().with_id(id))
                    .collect();
                if stores.is_empty() {
                    continue;
                }
                match &self.location {
                    ProxyLocation::InPlace => {
                        if !wrap_target(layout, &target, &stores) {
                            tracing::debug!(target = %target, "output not in layout, mounting proxies at root");
                            layout.children.extend(stores);
                        }
                    }
                    ProxyLocation::Container(container) => {
                        let node = layout.find_mut(container).ok_or_else(|| {
                            EnrichError::Layout(format!("proxy container '{container}' not found"))
                        })?;
                        node.children.extend(stores);
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.plans.clear();
    }
}

fn shares_group(callbacks: &[Callback], members: &BTreeSet<usize>) -> bool {
    let mut labels = members.iter().map(|ci| callbacks[*ci].options.group.as_deref());
    match labels.next() {
        Some(Some(first)) => labels.all(|label| label == Some(first)),
        _ => false,
    }
}

/// Proxy id of the `index`-th writer of `(id, property)`.
pub fn proxy_id(id: &ComponentId, property: &str, index: usize) -> ComponentId {
    match id {
        ComponentId::Simple(s) => ComponentId::Simple(format!("{s}_{property}_proxy_{index}")),
        ComponentId::Structured(sid) => ComponentId::Structured(
            StructuredId::clone(sid).with(PROXY_KEY, format!("{property}_{index}")),
        ),
    }
}

fn relay(target: &Dependency, proxies: Vec<ComponentId>, allow_duplicate: bool) -> Callback {
    let mut output = Dependency::output(target.id.clone(), target.property.clone());
    output.options.allow_duplicate = allow_duplicate;
    let mut builder = Callback::builder().dependency(output).prevent_initial_call();
    for proxy in &proxies {
        builder = builder.input(proxy.clone(), PROXY_PROPERTY);
    }
    let name = format!("multiplexer_relay[{}]", target.key());
    let mut callback = builder.handler(name, move |ctx, args| {
        let Some(triggered) = &ctx.triggered else {
            return Ok(Outcome::Skipped);
        };
        if triggered.property != PROXY_PROPERTY {
            return Ok(Outcome::Skipped);
        }
        let fired = proxies.iter().position(|proxy| proxy.matches(&triggered.id));
        match fired.and_then(|i| args.get(i)) {
            Some(value) => Ok(Outcome::single(value.clone())),
            None => Ok(Outcome::Skipped),
        }
    });
    // Relays forward stored references verbatim.
    callback.mark_applied(serverside::NAME);
    callback.mark_applied(NAME);
    callback
}

fn wrap_target(node: &mut Component, target: &ComponentId, stores: &[Component]) -> bool {
    if node.id.as_ref() == Some(target) {
        let inner = std::mem::take(node);
        *node = Component::div()
            .with_child(inner)
            .with_children(stores.iter().cloned());
        return true;
    }
    node.children
        .iter_mut()
        .any(|child| wrap_target(child, target, stores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_kernel::{ALL, CallbackContext, MATCH, Triggered};
    use serde_json::json;

    fn writer(name: &'static str, input: &str) -> Callback {
        Callback::builder()
            .output("log", "children")
            .input(input, "n_clicks")
            .handler(name, move |_, _| Ok(Outcome::single(json!(name))))
    }

    #[test]
    fn shared_outputs_are_redirected_to_proxies() {
        let mut transform = MultiplexerTransform::default();
        let callbacks = transform
            .apply(vec![writer("a", "btn_a"), writer("b", "btn_b")], None)
            .expect("apply");
        assert_eq!(callbacks.len(), 3);
        assert_eq!(callbacks[0].outputs[0].key(), "log_children_proxy_0.data");
        assert_eq!(callbacks[1].outputs[0].key(), "log_children_proxy_1.data");

        let relay = &callbacks[2];
        assert_eq!(relay.output_keys(), vec!["log.children".to_string()]);
        assert!(relay.options.prevent_initial_call);

        let ctx = CallbackContext::triggered_by(Triggered::new("log_children_proxy_1", "data", json!("b")));
        let outcome = relay.invoke(&ctx, &[json!("a"), json!("b")]).expect("relay runs");
        assert_eq!(outcome, Outcome::single(json!("b")));
    }

    #[test]
    fn relay_skips_without_a_trigger() {
        let mut transform = MultiplexerTransform::default();
        let callbacks = transform
            .apply(vec![writer("a", "x"), writer("b", "y")], None)
            .expect("apply");
        let outcome = callbacks[2]
            .invoke(&CallbackContext::new(), &[json!(1), json!(2)])
            .expect("relay runs");
        assert!(outcome.is_skipped());
    }

    #[test]
    fn single_writers_and_grouped_writers_are_left_alone() {
        let mut transform = MultiplexerTransform::default();
        let lone = writer("a", "x");
        let callbacks = transform.apply(vec![lone], None).expect("apply");
        assert_eq!(callbacks.len(), 1);

        let grouped_a = Callback::builder()
            .output("out", "children")
            .input("x", "value")
            .group("g")
            .handler("ga", |_, _| Ok(Outcome::Skipped));
        let grouped_b = Callback::builder()
            .output("out", "children")
            .input("y", "value")
            .group("g")
            .handler("gb", |_, _| Ok(Outcome::Skipped));
        let callbacks = transform.apply(vec![grouped_a, grouped_b], None).expect("apply");
        assert_eq!(callbacks.len(), 2);
        assert_eq!(callbacks[0].outputs[0].key(), "out.children");
    }

    #[test]
    fn match_wildcards_cannot_be_multiplexed() {
        let pattern = StructuredId::new().with("type", "cell").with("index", MATCH);
        let a = Callback::builder()
            .output(pattern.clone(), "children")
            .input("x", "value")
            .handler("a", |_, _| Ok(Outcome::Skipped));
        let b = Callback::builder()
            .output(pattern, "children")
            .input("y", "value")
            .handler("b", |_, _| Ok(Outcome::Skipped));
        let mut transform = MultiplexerTransform::default();
        let err = transform.apply(vec![a, b], None).expect_err("MATCH is unsupported");
        assert!(matches!(
            err,
            EnrichError::UnsupportedWildcard { wildcard: Wildcard::Match, .. }
        ));
    }

    #[test]
    fn all_wildcards_get_structured_proxies_per_component() {
        let pattern = StructuredId::new().with("type", "cell").with("index", ALL);
        let a = Callback::builder()
            .output(pattern.clone(), "children")
            .input("x", "value")
            .handler("a", |_, _| Ok(Outcome::Skipped));
        let b = Callback::builder()
            .output(pattern, "children")
            .input("y", "value")
            .handler("b", |_, _| Ok(Outcome::Skipped));
        let mut transform = MultiplexerTransform::default();
        let callbacks = transform.apply(vec![a, b], None).expect("apply");
        assert_eq!(
            callbacks[0].outputs[0].key(),
            r#"{"_multiplexer":"children_0","index":["ALL"],"type":"cell"}.data"#
        );

        let cell = |i: i64| {
            Component::div().with_id(StructuredId::new().with("type", "cell").with("index", i))
        };
        let mut layout = Component::div().with_children([cell(0), cell(1)]);
        transform.transform_layout(&mut layout).expect("layout");
        transform.transform_layout(&mut layout).expect("layout again");

        let proxies: Vec<String> = layout
            .ids()
            .iter()
            .filter(|id| id.as_structured().is_some_and(|s| s.contains_key(PROXY_KEY)))
            .map(ToString::to_string)
            .collect();
        assert_eq!(proxies.len(), 4);
        assert!(proxies.contains(&r#"{"_multiplexer":"children_1","index":0,"type":"cell"}"#.to_string()));
    }

    #[test]
    fn in_place_wraps_the_target_and_container_collects() {
        let mut transform = MultiplexerTransform::default();
        transform
            .apply(vec![writer("a", "x"), writer("b", "y")], None)
            .expect("apply");
        let mut layout = Component::div().with_child(Component::div().with_id("log"));
        transform.transform_layout(&mut layout).expect("layout");
        let wrapper = &layout.children[0];
        assert_eq!(wrapper.id, None);
        assert_eq!(wrapper.children[0].id, Some(ComponentId::from("log")));
        assert_eq!(wrapper.children.len(), 3);

        let mut transform = MultiplexerTransform::new(ProxyLocation::Container("proxies".into()));
        transform
            .apply(vec![writer("a", "x"), writer("b", "y")], None)
            .expect("apply");
        let mut layout = Component::div().with_child(Component::div().with_id("proxies"));
        transform.transform_layout(&mut layout).expect("layout");
        assert_eq!(layout.children[0].children.len(), 2);

        let mut missing = Component::div();
        assert!(matches!(
            transform.transform_layout(&mut missing),
            Err(EnrichError::Layout(_))
        ));
    }
}
