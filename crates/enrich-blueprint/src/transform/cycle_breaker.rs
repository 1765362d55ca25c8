//! Cycle breaking.
//!
//! The host refuses callback graphs with cycles. An input flagged
//! `cycle_breaker` is redirected to `{id}_{prop}_breaker.dst`, a relay
//! component, and a client-side identity callback copies the original
//! property onto the relay's `src`. The relay forwards `src` to `dst` in the
//! browser, outside the callback graph.

use super::{Transform, append_once};
use enrich_kernel::{Callback, ClientsideFunction, Component, ComponentId, Dependency, EnrichError};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

pub const NAME: &str = "cycle_breaker";
pub const BREAKER_KIND: &str = "CycleBreaker";
const IDENTITY: &str = "function(x){return x;}";

#[derive(Debug, Default)]
pub struct CycleBreakerTransform {
    /// Relay id -> the binding it relays.
    relays: BTreeMap<String, (ComponentId, String)>,
}

impl CycleBreakerTransform {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Id of the relay standing in for `dependency`.
pub fn breaker_id(dependency: &Dependency) -> String {
    format!("{}_breaker", dependency.key().replace('.', "_"))
}

impl Transform for CycleBreakerTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        5
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        let mut relay_callbacks = Vec::new();
        for callback in &mut callbacks {
            if !callback.inputs.iter().any(|i| i.options.cycle_breaker) || !callback.mark_applied(NAME) {
                continue;
            }
            for input in callback.inputs.iter_mut().filter(|i| i.options.cycle_breaker) {
                if let Some(&wildcard) = input.wildcards().first() {
                    return Err(EnrichError::UnsupportedWildcard {
                        dependency: input.to_string(),
                        wildcard,
                    });
                }
                let relay = breaker_id(input);
                tracing::debug!(from = %input, relay = %relay, "breaking cycle");
                if let Entry::Vacant(entry) = self.relays.entry(relay.clone()) {
                    let mut identity = Callback::builder()
                        .output(relay.as_str(), "src")
                        .input(input.id.clone(), input.property.clone())
                        .clientside(ClientsideFunction::inline(IDENTITY));
                    identity.mark_applied(NAME);
                    relay_callbacks.push(identity);
                    entry.insert((input.id.clone(), input.property.clone()));
                }
                input.id = ComponentId::from(relay);
                input.property = "dst".to_string();
                input.options.cycle_breaker = false;
            }
        }
        callbacks.extend(relay_callbacks);
        Ok(callbacks)
    }

    fn transform_layout(&self, layout: &mut Component) -> Result<(), EnrichError> {
        for relay in self.relays.keys() {
            append_once(layout, Component::new(BREAKER_KIND).with_id(relay.as_str()));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.relays.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_kernel::{ALL, CallbackFunction, Outcome, StructuredId};
    use serde_json::json;

    fn cyclic_pair() -> Vec<Callback> {
        vec![
            Callback::builder()
                .output("celsius", "value")
                .cycle_breaker_input("fahrenheit", "value")
                .handler("to_celsius", |_, args| {
                    let f = args[0].as_f64().unwrap_or_default();
                    Ok(Outcome::single(json!((f - 32.0) * 5.0 / 9.0)))
                }),
            Callback::builder()
                .output("fahrenheit", "value")
                .input("celsius", "value")
                .handler("to_fahrenheit", |_, args| {
                    let c = args[0].as_f64().unwrap_or_default();
                    Ok(Outcome::single(json!(c * 9.0 / 5.0 + 32.0)))
                }),
        ]
    }

    #[test]
    fn flagged_inputs_read_from_the_relay() {
        let mut transform = CycleBreakerTransform::new();
        let callbacks = transform.apply(cyclic_pair(), None).expect("apply");
        assert_eq!(callbacks.len(), 3);

        let relayed = &callbacks[0].inputs[0];
        assert_eq!(relayed.key(), "fahrenheit_value_breaker.dst");
        assert!(!relayed.options.cycle_breaker);
        assert_eq!(callbacks[1].inputs[0].key(), "celsius.value");

        let identity = &callbacks[2];
        assert_eq!(identity.output_keys(), vec!["fahrenheit_value_breaker.src"]);
        assert_eq!(identity.inputs[0].key(), "fahrenheit.value");
        assert!(matches!(
            &identity.function,
            CallbackFunction::Clientside(ClientsideFunction::Inline(source)) if source == IDENTITY
        ));
    }

    #[test]
    fn relay_is_mounted_once() {
        let mut transform = CycleBreakerTransform::new();
        let mut callbacks = cyclic_pair();
        callbacks.push(
            Callback::builder()
                .output("kelvin", "value")
                .cycle_breaker_input("fahrenheit", "value")
                .handler("to_kelvin", |_, _| Ok(Outcome::Skipped)),
        );
        let callbacks = transform.apply(callbacks, None).expect("apply");
        assert_eq!(callbacks.len(), 4, "one relay callback per relayed binding");

        let mut layout = Component::div();
        transform.transform_layout(&mut layout).expect("layout");
        transform.transform_layout(&mut layout).expect("layout again");
        assert_eq!(layout.ids(), vec![ComponentId::from("fahrenheit_value_breaker")]);
        assert_eq!(layout.children[0].kind, BREAKER_KIND);
    }

    #[test]
    fn applying_twice_leaves_rewritten_callbacks_alone() {
        let mut transform = CycleBreakerTransform::new();
        let once = transform.apply(cyclic_pair(), None).expect("apply");
        let twice = transform.apply(once, None).expect("apply again");
        assert_eq!(twice.len(), 3);
        assert_eq!(twice[0].inputs[0].key(), "fahrenheit_value_breaker.dst");
    }

    #[test]
    fn pattern_inputs_cannot_be_relayed() {
        let callback = Callback::builder()
            .output("out", "children")
            .cycle_breaker_input(StructuredId::new().with("index", ALL), "value")
            .handler("all", |_, _| Ok(Outcome::Skipped));
        let err = CycleBreakerTransform::new()
            .apply(vec![callback], None)
            .expect_err("pattern input");
        assert!(matches!(err, EnrichError::UnsupportedWildcard { .. }));
    }
}
