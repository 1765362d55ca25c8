//! The host contract and an in-process host.
//!
//! A host accepts registered callbacks and, when a property changes, calls
//! every callback subscribed to it. [`SimulatedHost`] does this in memory:
//! it mounts a component tree, keeps every component's props, assembles
//! handler arguments (a list for `ALL` patterns, the triggering component's
//! value for `MATCH`), writes outputs back and cascades to callbacks fed by
//! those outputs.

use enrich_kernel::{
    Callback, CallbackContext, CallbackError, Component, ComponentId, Dependency, EnrichError,
    IdValue, Outcome, OutputValue, StructuredId, Triggered, Wildcard,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// What a blueprint needs from the framework it registers into.
pub trait CallbackHost {
    fn register(&mut self, callback: Callback) -> Result<(), EnrichError>;
}

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
struct Mounted {
    id: ComponentId,
    props: BTreeMap<String, Value>,
}

/// Components an id resolves to.
enum Targets {
    One(ComponentId),
    Many(Vec<ComponentId>),
}

#[derive(Debug)]
pub struct SimulatedHost {
    nodes: Vec<Mounted>,
    callbacks: Vec<Callback>,
    /// Output key → whether every writer so far allows duplicates.
    writers: HashMap<String, bool>,
    session_id: Option<String>,
    max_depth: usize,
    history: Vec<String>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            callbacks: Vec::new(),
            writers: HashMap::new(),
            session_id: None,
            max_depth: DEFAULT_MAX_DEPTH,
            history: Vec::new(),
        }
    }
}

impl CallbackHost for SimulatedHost {
    fn register(&mut self, callback: Callback) -> Result<(), EnrichError> {
        for output in &callback.outputs {
            let key = output.key();
            if let Some(&shared) = self.writers.get(&key)
                && !(shared && output.options.allow_duplicate)
            {
                return Err(EnrichError::invalid_callback(
                    callback.name(),
                    format!("output '{key}' already has a writer"),
                ));
            }
        }
        for output in &callback.outputs {
            let allow = output.options.allow_duplicate;
            self.writers
                .entry(output.key())
                .and_modify(|shared| *shared &= allow)
                .or_insert(allow);
        }
        tracing::debug!(callback = %callback.name(), outputs = callback.outputs.len(), "registered");
        self.callbacks.push(callback);
        Ok(())
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Bound on chained updates started by one prop change.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Replace the mounted tree. Ids must be unique.
    pub fn mount(&mut self, layout: &Component) -> Result<(), EnrichError> {
        let mut nodes: Vec<Mounted> = Vec::new();
        let mut duplicate = None;
        layout.walk(&mut |node| {
            let Some(id) = &node.id else {
                return;
            };
            if nodes.iter().any(|m| &m.id == id) {
                duplicate.get_or_insert_with(|| id.clone());
                return;
            }
            nodes.push(Mounted {
                id: id.clone(),
                props: node.props.clone(),
            });
        });
        if let Some(id) = duplicate {
            return Err(EnrichError::Layout(format!("duplicate component id '{id}'")));
        }
        self.nodes = nodes;
        Ok(())
    }

    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    /// Names of the callbacks invoked so far, in order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_mounted(&self, id: &ComponentId) -> bool {
        self.nodes.iter().any(|m| &m.id == id)
    }

    pub fn get_prop(&self, id: impl Into<ComponentId>, property: &str) -> Option<&Value> {
        let id = id.into();
        self.nodes
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.props.get(property))
    }

    /// Change a prop as the browser would, then run every callback it
    /// fires, and the callbacks their outputs fire in turn.
    pub fn set_prop(
        &mut self,
        id: impl Into<ComponentId>,
        property: impl Into<String>,
        value: Value,
    ) -> Result<(), CallbackError> {
        let id = id.into();
        let property = property.into();
        self.write(&id, &property, value.clone());
        let queue = VecDeque::from([(Triggered::new(id, property, value), 0)]);
        self.drain(queue)
    }

    /// Run every server-side callback without `prevent_initial_call`, with
    /// no trigger, in registration order.
    pub fn run_initial_callbacks(&mut self) -> Result<(), CallbackError> {
        let initial: Vec<usize> = self
            .callbacks
            .iter()
            .enumerate()
            .filter(|(_, cb)| !cb.is_clientside() && !cb.options.prevent_initial_call)
            .map(|(i, _)| i)
            .collect();
        for index in initial {
            let ctx = self.context(None);
            let changes = self.run(index, &ctx)?;
            self.drain(changes.into_iter().map(|t| (t, 1)).collect())?;
        }
        Ok(())
    }

    fn context(&self, triggered: Option<Triggered>) -> CallbackContext {
        CallbackContext {
            triggered,
            session_id: self.session_id.clone(),
            log: None,
        }
    }

    fn drain(&mut self, mut queue: VecDeque<(Triggered, usize)>) -> Result<(), CallbackError> {
        while let Some((triggered, depth)) = queue.pop_front() {
            if depth > self.max_depth {
                return Err(CallbackError::Handler(format!(
                    "update cascade through '{}' exceeded {} levels",
                    triggered.prop_id(),
                    self.max_depth
                )));
            }
            let fired: Vec<usize> = self
                .callbacks
                .iter()
                .enumerate()
                .filter(|(_, cb)| cb.is_triggered_by(&triggered.id, &triggered.property))
                .map(|(i, _)| i)
                .collect();
            for index in fired {
                if self.callbacks[index].is_clientside() {
                    tracing::debug!(callback = %self.callbacks[index].name(), "client-side callback left to the browser");
                    continue;
                }
                let ctx = self.context(Some(triggered.clone()));
                let changes = self.run(index, &ctx)?;
                queue.extend(changes.into_iter().map(|t| (t, depth + 1)));
            }
        }
        Ok(())
    }

    fn run(&mut self, index: usize, ctx: &CallbackContext) -> Result<Vec<Triggered>, CallbackError> {
        let trigger = ctx.triggered_id();
        let callback = &self.callbacks[index];
        let args: Vec<Value> = callback
            .inputs
            .iter()
            .chain(&callback.states)
            .map(|dep| self.gather(dep, trigger))
            .collect();
        let name = callback.name();
        let outcome = callback.invoke(ctx, &args)?;
        let outputs = callback.outputs.clone();
        self.history.push(name);
        match outcome {
            Outcome::Skipped => Ok(Vec::new()),
            Outcome::Updated(values) => self.apply(&outputs, values, trigger),
        }
    }

    fn gather(&self, dep: &Dependency, trigger: Option<&ComponentId>) -> Value {
        match self.targets(&dep.id, trigger) {
            None => Value::Null,
            Some(Targets::One(id)) => self.get_prop(id, &dep.property).cloned().unwrap_or(Value::Null),
            Some(Targets::Many(ids)) => Value::Array(
                ids.into_iter()
                    .map(|id| self.get_prop(id, &dep.property).cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    fn apply(
        &mut self,
        outputs: &[Dependency],
        values: Vec<OutputValue>,
        trigger: Option<&ComponentId>,
    ) -> Result<Vec<Triggered>, CallbackError> {
        if values.len() != outputs.len() {
            return Err(CallbackError::Handler(format!(
                "{} values returned for {} outputs",
                values.len(),
                outputs.len()
            )));
        }
        let mut changes = Vec::new();
        for (output, value) in outputs.iter().zip(values) {
            let OutputValue::Set(value) = value else {
                continue;
            };
            match self.targets(&output.id, trigger) {
                None => {
                    tracing::debug!(output = %output.key(), "no component matched the output");
                }
                Some(Targets::One(id)) => {
                    self.write(&id, &output.property, value.clone());
                    changes.push(Triggered::new(id, output.property.as_str(), value));
                }
                Some(Targets::Many(ids)) => {
                    let items = match value {
                        Value::Array(items) if items.len() == ids.len() => items,
                        _ => {
                            return Err(CallbackError::Handler(format!(
                                "output '{}' matches {} components and needs a list of that length",
                                output.key(),
                                ids.len()
                            )));
                        }
                    };
                    for (id, item) in ids.into_iter().zip(items) {
                        self.write(&id, &output.property, item.clone());
                        changes.push(Triggered::new(id, output.property.as_str(), item));
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Resolve a dependency id against the mounted tree. `MATCH` takes the
    /// triggering id's value; `ALL` and `ALLSMALLER` select every match in
    /// mount order.
    fn targets(&self, id: &ComponentId, trigger: Option<&ComponentId>) -> Option<Targets> {
        let ComponentId::Structured(pattern) = id else {
            return Some(Targets::One(id.clone()));
        };
        if !pattern.is_pattern() {
            return Some(Targets::One(id.clone()));
        }
        let trigger = trigger.and_then(ComponentId::as_structured);
        let mut resolved = StructuredId::new();
        let mut smaller_than: Vec<(&str, i64)> = Vec::new();
        for (key, value) in pattern.iter() {
            match value.wildcard() {
                Some(Wildcard::Match) => {
                    let bound = trigger.and_then(|t| t.get(key)).filter(|v| !v.is_wildcard())?;
                    resolved.insert(key, bound.clone());
                }
                Some(Wildcard::AllSmaller) => {
                    if let Some(IdValue::Int(limit)) = trigger.and_then(|t| t.get(key)) {
                        smaller_than.push((key, *limit));
                    }
                    resolved.insert(key, value.clone());
                }
                _ => {
                    resolved.insert(key, value.clone());
                }
            }
        }
        if !resolved.is_pattern() {
            return Some(Targets::One(ComponentId::Structured(resolved)));
        }
        let resolved = ComponentId::Structured(resolved);
        let ids = self
            .nodes
            .iter()
            .map(|m| &m.id)
            .filter(|candidate| resolved.matches(candidate))
            .filter(|candidate| {
                smaller_than.iter().all(|(key, limit)| {
                    matches!(
                        candidate.as_structured().and_then(|s| s.get(key)),
                        Some(IdValue::Int(v)) if v < limit
                    )
                })
            })
            .cloned()
            .collect();
        Some(Targets::Many(ids))
    }

    fn write(&mut self, id: &ComponentId, property: &str, value: Value) {
        match self.nodes.iter_mut().find(|m| &m.id == id) {
            Some(node) => {
                node.props.insert(property.to_string(), value);
            }
            None => {
                tracing::debug!(id = %id, property, "writing to an unmounted component");
                self.nodes.push(Mounted {
                    id: id.clone(),
                    props: BTreeMap::from([(property.to_string(), value)]),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_kernel::{ALL, MATCH};
    use serde_json::json;

    fn items(n: i64) -> Component {
        Component::div().with_children((0..n).map(|i| {
            Component::new("Input")
                .with_id(StructuredId::new().with("type", "item").with("index", i))
                .with_prop("value", json!(i * 10))
        }))
    }

    #[test]
    fn second_writer_needs_allow_duplicate_on_both_sides() {
        let writer = |name: &'static str, dup: bool| {
            let mut output = Dependency::output("out", "children");
            output.options.allow_duplicate = dup;
            Callback::builder()
                .dependency(output)
                .input(name, "n_clicks")
                .handler(name, |_, _| Ok(Outcome::Skipped))
        };
        let mut host = SimulatedHost::new();
        host.register(writer("a", false)).expect("first writer");
        assert!(matches!(
            host.register(writer("b", true)),
            Err(EnrichError::InvalidCallback { .. })
        ));

        let mut host = SimulatedHost::new();
        host.register(writer("a", true)).expect("first writer");
        host.register(writer("b", true)).expect("duplicates allowed");
    }

    #[test]
    fn outputs_cascade_into_dependent_callbacks() {
        let mut host = SimulatedHost::new();
        host.mount(&Component::div().with_children([
            Component::new("Input").with_id("in"),
            Component::div().with_id("mid"),
            Component::div().with_id("out"),
        ]))
        .expect("mount");
        host.register(
            Callback::builder()
                .output("mid", "children")
                .input("in", "value")
                .handler("double", |_, args| {
                    Ok(Outcome::single(json!(args[0].as_i64().unwrap_or(0) * 2)))
                }),
        )
        .expect("register");
        host.register(
            Callback::builder()
                .output("out", "children")
                .input("mid", "children")
                .handler("show", |_, args| Ok(Outcome::single(json!(format!("= {}", args[0])))))
        )
        .expect("register");

        host.set_prop("in", "value", json!(21)).expect("set_prop");
        assert_eq!(host.get_prop("mid", "children"), Some(&json!(42)));
        assert_eq!(host.get_prop("out", "children"), Some(&json!("= 42")));
        assert_eq!(host.history(), ["double", "show"]);
    }

    #[test]
    fn all_patterns_gather_lists_and_fan_out() {
        let mut host = SimulatedHost::new();
        host.mount(&items(3).with_child(Component::new("Button").with_id("reset")))
            .expect("mount");
        let pattern = StructuredId::new().with("type", "item").with("index", ALL);
        host.register(
            Callback::builder()
                .output(pattern.clone(), "value")
                .input("reset", "n_clicks")
                .state(pattern, "value")
                .handler("reset", |_, args| {
                    let n = args[1].as_array().map_or(0, Vec::len);
                    Ok(Outcome::single(json!(vec![0; n])))
                }),
        )
        .expect("register");

        host.set_prop("reset", "n_clicks", json!(1)).expect("set_prop");
        for i in 0..3 {
            let id = StructuredId::new().with("type", "item").with("index", i);
            assert_eq!(host.get_prop(id, "value"), Some(&json!(0)));
        }
    }

    #[test]
    fn match_patterns_bind_to_the_triggering_component() {
        let mut host = SimulatedHost::new();
        let mut layout = items(2);
        for i in 0..2 {
            layout.push_child(
                Component::div().with_id(StructuredId::new().with("type", "label").with("index", i)),
            );
        }
        host.mount(&layout).expect("mount");
        host.register(
            Callback::builder()
                .output(StructuredId::new().with("type", "label").with("index", MATCH), "children")
                .input(StructuredId::new().with("type", "item").with("index", MATCH), "value")
                .handler("label", |_, args| Ok(Outcome::single(json!(format!("v={}", args[0])))))
        )
        .expect("register");

        let second = StructuredId::new().with("type", "item").with("index", 1);
        host.set_prop(second, "value", json!(7)).expect("set_prop");
        let label = |i: i64| StructuredId::new().with("type", "label").with("index", i);
        assert_eq!(host.get_prop(label(1), "children"), Some(&json!("v=7")));
        assert_eq!(host.get_prop(label(0), "children"), None);
    }

    #[test]
    fn runaway_cascades_are_cut_off() {
        let mut host = SimulatedHost::new().with_max_depth(4);
        host.register(
            Callback::builder()
                .output("counter", "data")
                .input("counter", "data")
                .handler("loop", |_, args| {
                    Ok(Outcome::single(json!(args[0].as_i64().unwrap_or(0) + 1)))
                }),
        )
        .expect("register");
        let err = host.set_prop("counter", "data", json!(0)).expect_err("loop should be cut");
        assert!(matches!(err, CallbackError::Handler(_)));
    }

    #[test]
    fn initial_callbacks_respect_prevent_initial_call() {
        let mut host = SimulatedHost::new().with_session("s1");
        host.register(
            Callback::builder()
                .output("a", "children")
                .input("x", "value")
                .handler("initial", |ctx, _| Ok(Outcome::single(json!(ctx.session_id)))),
        )
        .expect("register");
        host.register(
            Callback::builder()
                .output("b", "children")
                .input("x", "value")
                .prevent_initial_call()
                .handler("prevented", |_, _| Ok(Outcome::single(json!("ran")))),
        )
        .expect("register");

        host.run_initial_callbacks().expect("initial callbacks");
        assert_eq!(host.get_prop("a", "children"), Some(&json!("s1")));
        assert_eq!(host.get_prop("b", "children"), None);
    }

    #[test]
    fn duplicate_ids_in_the_layout_are_rejected() {
        let mut host = SimulatedHost::new();
        let layout = Component::div()
            .with_children([Component::div().with_id("x"), Component::div().with_id("x")]);
        assert!(matches!(host.mount(&layout), Err(EnrichError::Layout(_))));
    }
}
