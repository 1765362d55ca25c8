//! The callback model.
//!
//! A [`Callback`] binds ordered output, input and state dependencies to a
//! function. Server-side functions are Rust closures wrapped in a
//! [`Handler`]; client-side functions are JavaScript the host ships to the
//! browser. Transforms rewrite callbacks in place before registration, most
//! often by wrapping the handler with [`Callback::map_handler`].
//!
//! Handlers receive the input values (triggers included, unless a transform
//! filtered them) followed by the state values, and answer with an
//! [`Outcome`]: either one [`OutputValue`] per output, or
//! [`Outcome::Skipped`] to prevent the update altogether.

use crate::context::{CallbackContext, Triggered};
use crate::dependency::{Dependency, Role};
use crate::error::CallbackError;
use crate::identifier::ComponentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The value a handler produces for one output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Set(Value),
    /// Leave the output untouched.
    NoUpdate,
}

impl OutputValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            OutputValue::Set(value) => Some(value),
            OutputValue::NoUpdate => None,
        }
    }

    pub fn is_no_update(&self) -> bool {
        matches!(self, OutputValue::NoUpdate)
    }
}

impl From<Value> for OutputValue {
    fn from(value: Value) -> Self {
        OutputValue::Set(value)
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Updated(Vec<OutputValue>),
    /// Prevent the update of every output.
    Skipped,
}

impl Outcome {
    /// Every element set.
    pub fn values(values: impl IntoIterator<Item = Value>) -> Self {
        Outcome::Updated(values.into_iter().map(OutputValue::Set).collect())
    }

    pub fn single(value: Value) -> Self {
        Outcome::Updated(vec![OutputValue::Set(value)])
    }

    /// `n` outputs, none of them updated.
    pub fn no_update(n: usize) -> Self {
        Outcome::Updated(vec![OutputValue::NoUpdate; n])
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }

    /// Expand into exactly `n` output slots; `Skipped` becomes `NoUpdate`s.
    /// An `Updated` with any other length is a handler fault.
    pub fn into_slots(self, n: usize) -> Result<Vec<OutputValue>, CallbackError> {
        match self {
            Outcome::Skipped => Ok(vec![OutputValue::NoUpdate; n]),
            Outcome::Updated(values) if values.len() == n => Ok(values),
            Outcome::Updated(values) => Err(CallbackError::Handler(format!(
                "returned {} values for {n} outputs",
                values.len()
            ))),
        }
    }
}

pub type HandlerFn =
    dyn Fn(&CallbackContext, &[Value]) -> Result<Outcome, CallbackError> + Send + Sync;

/// A named server-side function.
#[derive(Clone)]
pub struct Handler {
    name: String,
    func: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallbackContext, &[Value]) -> Result<Outcome, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, ctx: &CallbackContext, args: &[Value]) -> Result<Outcome, CallbackError> {
        (self.func)(ctx, args)
    }

    /// Wrap this handler, keeping its name.
    pub fn wrap<F>(self, wrapper: F) -> Handler
    where
        F: Fn(&Handler, &CallbackContext, &[Value]) -> Result<Outcome, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        let name = self.name.clone();
        let inner = self;
        Handler::new(name, move |ctx, args| wrapper(&inner, ctx, args))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish_non_exhaustive()
    }
}

/// JavaScript executed by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientsideFunction {
    /// Inline function source.
    Inline(String),
    /// `window.dash_clientside[namespace][function_name]`.
    Namespaced {
        namespace: String,
        function_name: String,
    },
}

impl ClientsideFunction {
    pub fn inline(source: impl Into<String>) -> Self {
        ClientsideFunction::Inline(source.into())
    }

    pub fn namespaced(namespace: impl Into<String>, function_name: impl Into<String>) -> Self {
        ClientsideFunction::Namespaced {
            namespace: namespace.into(),
            function_name: function_name.into(),
        }
    }

    /// A JavaScript expression evaluating to the function.
    pub fn expression(&self) -> String {
        match self {
            ClientsideFunction::Inline(source) => source.trim().to_string(),
            ClientsideFunction::Namespaced {
                namespace,
                function_name,
            } => format!("window.dash_clientside['{namespace}']['{function_name}']"),
        }
    }

    fn label(&self) -> String {
        match self {
            ClientsideFunction::Inline(source) => {
                let digest = Sha256::digest(source.as_bytes());
                format!("clientside_{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3])
            }
            ClientsideFunction::Namespaced {
                namespace,
                function_name,
            } => format!("{namespace}.{function_name}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallbackFunction {
    Server(Handler),
    Clientside(ClientsideFunction),
}

/// Per-callback flags read by transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackOptions {
    /// Reuse server-side values cached for identical arguments.
    #[serde(default)]
    pub memoize: bool,
    /// Never run two invocations of this callback concurrently.
    #[serde(default)]
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking_timeout_ms: Option<u64>,
    #[serde(default)]
    pub prevent_initial_call: bool,
    /// Force callbacks with the same label into one dispatch group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Install a log sink and render its records into the log output.
    #[serde(default)]
    pub log: bool,
    /// Options passed through to the host untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Callback {
    pub outputs: Vec<Dependency>,
    /// `Input` and `Trigger` dependencies, in declaration order.
    pub inputs: Vec<Dependency>,
    pub states: Vec<Dependency>,
    pub function: CallbackFunction,
    pub options: CallbackOptions,
    /// Names of the transforms that already rewrote this callback.
    pub applied: BTreeSet<String>,
}

impl Callback {
    pub fn builder() -> CallbackBuilder {
        CallbackBuilder::default()
    }

    pub fn name(&self) -> String {
        match &self.function {
            CallbackFunction::Server(handler) => handler.name().to_string(),
            CallbackFunction::Clientside(function) => function.label(),
        }
    }

    /// Stable identifier: UUID bytes taken from a SHA-256 digest of the
    /// function name and the input keys.
    pub fn uid(&self) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        for input in &self.inputs {
            hasher.update(b"\0");
            hasher.update(input.key().as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0_u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    pub fn handler(&self) -> Option<&Handler> {
        match &self.function {
            CallbackFunction::Server(handler) => Some(handler),
            CallbackFunction::Clientside(_) => None,
        }
    }

    pub fn is_clientside(&self) -> bool {
        matches!(self.function, CallbackFunction::Clientside(_))
    }

    /// Replace the server-side handler; no-op for client-side callbacks.
    pub fn map_handler(&mut self, wrap: impl FnOnce(Handler) -> Handler) {
        if let CallbackFunction::Server(handler) = &self.function {
            let wrapped = wrap(handler.clone());
            self.function = CallbackFunction::Server(wrapped);
        }
    }

    /// Record that `transform` rewrote this callback. Returns `false` if it
    /// already had, so re-running a chain (e.g. after embedding) is a no-op.
    pub fn mark_applied(&mut self, transform: &str) -> bool {
        self.applied.insert(transform.to_string())
    }

    /// `true` for each input declared with the `Trigger` role.
    pub fn trigger_mask(&self) -> Vec<bool> {
        self.inputs.iter().map(|dep| dep.role == Role::Trigger).collect()
    }

    pub fn has_triggers(&self) -> bool {
        self.inputs.iter().any(|dep| dep.role == Role::Trigger)
    }

    /// Number of positional arguments the host passes (inputs then states).
    pub fn arg_count(&self) -> usize {
        self.inputs.len() + self.states.len()
    }

    pub fn output_keys(&self) -> Vec<String> {
        self.outputs.iter().map(Dependency::key).collect()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.outputs.iter().chain(&self.inputs).chain(&self.states)
    }

    pub fn dependencies_mut(&mut self) -> impl Iterator<Item = &mut Dependency> {
        self.outputs
            .iter_mut()
            .chain(self.inputs.iter_mut())
            .chain(self.states.iter_mut())
    }

    /// Whether a change of `(id, property)` fires this callback.
    pub fn is_triggered_by(&self, id: &ComponentId, property: &str) -> bool {
        self.inputs.iter().any(|dep| dep.matches_trigger(id, property))
    }

    /// Run the server-side handler. Client-side callbacks cannot be invoked
    /// in-process.
    pub fn invoke(&self, ctx: &CallbackContext, args: &[Value]) -> Result<Outcome, CallbackError> {
        match &self.function {
            CallbackFunction::Server(handler) => handler.call(ctx, args),
            CallbackFunction::Clientside(_) => Err(CallbackError::Handler(format!(
                "client-side callback '{}' cannot run on the server",
                self.name()
            ))),
        }
    }

    /// Convenience for tests and hosts: invoke as if `triggered` fired.
    pub fn invoke_triggered(
        &self,
        triggered: Triggered,
        args: &[Value],
    ) -> Result<Outcome, CallbackError> {
        self.invoke(&CallbackContext::triggered_by(triggered), args)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallbackBuilder {
    outputs: Vec<Dependency>,
    inputs: Vec<Dependency>,
    states: Vec<Dependency>,
    options: CallbackOptions,
}

impl CallbackBuilder {
    pub fn output(self, id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        self.dependency(Dependency::output(id, property))
    }

    pub fn input(self, id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        self.dependency(Dependency::input(id, property))
    }

    pub fn trigger(self, id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        self.dependency(Dependency::trigger(id, property))
    }

    pub fn state(self, id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        self.dependency(Dependency::state(id, property))
    }

    /// An input relayed through a cycle breaker component.
    pub fn cycle_breaker_input(self, id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        self.dependency(Dependency::input(id, property).cycle_breaker())
    }

    /// Route a dependency by its role.
    pub fn dependency(mut self, dependency: Dependency) -> Self {
        match dependency.role {
            Role::Output => self.outputs.push(dependency),
            Role::Input | Role::Trigger => self.inputs.push(dependency),
            Role::State => self.states.push(dependency),
        }
        self
    }

    pub fn memoize(mut self) -> Self {
        self.options.memoize = true;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.options.blocking = true;
        self
    }

    pub fn blocking_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.blocking = true;
        self.options.blocking_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn prevent_initial_call(mut self) -> Self {
        self.options.prevent_initial_call = true;
        self
    }

    pub fn group(mut self, label: impl Into<String>) -> Self {
        self.options.group = Some(label.into());
        self
    }

    pub fn log(mut self) -> Self {
        self.options.log = true;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.extra.insert(key.into(), value);
        self
    }

    pub fn handler<F>(self, name: impl Into<String>, func: F) -> Callback
    where
        F: Fn(&CallbackContext, &[Value]) -> Result<Outcome, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.function(CallbackFunction::Server(Handler::new(name, func)))
    }

    pub fn clientside(self, function: ClientsideFunction) -> Callback {
        self.function(CallbackFunction::Clientside(function))
    }

    pub fn function(self, function: CallbackFunction) -> Callback {
        Callback {
            outputs: self.outputs,
            inputs: self.inputs,
            states: self.states,
            function,
            options: self.options,
            applied: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Callback {
        Callback::builder()
            .output("out", "children")
            .trigger("btn", "n_clicks")
            .input("text", "value")
            .state("store", "data")
            .handler("echo", |_, args| Ok(Outcome::single(json!(args))))
    }

    #[test]
    fn builder_routes_dependencies_by_role() {
        let cb = echo();
        assert_eq!(cb.outputs.len(), 1);
        assert_eq!(cb.inputs.len(), 2);
        assert_eq!(cb.states.len(), 1);
        assert_eq!(cb.trigger_mask(), vec![true, false]);
        assert_eq!(cb.arg_count(), 3);
    }

    #[test]
    fn uid_is_stable_and_name_dependent() {
        let a = echo();
        let b = echo();
        assert_eq!(a.uid(), b.uid());
        assert_eq!(a.uid().get_version_num(), 4);

        let other = Callback::builder()
            .input("btn", "n_clicks")
            .handler("other", |_, _| Ok(Outcome::Skipped));
        assert_ne!(a.uid(), other.uid());
    }

    #[test]
    fn map_handler_keeps_name_and_wraps_behaviour() {
        let mut cb = echo();
        cb.map_handler(|h| {
            h.wrap(|inner, ctx, args| match inner.call(ctx, args)? {
                Outcome::Updated(_) => Ok(Outcome::single(json!("wrapped"))),
                Outcome::Skipped => Ok(Outcome::Skipped),
            })
        });
        assert_eq!(cb.name(), "echo");
        let outcome = cb
            .invoke(&CallbackContext::new(), &[json!(1), json!(2), json!(3)])
            .expect("wrapped handler should run");
        assert_eq!(outcome, Outcome::single(json!("wrapped")));
    }

    #[test]
    fn outcome_slots_expand_skips_and_reject_wrong_lengths() {
        assert_eq!(
            Outcome::Skipped.into_slots(2).expect("skip"),
            vec![OutputValue::NoUpdate; 2]
        );
        assert_eq!(
            Outcome::values([json!(1), json!(2)]).into_slots(2).expect("exact"),
            vec![OutputValue::Set(json!(1)), OutputValue::Set(json!(2))]
        );
        assert!(matches!(
            Outcome::single(json!(1)).into_slots(2),
            Err(CallbackError::Handler(_))
        ));
        assert!(Outcome::no_update(3).into_slots(2).is_err());
    }

    #[test]
    fn clientside_callbacks_cannot_be_invoked() {
        let cb = Callback::builder()
            .output("out", "children")
            .input("in", "value")
            .clientside(ClientsideFunction::namespaced("ns", "fn"));
        assert!(cb.is_clientside());
        assert_eq!(cb.name(), "ns.fn");
        assert!(matches!(
            cb.invoke(&CallbackContext::new(), &[]),
            Err(CallbackError::Handler(_))
        ));
    }

    #[test]
    fn options_round_trip_through_the_wire_shape() {
        let options: CallbackOptions = serde_json::from_value(json!({
            "memoize": true,
            "group": "g",
            "custom": 1
        }))
        .expect("options should deserialize");
        assert!(options.memoize);
        assert_eq!(options.group.as_deref(), Some("g"));
        assert_eq!(options.extra.get("custom"), Some(&json!(1)));
    }
}
