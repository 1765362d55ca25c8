//! Server-side outputs and memoization.
//!
//! Outputs flagged `serverside` are written to a backend after the handler
//! runs; the client receives a `SERVERSIDE_...` reference instead of the
//! value. Every server-side callback is also wrapped on the consuming end:
//! reference arguments are swapped for the stored value before the handler
//! sees them.
//!
//! With `memoize`, the key is derived from the function name, the output
//! and the arguments (trigger values excluded), optionally scoped by
//! session. When every output already has an entry the handler is skipped.

use super::Transform;
use enrich_kernel::{
    Callback, CallbackContext, CallbackError, Component, Dependency, EnrichError, Outcome,
    OutputValue, ServersideOptions,
};
use enrich_store::{BackendRegistry, KeyMaterial, ServersideRef, random_key};
use serde_json::Value;
use std::sync::Arc;

pub const NAME: &str = "serverside";

/// Defaults for outputs that leave a flag unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServersideDefaults {
    pub session_check: bool,
    pub arg_check: bool,
}

impl Default for ServersideDefaults {
    fn default() -> Self {
        Self {
            session_check: false,
            arg_check: true,
        }
    }
}

#[derive(Debug)]
pub struct ServersideTransform {
    registry: Arc<BackendRegistry>,
    defaults: ServersideDefaults,
}

impl ServersideTransform {
    pub fn new(registry: BackendRegistry) -> Self {
        Self::with_defaults(registry, ServersideDefaults::default())
    }

    pub fn with_defaults(registry: BackendRegistry, defaults: ServersideDefaults) -> Self {
        Self {
            registry: Arc::new(registry),
            defaults,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }
}

/// Everything a wrapped handler needs, resolved once at setup.
#[derive(Debug)]
struct Plan {
    function: String,
    memoize: bool,
    trigger_mask: Vec<bool>,
    n_inputs: usize,
    outputs: Vec<OutputPlan>,
}

#[derive(Debug)]
struct OutputPlan {
    key: String,
    /// `None` for outputs sent to the client as-is.
    store: Option<StorePlan>,
}

#[derive(Debug)]
struct StorePlan {
    backend: Option<String>,
    session_check: bool,
    arg_check: bool,
}

impl Transform for ServersideTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        60
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        for callback in &mut callbacks {
            if callback.is_clientside() || !callback.mark_applied(NAME) {
                continue;
            }
            let plan = Arc::new(self.plan(callback)?);
            let registry = Arc::clone(&self.registry);
            callback.map_handler(|handler| {
                handler.wrap(move |inner, ctx, args| {
                    if let Some(hit) = memo_hit(&plan, &registry, ctx, args)? {
                        return Ok(hit);
                    }
                    let loaded = load_args(&registry, args);
                    let outcome = inner.call(ctx, &loaded)?;
                    store_outputs(&plan, &registry, ctx, args, outcome)
                })
            });
        }
        Ok(callbacks)
    }
}

impl ServersideTransform {
    fn plan(&self, callback: &Callback) -> Result<Plan, EnrichError> {
        let outputs = callback
            .outputs
            .iter()
            .map(|output| self.output_plan(output))
            .collect::<Result<Vec<_>, _>>()?;
        if callback.options.memoize && !outputs.iter().any(|o| o.store.is_some()) {
            return Err(EnrichError::invalid_callback(
                callback.name(),
                "memoize requires at least one server-side output",
            ));
        }
        Ok(Plan {
            function: callback.name(),
            memoize: callback.options.memoize,
            trigger_mask: callback.trigger_mask(),
            n_inputs: callback.inputs.len(),
            outputs,
        })
    }

    fn output_plan(&self, output: &Dependency) -> Result<OutputPlan, EnrichError> {
        let store = match &output.options.serverside {
            None => None,
            Some(ServersideOptions {
                backend,
                session_check,
                arg_check,
            }) => {
                let backend_ref = self.registry.resolve(backend.as_deref())?;
                if !backend_ref.honors_ignore_expired() {
                    tracing::debug!(
                        backend = %backend_ref.uid(),
                        "backend cannot read expired entries; its timeout must outlive sessions"
                    );
                }
                Some(StorePlan {
                    backend: backend.clone(),
                    session_check: session_check.unwrap_or(self.defaults.session_check),
                    arg_check: arg_check.unwrap_or(self.defaults.arg_check),
                })
            }
        };
        Ok(OutputPlan {
            key: output.key(),
            store,
        })
    }
}

/// Arguments that identify a memoized result: inputs without triggers,
/// then states.
fn memo_args(plan: &Plan, args: &[Value]) -> Vec<Value> {
    args.iter()
        .enumerate()
        .filter(|(i, _)| *i >= plan.n_inputs || !plan.trigger_mask.get(*i).copied().unwrap_or(false))
        .map(|(_, arg)| arg.clone())
        .collect()
}

fn memo_key(
    plan: &Plan,
    output: &OutputPlan,
    store: &StorePlan,
    ctx: &CallbackContext,
    args: &[Value],
) -> String {
    let session_id = if store.session_check {
        if ctx.session_id.is_none() {
            tracing::warn!(callback = %plan.function, "session check requested without a session id");
        }
        ctx.session_id.as_deref()
    } else {
        None
    };
    KeyMaterial {
        function: &plan.function,
        output: &output.key,
        args: store.arg_check.then_some(args),
        session_id,
    }
    .cache_key()
}

fn memo_hit(
    plan: &Plan,
    registry: &BackendRegistry,
    ctx: &CallbackContext,
    args: &[Value],
) -> Result<Option<Outcome>, CallbackError> {
    if !plan.memoize {
        return Ok(None);
    }
    let memo_args = memo_args(plan, args);
    let mut references = Vec::with_capacity(plan.outputs.len());
    for output in &plan.outputs {
        let Some(store) = &output.store else {
            return Ok(None);
        };
        let key = memo_key(plan, output, store, ctx, &memo_args);
        let backend = registry.resolve(store.backend.as_deref())?;
        if !backend.has(&key)? {
            return Ok(None);
        }
        references.push(Value::String(ServersideRef::new(backend.uid(), key).encode()));
    }
    tracing::debug!(callback = %plan.function, "memoized result reused");
    Ok(Some(Outcome::values(references)))
}

fn store_outputs(
    plan: &Plan,
    registry: &BackendRegistry,
    ctx: &CallbackContext,
    args: &[Value],
    outcome: Outcome,
) -> Result<Outcome, CallbackError> {
    let Outcome::Updated(values) = outcome else {
        return Ok(Outcome::Skipped);
    };
    let memo_args = plan.memoize.then(|| memo_args(plan, args));
    let mut stored = Vec::with_capacity(values.len());
    for (i, value) in values.into_iter().enumerate() {
        let target = plan
            .outputs
            .get(i)
            .and_then(|output| output.store.as_ref().map(|store| (output, store)));
        match (value, target) {
            (OutputValue::Set(value), Some((output, store))) => {
                let key = match &memo_args {
                    Some(memo_args) => memo_key(plan, output, store, ctx, memo_args),
                    None => random_key(),
                };
                let reference =
                    ServersideRef::store(registry, store.backend.as_deref(), key, &value)?;
                stored.push(OutputValue::Set(Value::String(reference.encode())));
            }
            (value, _) => stored.push(value),
        }
    }
    Ok(Outcome::Updated(stored))
}

/// Replace reference arguments (and references inside list arguments) by
/// their stored values. Unreadable references become `null`.
fn load_args(registry: &BackendRegistry, args: &[Value]) -> Vec<Value> {
    args.iter()
        .map(|arg| match arg {
            Value::Array(items) => Value::Array(items.iter().map(|v| load_one(registry, v)).collect()),
            other => load_one(registry, other),
        })
        .collect()
}

fn load_one(registry: &BackendRegistry, value: &Value) -> Value {
    let reference = match ServersideRef::detect(value) {
        Ok(Some(reference)) => reference,
        Ok(None) => return value.clone(),
        Err(err) => {
            tracing::warn!(error = %err, "unreadable server-side reference, treated as missing");
            return Value::Null;
        }
    };
    match reference.fetch(registry) {
        Ok(Some(stored)) => stored,
        Ok(None) => {
            tracing::warn!(key = %reference.key, backend = %reference.backend_uid, "server-side value missing");
            Value::Null
        }
        Err(err) => {
            tracing::warn!(error = %err, key = %reference.key, "server-side read failed, treated as missing");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_kernel::Triggered;
    use enrich_store::{MemoryBackend, ServersideBackend};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transform() -> (ServersideTransform, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let registry = BackendRegistry::new(backend.clone());
        (ServersideTransform::new(registry), backend)
    }

    fn counted(calls: &Arc<AtomicUsize>, memoize: bool) -> Callback {
        let seen = Arc::clone(calls);
        let mut builder = Callback::builder()
            .dependency(Dependency::output("store", "data").serverside_default())
            .trigger("btn", "n_clicks")
            .state("n", "value");
        if memoize {
            builder = builder.memoize();
        }
        builder.handler("square", move |_, args| {
            seen.fetch_add(1, Ordering::SeqCst);
            let n = args.last().and_then(Value::as_i64).unwrap_or_default();
            Ok(Outcome::single(json!(n * n)))
        })
    }

    fn ctx() -> CallbackContext {
        CallbackContext::triggered_by(Triggered::new("btn", "n_clicks", json!(1)))
    }

    #[test]
    fn values_are_stored_and_replaced_by_references() {
        let (mut transform, backend) = transform();
        let calls = Arc::new(AtomicUsize::new(0));
        let callbacks = transform.apply(vec![counted(&calls, false)], None).expect("apply");

        let outcome = callbacks[0].invoke(&ctx(), &[json!(1), json!(4)]).expect("runs");
        let Outcome::Updated(values) = outcome else {
            panic!("expected an update");
        };
        let reference = ServersideRef::detect(values[0].as_value().expect("set"))
            .expect("valid reference")
            .expect("is a reference");
        assert_eq!(backend.get(&reference.key, false).expect("get"), Some(json!(16)));
    }

    #[test]
    fn memoized_calls_run_once_and_return_the_same_key() {
        let (mut transform, _backend) = transform();
        let calls = Arc::new(AtomicUsize::new(0));
        let callbacks = transform.apply(vec![counted(&calls, true)], None).expect("apply");

        let first = callbacks[0].invoke(&ctx(), &[json!(1), json!(3)]).expect("first");
        let second = callbacks[0].invoke(&ctx(), &[json!(2), json!(3)]).expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);

        callbacks[0].invoke(&ctx(), &[json!(2), json!(5)]).expect("third");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn session_check_separates_sessions() {
        let backend = Arc::new(MemoryBackend::new());
        let mut transform = ServersideTransform::with_defaults(
            BackendRegistry::new(backend),
            ServersideDefaults {
                session_check: true,
                arg_check: true,
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let callbacks = transform.apply(vec![counted(&calls, true)], None).expect("apply");

        let a = callbacks[0]
            .invoke(&ctx().with_session("a"), &[json!(1), json!(3)])
            .expect("session a");
        let b = callbacks[0]
            .invoke(&ctx().with_session("b"), &[json!(1), json!(3)])
            .expect("session b");
        assert_ne!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn consumers_receive_stored_values_and_null_for_faults() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("k", &json!({"rows": 3})).expect("seed");
        let registry = BackendRegistry::new(backend);
        let mut transform = ServersideTransform::new(registry);

        let consumer = Callback::builder()
            .output("out", "children")
            .input("store", "data")
            .input("other", "data")
            .input("list", "data")
            .handler("consume", |_, args| Ok(Outcome::single(json!(args))));
        let callbacks = transform.apply(vec![consumer], None).expect("apply");

        let good = ServersideRef::new("MemoryBackend", "k").encode();
        let missing = ServersideRef::new("MemoryBackend", "nope").encode();
        let outcome = callbacks[0]
            .invoke(
                &ctx(),
                &[json!(good), json!("SERVERSIDE_{broken"), json!([missing, "plain"])],
            )
            .expect("consumer runs");
        assert_eq!(
            outcome,
            Outcome::single(json!([{"rows": 3}, null, [null, "plain"]]))
        );
    }

    #[test]
    fn memoize_without_serverside_outputs_is_rejected() {
        let (mut transform, _) = transform();
        let callback = Callback::builder()
            .output("out", "children")
            .input("x", "value")
            .memoize()
            .handler("plain", |_, _| Ok(Outcome::Skipped));
        let err = transform.apply(vec![callback], None).expect_err("invalid");
        assert!(matches!(err, EnrichError::InvalidCallback { .. }));
    }

    #[test]
    fn unknown_backend_is_a_setup_error() {
        let (mut transform, _) = transform();
        let callback = Callback::builder()
            .dependency(Dependency::output("s", "data").serverside(ServersideOptions {
                backend: Some("redis".into()),
                ..ServersideOptions::default()
            }))
            .input("x", "value")
            .handler("f", |_, _| Ok(Outcome::Skipped));
        assert!(matches!(
            transform.apply(vec![callback], None),
            Err(EnrichError::Store(_))
        ));
    }
}
