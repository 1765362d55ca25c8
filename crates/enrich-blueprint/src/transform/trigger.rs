//! Trigger filtering.
//!
//! A `Trigger` fires the callback like an `Input` but its value never
//! reaches the handler. Server handlers are wrapped in an argument filter;
//! client-side functions are wrapped in a JavaScript shim doing the same.

use super::Transform;
use enrich_kernel::{Callback, CallbackFunction, ClientsideFunction, Component, EnrichError};
use serde_json::Value;

pub const NAME: &str = "trigger";

#[derive(Debug, Default)]
pub struct TriggerTransform;

impl TriggerTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for TriggerTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        10
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        for callback in &mut callbacks {
            if !callback.has_triggers() || !callback.mark_applied(NAME) {
                continue;
            }
            let mask = callback.trigger_mask();
            tracing::debug!(callback = %callback.name(), ?mask, "filtering trigger arguments");
            if let CallbackFunction::Clientside(function) = &callback.function {
                let shim = clientside_shim(function, &mask);
                callback.function = CallbackFunction::Clientside(shim);
                continue;
            }
            callback.map_handler(|handler| {
                handler.wrap(move |inner, ctx, args| {
                    let filtered = filter_args(&mask, args);
                    inner.call(ctx, &filtered)
                })
            });
        }
        Ok(callbacks)
    }
}

/// Drop the arguments flagged in `mask`. Arguments past the mask (states)
/// are kept.
pub fn filter_args(mask: &[bool], args: &[Value]) -> Vec<Value> {
    args.iter()
        .enumerate()
        .filter(|(i, _)| !mask.get(*i).copied().unwrap_or(false))
        .map(|(_, arg)| arg.clone())
        .collect()
}

fn clientside_shim(function: &ClientsideFunction, mask: &[bool]) -> ClientsideFunction {
    let args: Vec<String> = (0..mask.len()).map(|i| format!("arg{i}")).collect();
    let kept: Vec<&str> = args
        .iter()
        .zip(mask)
        .filter(|(_, is_trigger)| !**is_trigger)
        .map(|(arg, _)| arg.as_str())
        .collect();
    ClientsideFunction::Inline(format!(
        "\nfunction({}) {{\nconst func = {};\nreturn func({});\n}}",
        args.join(", "),
        function.expression(),
        kept.join(", ")
    ))
}
