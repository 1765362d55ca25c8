//! Synthetic outputs for callbacks declared without any.
//!
//! The host requires at least one output per registration. Output-less
//! callbacks get `Output(<uid>, "children")` bound to a hidden `Div` that the
//! layout hook appends to the root.

use super::{Transform, append_once};
use enrich_kernel::{Callback, Component, Dependency, EnrichError, Outcome};

pub const NAME: &str = "no_output";

#[derive(Debug, Default)]
pub struct NoOutputTransform {
    sinks: Vec<Component>,
}

impl NoOutputTransform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for NoOutputTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        50
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        for callback in &mut callbacks {
            if !callback.outputs.is_empty() || !callback.mark_applied(NAME) {
                continue;
            }
            let sink_id = callback.uid().to_string();
            tracing::debug!(callback = %callback.name(), sink = %sink_id, "adding hidden output");
            callback
                .outputs
                .push(Dependency::output(sink_id.as_str(), "children"));
            callback.map_handler(|handler| {
                handler.wrap(|inner, ctx, args| match inner.call(ctx, args)? {
                    Outcome::Skipped => Ok(Outcome::Skipped),
                    Outcome::Updated(_) => Ok(Outcome::no_update(1)),
                })
            });
            self.sinks.push(Component::hidden_div(sink_id));
        }
        Ok(callbacks)
    }

    fn transform_layout(&self, layout: &mut Component) -> Result<(), EnrichError> {
        for sink in &self.sinks {
            append_once(layout, sink.clone());
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sinks.clear();
    }
}
