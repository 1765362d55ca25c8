//! User-facing log output.
//!
//! Callbacks flagged `log` receive a [`LogSink`] through their context. Each
//! record is rendered as a `Div` (`"INFO: ..."`) into an extra
//! `log.children` output. Several callbacks write that output, so the
//! multiplexer is required.

use super::multiplexer::MultiplexerTransform;
use super::{Transform, append_once};
use enrich_kernel::{
    Callback, Component, ComponentId, Dependency, EnrichError, LogRecord, LogSink, Outcome,
    OutputValue,
};
use serde_json::{Value, json};

pub const NAME: &str = "log";
pub const DEFAULT_LOG_ID: &str = "log";

#[derive(Debug)]
pub struct LogTransform {
    log_id: String,
    used: bool,
}

impl Default for LogTransform {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_ID)
    }
}

impl LogTransform {
    pub fn new(log_id: impl Into<String>) -> Self {
        Self {
            log_id: log_id.into(),
            used: false,
        }
    }
}

impl Transform for LogTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        20
    }

    fn dependencies(&self) -> Vec<Box<dyn Transform>> {
        vec![Box::new(MultiplexerTransform::default())]
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        for callback in &mut callbacks {
            if !callback.options.log || callback.is_clientside() || !callback.mark_applied(NAME) {
                continue;
            }
            self.used = true;
            let width = callback.outputs.len();
            callback
                .outputs
                .push(Dependency::output(self.log_id.as_str(), "children").allow_duplicate());
            callback.map_handler(|handler| {
                handler.wrap(move |inner, ctx, args| {
                    let sink = LogSink::new();
                    let ctx = ctx.clone().with_log(sink.clone());
                    let outcome = inner.call(&ctx, args)?;
                    let records = sink.take();
                    if records.is_empty() && outcome.is_skipped() {
                        return Ok(Outcome::Skipped);
                    }
                    let mut slots = outcome.into_slots(width)?;
                    slots.push(render(&records));
                    Ok(Outcome::Updated(slots))
                })
            });
        }
        Ok(callbacks)
    }

    fn transform_layout(&self, layout: &mut Component) -> Result<(), EnrichError> {
        if self.used {
            append_once(layout, Component::div().with_id(ComponentId::from(self.log_id.as_str())));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.used = false;
    }
}

fn render(records: &[LogRecord]) -> OutputValue {
    if records.is_empty() {
        return OutputValue::NoUpdate;
    }
    let divs: Vec<Value> = records
        .iter()
        .map(|record| {
            json!({
                "type": "Div",
                "props": {"children": format!("{}: {}", record.level.label(), record.message)},
            })
        })
        .collect();
    OutputValue::Set(Value::Array(divs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_kernel::{CallbackContext, CallbackError};

    fn logging_callback() -> Callback {
        Callback::builder()
            .output("out", "children")
            .input("btn", "n_clicks")
            .log()
            .handler("noisy", |ctx, args| {
                if args[0] == json!(0) {
                    return Ok(Outcome::single(json!("quiet")));
                }
                ctx.log_info("clicked");
                ctx.log_warning("twice");
                Ok(Outcome::single(json!("loud")))
            })
    }

    #[test]
    fn records_render_into_the_extra_output() {
        let mut transform = LogTransform::default();
        let callbacks = transform.apply(vec![logging_callback()], None).expect("apply");
        let callback = &callbacks[0];
        assert_eq!(callback.outputs[1].key(), "log.children");
        assert!(callback.outputs[1].options.allow_duplicate);

        let outcome = callback
            .invoke(&CallbackContext::new(), &[json!(1)])
            .expect("handler should run");
        assert_eq!(
            outcome,
            Outcome::Updated(vec![
                OutputValue::Set(json!("loud")),
                OutputValue::Set(json!([
                    {"type": "Div", "props": {"children": "INFO: clicked"}},
                    {"type": "Div", "props": {"children": "WARNING: twice"}},
                ])),
            ])
        );
    }

    #[test]
    fn nothing_logged_means_no_update_for_the_log() {
        let mut transform = LogTransform::default();
        let callbacks = transform.apply(vec![logging_callback()], None).expect("apply");
        let outcome = callbacks[0]
            .invoke(&CallbackContext::new(), &[json!(0)])
            .expect("handler should run");
        assert_eq!(
            outcome,
            Outcome::Updated(vec![OutputValue::Set(json!("quiet")), OutputValue::NoUpdate])
        );
    }

    #[test]
    fn short_results_are_a_handler_fault() {
        let short = Callback::builder()
            .output("a", "children")
            .output("b", "children")
            .input("btn", "n_clicks")
            .log()
            .handler("short", |ctx, _| {
                ctx.log_info("only one value");
                Ok(Outcome::single(json!("a")))
            });
        let mut transform = LogTransform::default();
        let callbacks = transform.apply(vec![short], None).expect("apply");
        let err = callbacks[0]
            .invoke(&CallbackContext::new(), &[json!(1)])
            .expect_err("two outputs, one value");
        assert!(matches!(err, CallbackError::Handler(_)));
    }

    #[test]
    fn layout_gains_the_log_div_once_used() {
        let mut transform = LogTransform::default();
        let mut layout = Component::div();
        transform.transform_layout(&mut layout).expect("layout");
        assert!(layout.children.is_empty());

        transform.apply(vec![logging_callback()], None).expect("apply");
        transform.transform_layout(&mut layout).expect("layout");
        transform.transform_layout(&mut layout).expect("layout again");
        assert_eq!(layout.ids(), vec![ComponentId::from("log")]);
    }

    #[test]
    fn multiplexer_is_a_dependency() {
        let names: Vec<&str> = LogTransform::default()
            .dependencies()
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["multiplexer"]);
    }
}
