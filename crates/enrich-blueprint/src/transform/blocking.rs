//! Blocking callbacks.
//!
//! A callback flagged `blocking` never runs twice at the same time. An
//! overlapping invocation either waits for the running one (bounded by the
//! timeout) or is rejected outright.

use super::Transform;
use enrich_kernel::{Callback, CallbackError, Component, EnrichError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub const NAME: &str = "blocking";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingPolicy {
    /// Wait for the slot, up to the timeout.
    #[default]
    Queue,
    /// Fail immediately while another invocation is in flight.
    Reject,
}

#[derive(Debug)]
pub struct BlockingTransform {
    timeout: Duration,
    policy: BlockingPolicy,
}

impl Default for BlockingTransform {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, BlockingPolicy::Queue)
    }
}

impl BlockingTransform {
    pub fn new(timeout: Duration, policy: BlockingPolicy) -> Self {
        Self { timeout, policy }
    }
}

impl Transform for BlockingTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rank(&self) -> i32 {
        30
    }

    fn apply(
        &mut self,
        mut callbacks: Vec<Callback>,
        _layout: Option<&Component>,
    ) -> Result<Vec<Callback>, EnrichError> {
        for callback in &mut callbacks {
            if !callback.options.blocking || callback.is_clientside() {
                continue;
            }
            if !callback.mark_applied(NAME) {
                continue;
            }
            let timeout = callback
                .options
                .blocking_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.timeout);
            let gate = Arc::new(Gate::new(callback.name(), timeout, self.policy));
            callback.map_handler(|handler| {
                handler.wrap(move |inner, ctx, args| {
                    let _slot = gate.acquire()?;
                    inner.call(ctx, args)
                })
            });
        }
        Ok(callbacks)
    }
}

/// One execution slot.
#[derive(Debug)]
struct Gate {
    callback: String,
    timeout: Duration,
    policy: BlockingPolicy,
    busy: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    fn new(callback: String, timeout: Duration, policy: BlockingPolicy) -> Self {
        Self {
            callback,
            timeout,
            policy,
            busy: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> Result<Slot<'_>, CallbackError> {
        let busy = self.busy.lock().unwrap_or_else(|p| p.into_inner());
        let mut busy = match self.policy {
            BlockingPolicy::Reject if *busy => {
                return Err(CallbackError::BlockingRejected {
                    callback: self.callback.clone(),
                });
            }
            BlockingPolicy::Reject => busy,
            BlockingPolicy::Queue => {
                let (guard, wait) = self
                    .released
                    .wait_timeout_while(busy, self.timeout, |busy| *busy)
                    .unwrap_or_else(|p| p.into_inner());
                if wait.timed_out() && *guard {
                    tracing::warn!(callback = %self.callback, "blocking callback timed out");
                    return Err(CallbackError::BlockingTimeout {
                        callback: self.callback.clone(),
                        timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                guard
            }
        };
        *busy = true;
        Ok(Slot { gate: self })
    }
}

/// Releases the gate on drop, including when the handler fails.
struct Slot<'a> {
    gate: &'a Gate,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut busy = self.gate.busy.lock().unwrap_or_else(|p| p.into_inner());
        *busy = false;
        self.gate.released.notify_one();
    }
}
