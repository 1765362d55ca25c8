//! Error types for enrich.
//!
//! Two taxonomies: [`EnrichError`] is raised while the application is being
//! set up (transforms, scope resolution, layout rewriting) and should abort
//! startup. [`CallbackError`] is raised while a callback is being served and
//! is surfaced to the host's error reporting.
//!
//! "Skip this update" is not an error. See [`crate::callback::Outcome`].

use crate::identifier::{ComponentId, Wildcard};

/// Setup-time configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Two components share an identifier shape inside one scope but do not
    /// belong to the same component class.
    #[error(
        "duplicate identifier shape {shape}: used by both '{first}' and '{second}'; \
         add a distinguishing key to one of the identifiers"
    )]
    DuplicateShape {
        shape: String,
        first: String,
        second: String,
    },

    /// One local identifier used by components of two different classes
    /// inside one scope, at least one of them composed.
    #[error("identifier '{id}' is used by both '{first}' and '{second}' in one scope")]
    DuplicateId {
        id: ComponentId,
        first: String,
        second: String,
    },

    /// A wildcard that the requested transform cannot handle.
    #[error("unsupported wildcard {wildcard} in dependency {dependency}")]
    UnsupportedWildcard {
        dependency: String,
        wildcard: Wildcard,
    },

    /// An alias chain that refers back to itself.
    #[error("cyclic alias in '{class}': {}", chain.join(" -> "))]
    CyclicAlias { class: String, chain: Vec<String> },

    /// A local identifier that cannot be found in the current scope.
    #[error("could not find scope related to id '{id}' (scope: {scope})")]
    UnresolvedId { id: ComponentId, scope: String },

    /// A composed component definition that cannot be instantiated or declared.
    #[error("invalid composed component '{class}': {reason}")]
    InvalidComposed { class: String, reason: String },

    /// A callback that cannot be registered in its current form.
    #[error("invalid callback '{callback}': {reason}")]
    InvalidCallback { callback: String, reason: String },

    /// The component tree is malformed for the requested rewrite.
    #[error("layout error: {0}")]
    Layout(String),

    /// The server-side store could not be set up.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl EnrichError {
    pub fn invalid_callback(callback: impl Into<String>, reason: impl Into<String>) -> Self {
        EnrichError::InvalidCallback {
            callback: callback.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_composed(class: impl Into<String>, reason: impl Into<String>) -> Self {
        EnrichError::InvalidComposed {
            class: class.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while a callback is being served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The user handler failed.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A blocking callback could not acquire its slot in time.
    #[error("blocking callback '{callback}' timed out after {timeout_ms} ms")]
    BlockingTimeout { callback: String, timeout_ms: u64 },

    /// A blocking callback is in flight and the policy rejects overlap.
    #[error("blocking callback '{callback}' is already running")]
    BlockingRejected { callback: String },

    /// The server-side store failed while writing a value.
    #[error("store error: {0}")]
    Store(String),
}

impl CallbackError {
    pub fn handler(message: impl std::fmt::Display) -> Self {
        CallbackError::Handler(message.to_string())
    }
}
