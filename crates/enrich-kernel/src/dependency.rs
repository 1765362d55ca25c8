//! Dependency descriptors: one `(identifier, property)` binding with a role.

use crate::identifier::{ComponentId, IdValue, Wildcard};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a callback relates to a bound property.
///
/// `Trigger` subscribes like an `Input`, but its value is not passed to the
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Input,
    State,
    Output,
    Trigger,
}

impl Role {
    /// Whether a change of the bound property fires the callback.
    pub fn subscribes(self) -> bool {
        matches!(self, Role::Input | Role::Trigger)
    }
}

/// Server-side storage flags carried by an output.
///
/// Unset fields fall back to the server-side transform's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersideOptions {
    /// Uid of the backend to store into; `None` selects the default backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_check: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyOptions {
    /// Allow this output to be written by more than one registered callback.
    #[serde(default)]
    pub allow_duplicate: bool,
    /// Route this input through a relay component so that the callback may
    /// sit on a dependency cycle.
    #[serde(default)]
    pub cycle_breaker: bool,
    /// Store the output value server-side and send a reference to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverside: Option<ServersideOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: ComponentId,
    pub property: String,
    pub role: Role,
    #[serde(default)]
    pub options: DependencyOptions,
}

impl Dependency {
    pub fn new(id: impl Into<ComponentId>, property: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            property: property.into(),
            role,
            options: DependencyOptions::default(),
        }
    }

    pub fn input(id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        Self::new(id, property, Role::Input)
    }

    pub fn state(id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        Self::new(id, property, Role::State)
    }

    pub fn output(id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        Self::new(id, property, Role::Output)
    }

    pub fn trigger(id: impl Into<ComponentId>, property: impl Into<String>) -> Self {
        Self::new(id, property, Role::Trigger)
    }

    /// Same binding, different role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn allow_duplicate(mut self) -> Self {
        self.options.allow_duplicate = true;
        self
    }

    pub fn cycle_breaker(mut self) -> Self {
        self.options.cycle_breaker = true;
        self
    }

    pub fn serverside(mut self, options: ServersideOptions) -> Self {
        self.options.serverside = Some(options);
        self
    }

    /// Store server-side with default flags.
    pub fn serverside_default(self) -> Self {
        self.serverside(ServersideOptions::default())
    }

    pub fn is_serverside(&self) -> bool {
        self.options.serverside.is_some()
    }

    /// The `"{id}.{property}"` key the host uses to address this binding.
    pub fn key(&self) -> String {
        format!("{}.{}", self.id, self.property)
    }

    /// Key with wildcard values replaced by a placeholder, so that two
    /// patterns over the same component class compare equal.
    pub fn key_without_wildcards(&self) -> String {
        match &self.id {
            ComponentId::Simple(_) => self.key(),
            ComponentId::Structured(id) => {
                let mut masked = id.clone();
                for value in masked.values_mut() {
                    if value.is_wildcard() {
                        *value = IdValue::Str("*".to_string());
                    }
                }
                format!("{masked}.{}", self.property)
            }
        }
    }

    pub fn wildcards(&self) -> Vec<Wildcard> {
        self.id.wildcards()
    }

    /// Whether a change of `(id, property)` is observed by this dependency.
    pub fn matches_trigger(&self, id: &ComponentId, property: &str) -> bool {
        self.property == property && self.id.matches(id)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.role, self.key())
    }
}
