use crate::group::group_callbacks;
use crate::host::CallbackHost;
use crate::transform::{PrefixIdTransform, Transform, prefix};
use enrich_kernel::{Callback, CallbackBuilder, ClientsideFunction, Component, EnrichError};
use std::fmt;
use std::sync::{Arc, Mutex};

pub type LayoutFn = dyn Fn() -> Component + Send + Sync;

pub enum Layout {
    /// Transformed once, then served from cache.
    Static(Component),
    /// Rebuilt and transformed on every request.
    Dynamic(Arc<LayoutFn>),
}

impl Layout {
    fn build(&self) -> Component {
        match self {
            Layout::Static(component) => component.clone(),
            Layout::Dynamic(build) => build(),
        }
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Static(component) => f.debug_tuple("Static").field(component).finish(),
            Layout::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Callbacks, a layout and the transform chain that rewrites both.
///
/// Callbacks are collected during setup and handed to a host (or to another
/// blueprint) exactly once; resolving drains them.
#[derive(Debug)]
pub struct Blueprint {
    callbacks: Vec<Callback>,
    transforms: Vec<Box<dyn Transform>>,
    layout: Option<Layout>,
    cached: Mutex<Option<Component>>,
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Blueprint {
    /// Build the chain: pull in missing dependencies, then order by rank.
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        let mut blueprint = Self {
            callbacks: Vec::new(),
            transforms,
            layout: None,
            cached: Mutex::new(None),
        };
        blueprint.order_chain();
        blueprint
    }

    fn order_chain(&mut self) {
        let mut index = 0;
        while index < self.transforms.len() {
            for dependency in self.transforms[index].dependencies() {
                if !self.transforms.iter().any(|t| t.name() == dependency.name()) {
                    tracing::debug!(
                        transform = self.transforms[index].name(),
                        dependency = dependency.name(),
                        "adding required transform"
                    );
                    self.transforms.push(dependency);
                }
            }
            index += 1;
        }
        self.transforms.sort_by_key(|t| t.rank());
    }

    pub fn transform_names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn add_callback(&mut self, callback: Callback) {
        self.callbacks.push(callback);
    }

    pub fn add_clientside_callback(&mut self, builder: CallbackBuilder, function: ClientsideFunction) {
        self.callbacks.push(builder.clientside(function));
    }

    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    pub fn set_layout(&mut self, layout: Component) {
        self.layout = Some(Layout::Static(layout));
        self.invalidate();
    }

    pub fn set_layout_fn(&mut self, build: impl Fn() -> Component + Send + Sync + 'static) {
        self.layout = Some(Layout::Dynamic(Arc::new(build)));
        self.invalidate();
    }

    /// Drain the collected callbacks through the chain.
    pub fn resolve_callbacks(&mut self) -> Result<Vec<Callback>, EnrichError> {
        let layout = self.layout.as_ref().map(Layout::build);
        let mut callbacks = std::mem::take(&mut self.callbacks);
        for transform in &mut self.transforms {
            tracing::debug!(transform = transform.name(), callbacks = callbacks.len(), "applying transform");
            callbacks = transform.apply(callbacks, layout.as_ref())?;
        }
        self.invalidate();
        Ok(callbacks)
    }

    /// Resolve, group server-side callbacks by output and register one
    /// dispatch per group. Client-side callbacks are registered as-is.
    pub fn register_callbacks(&mut self, host: &mut impl CallbackHost) -> Result<(), EnrichError> {
        let (clientside, serverside): (Vec<Callback>, Vec<Callback>) = self
            .resolve_callbacks()?
            .into_iter()
            .partition(Callback::is_clientside);
        let grouped = group_callbacks(serverside);
        tracing::debug!(groups = grouped.len(), clientside = clientside.len(), "registering callbacks");
        for callback in grouped.into_iter().chain(clientside) {
            host.register(callback)?;
        }
        Ok(())
    }

    /// Register with every id prefixed by `prefix`.
    pub fn register_with_prefix(
        &mut self,
        host: &mut impl CallbackHost,
        prefix: impl Into<String>,
    ) -> Result<(), EnrichError> {
        self.transforms.push(Box::new(PrefixIdTransform::new(prefix)));
        self.order_chain();
        self.register_callbacks(host)
    }

    /// Prefix the ids of `component`, created at runtime (e.g. inside a
    /// callback), the way this blueprint's prefix transform prefixed the
    /// layout. Without a prefix transform the component is left as is.
    pub fn dynamic_prefix(&self, component: &mut Component) -> Result<(), EnrichError> {
        match self.transforms.iter().find(|t| t.name() == prefix::NAME) {
            Some(transform) => transform.transform_layout(component),
            None => Ok(()),
        }
    }

    /// Hand the resolved callbacks to another blueprint.
    pub fn register_into(&mut self, other: &mut Blueprint) -> Result<(), EnrichError> {
        let resolved = self.resolve_callbacks()?;
        other.callbacks.extend(resolved);
        Ok(())
    }

    /// Embed into `app`: move the callbacks over and return the layout to
    /// place somewhere in the app's tree.
    pub fn embed(&mut self, app: &mut Blueprint) -> Result<Component, EnrichError> {
        self.register_into(app)?;
        self.layout_value()
    }

    /// The layout after every transform's layout hook.
    pub fn layout_value(&self) -> Result<Component, EnrichError> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| EnrichError::Layout("blueprint has no layout".to_string()))?;
        match layout {
            Layout::Dynamic(build) => self.transform_layout(build()),
            Layout::Static(component) => {
                let mut cached = self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(done) = cached.as_ref() {
                    return Ok(done.clone());
                }
                let done = self.transform_layout(component.clone())?;
                *cached = Some(done.clone());
                Ok(done)
            }
        }
    }

    fn transform_layout(&self, mut layout: Component) -> Result<Component, EnrichError> {
        for transform in &self.transforms {
            transform.transform_layout(&mut layout)?;
        }
        Ok(layout)
    }

    /// Forget callbacks and transform state.
    pub fn clear(&mut self) {
        self.callbacks.clear();
        for transform in &mut self.transforms {
            transform.reset();
        }
        self.invalidate();
    }

    fn invalidate(&mut self) {
        *self.cached.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}
