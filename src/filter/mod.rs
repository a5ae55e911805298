//! Filter specs, instances and the registry that maps names to specs.

mod sed;

pub use sed::{Sed, SedSpec, SED_NAME};

use crate::config::ReadErrorPolicy;
use crate::context::FilterContext;
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for filter instances, selected by name from route configuration.
pub trait Spec: Send + Sync {
    /// Name used in route configuration. Unique within a registry.
    fn name(&self) -> &'static str;

    /// Validate arguments and build a ready-to-run instance.
    fn create_filter(&self, args: &[JsonValue]) -> Result<Arc<dyn Filter>, FilterError>;
}

/// An activated filter, shared by every in-flight message on its route.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Request-direction hook.
    async fn request(&self, ctx: &mut dyn FilterContext) -> FilterAction;

    /// Response-direction hook.
    async fn response(&self, ctx: &mut dyn FilterContext) -> FilterAction;

    /// Filter name for logging.
    fn name(&self) -> &'static str;
}

/// What the executor should do with the message after a hook ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// Keep processing the message
    Continue,
    /// Fail the message with the given status
    Reject { status: u16, reason: String },
}

impl FilterAction {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Registry of filter specs keyed by name.
pub struct FilterRegistry {
    specs: HashMap<&'static str, Arc<dyn Spec>>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Registry with the built-in filters.
    pub fn with_defaults(
        policy: ReadErrorPolicy,
        reject_status: u16,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let mut registry = Self::new();
        let sed = SedSpec::new()
            .with_read_error_policy(policy, reject_status)
            .with_diagnostics(diagnostics);
        // A fresh registry has no names yet
        registry.specs.insert(sed.name(), Arc::new(sed));
        registry
    }

    /// Register a spec, refusing duplicate names.
    pub fn register(&mut self, spec: Arc<dyn Spec>) -> Result<(), FilterError> {
        let name = spec.name();
        if self.specs.contains_key(name) {
            return Err(FilterError::DuplicateName(name.to_string()));
        }
        self.specs.insert(name, spec);
        Ok(())
    }

    /// Look up a spec by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Spec>> {
        self.specs.get(name)
    }

    /// Create a filter instance by name.
    pub fn create(&self, name: &str, args: &[JsonValue]) -> Result<Arc<dyn Filter>, FilterError> {
        let spec = self
            .get(name)
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?;
        spec.create_filter(args)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.specs.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults(
            ReadErrorPolicy::default(),
            502,
            Arc::new(TracingDiagnostics),
        )
    }
}

/// Errors raised while activating a filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid filter parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Filter already registered: {0}")]
    DuplicateName(String),
}
