//! Route activation: one cached filter instance per configured route.

use crate::config::RouteConfig;
use crate::context::FilterContext;
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::filter::{Filter, FilterAction, FilterError, FilterRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Activated routes.
///
/// Every filter is created once here and then shared by all messages on its
/// route. Activation is all-or-nothing.
pub struct RouteTable {
    /// Configuration
    config: RouteConfig,
    /// Activated filters (keyed by route id)
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl RouteTable {
    /// Activate all routes with the built-in filters and tracing diagnostics.
    pub fn new(config: RouteConfig) -> Result<Self, RouteTableError> {
        Self::with_diagnostics(config, Arc::new(TracingDiagnostics))
    }

    /// Activate all routes, reporting runtime failures to `diagnostics`.
    pub fn with_diagnostics(
        config: RouteConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self, RouteTableError> {
        let registry = FilterRegistry::with_defaults(
            config.settings.on_read_error,
            config.settings.reject_status,
            diagnostics,
        );
        Self::with_registry(config, &registry)
    }

    /// Activate all routes against a caller-supplied registry.
    pub fn with_registry(
        config: RouteConfig,
        registry: &FilterRegistry,
    ) -> Result<Self, RouteTableError> {
        let mut filters: HashMap<String, Arc<dyn Filter>> = HashMap::new();

        for route in &config.routes {
            if filters.contains_key(&route.id) {
                return Err(RouteTableError::DuplicateRoute(route.id.clone()));
            }

            let filter = registry
                .create(&route.filter.name, &route.filter.args)
                .map_err(|source| RouteTableError::Activation {
                    route: route.id.clone(),
                    source,
                })?;

            debug!(route = %route.id, filter = filter.name(), "Activated route filter");
            filters.insert(route.id.clone(), filter);
        }

        info!(
            routes = filters.len(),
            on_read_error = ?config.settings.on_read_error,
            "Route table activated"
        );

        Ok(Self { config, filters })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, RouteTableError> {
        let config: RouteConfig = serde_yaml::from_str(yaml)?;
        Self::new(config)
    }

    /// Create from a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, RouteTableError> {
        let config: RouteConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// The shared filter for a route.
    pub fn filter(&self, route: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(route).cloned()
    }

    /// Route ids, sorted.
    pub fn route_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.filters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Run the response hook of a route's filter.
    ///
    /// Unknown routes pass through untouched.
    pub async fn handle_response(&self, route: &str, ctx: &mut dyn FilterContext) -> FilterAction {
        match self.filters.get(route) {
            Some(filter) => filter.response(ctx).await,
            None => {
                trace!(route, "No filter for route");
                FilterAction::Continue
            }
        }
    }

    /// Run the request hook of a route's filter.
    pub async fn handle_request(&self, route: &str, ctx: &mut dyn FilterContext) -> FilterAction {
        match self.filters.get(route) {
            Some(filter) => filter.request(ctx).await,
            None => FilterAction::Continue,
        }
    }
}

/// Route activation errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteTableError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Route '{route}': {source}")]
    Activation {
        route: String,
        #[source]
        source: FilterError,
    },

    #[error("Duplicate route id: {0}")]
    DuplicateRoute(String),
}
