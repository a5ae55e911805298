//! Configuration types for the sed filter and its routes.

use crate::filter::FilterError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Route configuration consumed at activation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Configuration version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Routes, each with the filter it activates
    pub routes: Vec<RouteEntry>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            routes: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// What the response hook does when the body cannot be read
    pub on_read_error: ReadErrorPolicy,
    /// Status reported with `ReadErrorPolicy::Reject`
    pub reject_status: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            on_read_error: ReadErrorPolicy::Forward,
            reject_status: 502,
        }
    }
}

/// Behavior after a failed body read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadErrorPolicy {
    /// Log and let the message continue with whatever body state remains
    #[default]
    Forward,
    /// Log, empty the body and ask the executor to fail the message
    Reject,
}

/// A single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Route identifier (unique)
    pub id: String,
    /// Optional description
    #[serde(default)]
    pub description: String,
    /// Filter activated for this route
    pub filter: FilterEntry,
}

/// Filter selection by name, with untyped arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEntry {
    /// Registered filter name
    pub name: String,
    /// Positional arguments as parsed from the route file
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

/// Typed sed arguments: `[pattern, replacement]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SedConfig {
    /// Regular expression matched against the body
    pub pattern: String,
    /// Replacement template, `$1` / `${name}` expand capture groups
    pub replacement: String,
}

impl SedConfig {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

impl TryFrom<&[JsonValue]> for SedConfig {
    type Error = FilterError;

    fn try_from(args: &[JsonValue]) -> Result<Self, Self::Error> {
        match args {
            [JsonValue::String(pattern), JsonValue::String(replacement)] => {
                Ok(Self::new(pattern.as_str(), replacement.as_str()))
            }
            [_, _] => Err(FilterError::InvalidParameters(
                "expected [pattern, replacement] as strings".to_string(),
            )),
            _ => Err(FilterError::InvalidParameters(format!(
                "expected 2 arguments, got {}",
                args.len()
            ))),
        }
    }
}
