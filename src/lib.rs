//! Response body substitution filter for Zentinel.
//!
//! Rewrites response bodies with a regular expression and a replacement
//! template, like `sed 's/regexp/replacement/g'`:
//!
//! - Validating factory (`SedSpec`) that turns `[pattern, replacement]` route
//!   arguments into an immutable, shareable filter
//! - Global, non-overlapping substitution with `$1` / `${name}` expansion
//! - Body length kept in sync with the rewritten bytes
//! - Configurable behavior when the upstream body cannot be read
//!
//! ## Configuration Example
//!
//! ```yaml
//! routes:
//!   - id: "rewrite-hosts"
//!     filter:
//!       name: sed
//!       args: ['internal\.local', 'example.com']
//! ```

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod filter;
pub mod route;

pub use config::{ReadErrorPolicy, RouteConfig, SedConfig};
pub use context::{Body, FilterContext, Message, MessageContext};
pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use filter::{Filter, FilterAction, FilterError, FilterRegistry, Sed, SedSpec, Spec, SED_NAME};
pub use route::{RouteTable, RouteTableError};
