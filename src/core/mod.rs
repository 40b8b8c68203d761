//! Core abstractions shared by every layer of the site
//!
//! Errors, versions, the per-request context, collaborator interfaces and the
//! container that wires the registries together.

pub mod container;
pub mod context;
pub mod error;
pub mod traits;
pub mod version;

// Re-export commonly used types
pub use container::SiteContainer;
pub use context::RequestContext;
pub use error::{ErrorContext, SiteError, SiteResult};
pub use traits::*;
