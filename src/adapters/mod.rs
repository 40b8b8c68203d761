//! In-process implementations of the collaborator interfaces
//!
//! These back the binary and the tests; real deployments can swap in their own
//! storage, renderer or session store through the traits in `core::traits`.

pub mod memory;
pub mod template;

pub use memory::{MemoryContentStore, MemorySessionStore};
pub use template::SimpleTemplateRenderer;
