//! Modules shipped with the site
//!
//! Each module mounts its routes when started and takes them down again when
//! stopped, so the route table only ever exposes running functionality.

pub mod content;
pub mod core_pages;

use std::sync::Arc;

use crate::{
    core::ContentProvider,
    lifecycle::ModuleDescriptor,
    router::RouteTable,
};

/// Descriptors of every built-in module
pub fn builtin_modules(
    routes: &Arc<RouteTable>,
    content: &Arc<dyn ContentProvider>,
) -> Vec<ModuleDescriptor> {
    vec![
        core_pages::descriptor(routes.clone()),
        content::descriptor(routes.clone(), content.clone()),
    ]
}
