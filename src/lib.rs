//! Core of the folio content site.
//!
//! A dependency graph of versioned components, a lifecycle orchestrator that
//! converges modules to their configured state, and priority-ordered request
//! pipelines selected by a router of execution paths.

pub mod adapters;
pub mod config;
pub mod core;
pub mod graph;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod modules;
pub mod pipeline;
pub mod router;
pub mod service;
pub(crate) mod utils;
