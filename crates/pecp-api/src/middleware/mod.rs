//! # Middleware Modules
//!
//! Tower middleware layers for the control plane.

pub mod metrics;
pub mod tracing_layer;
