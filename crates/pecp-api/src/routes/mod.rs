//! # Route Modules
//!
//! Each module defines an Axum Router for one API surface area.
//! Routers are assembled in [`crate::app`].

pub mod bindings;
pub mod bundles;
pub mod catalog;
pub mod policies;
pub mod stats;
pub mod ws;
