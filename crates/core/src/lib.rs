//! Core utilities for the hybrid renderer.
//!
//! This crate provides the logging foundation shared by every other crate.

mod logging;

pub use logging::init_logging;
