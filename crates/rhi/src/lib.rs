//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate,
//! built on handles produced by an external device/swapchain bootstrap.
//! It handles:
//! - Device context and scoped one-shot command submission
//! - Command buffer recording
//! - Synchronization primitives and the access/stage scope vocabulary
//! - Buffer, image and descriptor management
//! - Batched CPU-to-GPU uploads
//! - Swapchain acquisition and presentation

mod error;

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod rendering;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
