//! GPU frame orchestration and resource lifecycle.
//!
//! This crate is the synchronization core of the renderer:
//! - [`frame_loop::FrameLoop`] paces CPU command recording against
//!   asynchronous GPU execution across N buffered frame slots
//! - [`lifetime::ResourceLifetimeTracker`] defers resource destruction
//!   until no in-flight frame can reference the resource
//! - [`descriptor_slots::DescriptorSlotProvider`] allocates and updates
//!   descriptor sets at Global and PerSlice rates
//! - [`stage::StagePipeline`] runs the render stages in fixed dependency
//!   order inside the frame loop's draw callback

mod error;

pub mod descriptor_slots;
pub mod frame_loop;
pub mod lifetime;
pub mod pacing;
pub mod resources;
pub mod scene;
pub mod stage;
pub mod stages;
pub mod ubo;

pub use error::{RenderError, RenderResult};
pub use frame_loop::{DrawOutcome, FrameLoop};

/// Default number of frames in flight.
pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 2;
