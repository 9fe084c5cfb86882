//! Declarative synchronization scopes and pipeline barriers.
//!
//! This module provides the vocabulary render stages use to express GPU
//! dependencies:
//! - [`SyncScope`] names "which pipeline stages performed which memory
//!   accesses". Scopes compose with `|`, which is associative and commutative,
//!   so the order barriers are assembled in never changes their meaning.
//! - [`PipelineBarrier`] pairs a waited scope with a blocked scope: operations
//!   in the waited scope, and the visibility of their writes, must precede any
//!   operation in the blocked scope.
//!
//! Stages are expected to use the predefined scope constants rather than
//! assembling raw `vk::PipelineStageFlags`/`vk::AccessFlags` pairs by hand.
//!
//! # Example
//!
//! ```
//! use hybrid_rhi::barrier::{PipelineBarrier, SyncScope};
//!
//! // The lighting pass reads what the geometry pass wrote.
//! let barrier = PipelineBarrier {
//!     waited: SyncScope::COLOR_ATTACHMENT_WRITE | SyncScope::DEPTH_STENCIL_ATTACHMENT_WRITE,
//!     blocked: SyncScope::COMPUTE_SHADER_READ,
//! };
//! # let _ = barrier;
//! ```

use std::ops::{BitOr, BitOrAssign};

use ash::vk;

/// Pipeline stages covered by the generic shader-read scopes.
const ALL_SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw()
        | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR.as_raw(),
);

const DEPTH_STENCIL_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

const ACCELERATION_STRUCTURE_CONSUMER_STAGES: vk::PipelineStageFlags =
    vk::PipelineStageFlags::from_raw(
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR.as_raw()
            | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
    );

const READ_WRITE_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::MEMORY_READ.as_raw() | vk::AccessFlags::MEMORY_WRITE.as_raw(),
);

/// A set of pipeline stages paired with the memory accesses they performed
/// (or will perform).
///
/// Immutable value type. Composition via `|` OR-combines both masks and is
/// associative and commutative bit-for-bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncScope {
    /// Pipeline stages in this scope.
    pub stages: vk::PipelineStageFlags,
    /// Memory accesses performed by those stages.
    pub access: vk::AccessFlags,
}

impl SyncScope {
    /// Waits for nothing; usable as the waited half of a barrier that only
    /// establishes an execution dependency for later work.
    pub const WAIT_FOR_NONE: Self = Self::new(vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty());
    /// Waits for every write of every prior command.
    pub const WAIT_FOR_ALL: Self =
        Self::new(vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_WRITE);
    /// Blocks nothing; usable as the blocked half of a flush-only barrier.
    pub const BLOCK_NONE: Self =
        Self::new(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty());
    /// Blocks every access of every later command.
    pub const BLOCK_ALL: Self = Self::new(vk::PipelineStageFlags::ALL_COMMANDS, READ_WRITE_ACCESS);

    pub const TRANSFER_WRITE: Self =
        Self::new(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE);
    pub const TRANSFER_READ: Self =
        Self::new(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ);

    pub const VERTICES_READ: Self = Self::new(
        vk::PipelineStageFlags::VERTEX_INPUT,
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
    );
    pub const INDICES_READ: Self =
        Self::new(vk::PipelineStageFlags::VERTEX_INPUT, vk::AccessFlags::INDEX_READ);

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    );
    pub const DEPTH_STENCIL_ATTACHMENT_WRITE: Self = Self::new(
        DEPTH_STENCIL_STAGES,
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    );
    pub const DEPTH_STENCIL_ATTACHMENT_READ: Self = Self::new(
        DEPTH_STENCIL_STAGES,
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
    );

    pub const VERTEX_SHADER_READ: Self =
        Self::new(vk::PipelineStageFlags::VERTEX_SHADER, vk::AccessFlags::SHADER_READ);
    pub const VERTEX_UNIFORM_READ: Self =
        Self::new(vk::PipelineStageFlags::VERTEX_SHADER, vk::AccessFlags::UNIFORM_READ);
    pub const FRAGMENT_SHADER_READ: Self =
        Self::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ);
    pub const FRAGMENT_UNIFORM_READ: Self =
        Self::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::UNIFORM_READ);

    pub const COMPUTE_SHADER_READ: Self =
        Self::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_READ);
    pub const COMPUTE_SHADER_WRITE: Self =
        Self::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE);
    pub const COMPUTE_UNIFORM_READ: Self =
        Self::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::UNIFORM_READ);

    pub const RAY_TRACING_SHADER_READ: Self = Self::new(
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_READ,
    );
    pub const RAY_TRACING_SHADER_WRITE: Self = Self::new(
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_WRITE,
    );
    pub const RAY_TRACING_UNIFORM_READ: Self = Self::new(
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::UNIFORM_READ,
    );

    pub const ACCELERATION_STRUCTURE_WRITE: Self = Self::new(
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
    );
    pub const ACCELERATION_STRUCTURE_READ: Self = Self::new(
        ACCELERATION_STRUCTURE_CONSUMER_STAGES,
        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
    );

    /// Shader reads from any shader stage.
    pub const SHADER_READ: Self = Self::new(ALL_SHADER_STAGES, vk::AccessFlags::SHADER_READ);
    /// Uniform reads from any shader stage.
    pub const UNIFORM_READ: Self = Self::new(ALL_SHADER_STAGES, vk::AccessFlags::UNIFORM_READ);

    /// Creates a scope from raw stage and access masks.
    ///
    /// Prefer the predefined constants; this exists for the constants
    /// themselves and for tests.
    #[inline]
    pub const fn new(stages: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        Self { stages, access }
    }
}

impl BitOr for SyncScope {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self {
            stages: self.stages | rhs.stages,
            access: self.access | rhs.access,
        }
    }
}

impl BitOrAssign for SyncScope {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// "Operations in `waited`, and the visibility of their writes, must precede
/// any operation in `blocked`."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineBarrier {
    /// Scope whose execution and writes are waited for.
    pub waited: SyncScope,
    /// Scope that may not begin until the waited scope is visible.
    pub blocked: SyncScope,
}

impl PipelineBarrier {
    /// No-op barrier.
    pub const EMPTY: Self = Self {
        waited: SyncScope::WAIT_FOR_NONE,
        blocked: SyncScope::BLOCK_NONE,
    };

    /// Full stop: waits for everything, blocks everything.
    pub const FULL: Self = Self {
        waited: SyncScope::WAIT_FOR_ALL,
        blocked: SyncScope::BLOCK_ALL,
    };

    /// Creates a barrier from a waited and a blocked scope.
    #[inline]
    pub const fn new(waited: SyncScope, blocked: SyncScope) -> Self {
        Self { waited, blocked }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_or_is_commutative() {
        let a = SyncScope::COLOR_ATTACHMENT_WRITE;
        let b = SyncScope::DEPTH_STENCIL_ATTACHMENT_WRITE;

        assert_eq!(a | b, b | a);
    }

    #[test]
    fn test_scope_or_is_associative() {
        let a = SyncScope::TRANSFER_WRITE;
        let b = SyncScope::COMPUTE_SHADER_READ;
        let c = SyncScope::FRAGMENT_SHADER_READ;

        assert_eq!((a | b) | c, a | (b | c));
        assert_eq!((a | b) | c, b | a | c);
    }

    #[test]
    fn test_scope_or_combines_both_masks() {
        let combined = SyncScope::COMPUTE_SHADER_READ | SyncScope::COMPUTE_SHADER_WRITE;

        assert_eq!(combined.stages, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(combined.access.contains(vk::AccessFlags::SHADER_READ));
        assert!(combined.access.contains(vk::AccessFlags::SHADER_WRITE));
    }

    #[test]
    fn test_scope_or_assign_matches_or() {
        let mut scope = SyncScope::VERTICES_READ;
        scope |= SyncScope::INDICES_READ;

        assert_eq!(scope, SyncScope::VERTICES_READ | SyncScope::INDICES_READ);
    }

    #[test]
    fn test_shader_read_covers_all_shader_stages() {
        let scope = SyncScope::SHADER_READ;

        assert!(scope.stages.contains(vk::PipelineStageFlags::VERTEX_SHADER));
        assert!(scope.stages.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(scope.stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(scope
            .stages
            .contains(vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR));
    }

    #[test]
    fn test_empty_barrier_waits_for_nothing() {
        assert_eq!(PipelineBarrier::EMPTY.waited.access, vk::AccessFlags::empty());
        assert_eq!(PipelineBarrier::EMPTY.blocked.access, vk::AccessFlags::empty());
    }
}
