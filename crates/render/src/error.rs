//! Render-layer error types.

use thiserror::Error;

use hybrid_rhi::RhiError;

/// Error type for frame orchestration and render stages.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Underlying RHI or native API error
    #[error("RHI error: {0}")]
    Rhi(#[from] RhiError),

    /// Scene registration or draw-data error
    #[error("Scene error: {0}")]
    Scene(String),

    /// Shader module or reflection mismatch
    #[error("Shader error: {0}")]
    Shader(String),

    /// Stage lifecycle misuse
    #[error("Stage error: {0}")]
    Stage(String),
}

/// Result type alias for render operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
