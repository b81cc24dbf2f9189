//! vectrace-engine: hybrid raster-to-vector engine (sans-IO).
//!
//! Converts a decoded pixel buffer into a compact vector document:
//! content analysis -> strategy selection -> primitive detection and/or
//! contour tracing -> fusion -> quality scoring -> optional refinement
//! -> document emission.
//!
//! This crate has **no I/O dependencies**. It never decodes image files
//! and never writes output; `vectrace-export` turns a
//! [`VectorDocument`] into SVG text and `vectrace-bench` handles files.
//!
//! ```no_run
//! use std::time::Duration;
//! use vectrace_engine::{Engine, EngineConfig, PixelFormat, VectorizeRequest};
//!
//! # fn main() -> Result<(), vectrace_engine::EngineError> {
//! let pixels = vec![255_u8; 64 * 64 * 4];
//! let engine = Engine::new(EngineConfig::default())?;
//! let out = engine.vectorize_raw(
//!     64,
//!     64,
//!     PixelFormat::Rgba8,
//!     &pixels,
//!     &VectorizeRequest::with_budget(Duration::from_millis(500)),
//! )?;
//! println!("{}", out.metrics.report());
//! # Ok(())
//! # }
//! ```

pub mod analyze;
pub mod budget;
pub mod config;
pub mod contour;
pub mod detect;
pub mod diagnostics;
pub mod edge;
pub mod element;
pub mod emit;
pub mod executor;
pub mod fusion;
pub mod orchestrator;
pub mod quality;
pub mod refine;
pub mod render;
pub mod simplify;
pub mod source;
pub mod spatial;
pub mod trace;
pub mod types;

pub use analyze::{ContentMetadata, ContentType};
pub use budget::{Deadline, ProcessingBudget};
pub use config::{
    AnalyzerConfig, DetectorParams, EngineConfig, FusionConfig, OrchestratorConfig,
    QualityConfig, RefinerConfig, TracerParams,
};
pub use diagnostics::{Component, StrategyRunMetrics, VectorizeMetrics};
pub use element::{
    ElementGeometry, FillRule, PathElement, PathStyle, Primitive, PrimitiveKind, PrimitiveShape,
    Provenance, Segment, StrategyKind, Stroke, Subpath, VectorElement,
};
pub use emit::VectorDocument;
pub use executor::{ParallelExecutor, SequentialExecutor, StrategyExecutor};
pub use fusion::StrategyResult;
pub use orchestrator::{OrchestratorState, StrategyHint, Vectorization, VectorizeRequest};
pub use quality::QualityScore;
pub use source::{PixelFormat, SourceImage};
pub use types::{BoundingBox, Color, Dimensions, EngineError, Point, StrategyError};

use orchestrator::Orchestrator;

/// A configured engine. Cheap to share; holds no per-invocation state,
/// so concurrent `vectorize` calls never interfere.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    executor: Box<dyn StrategyExecutor>,
}

impl Engine {
    /// Build an engine, choosing the executor from
    /// [`OrchestratorConfig::parallel`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if any value is out of range.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let executor: Box<dyn StrategyExecutor> = if config.orchestrator.parallel {
            Box::new(ParallelExecutor)
        } else {
            Box::new(SequentialExecutor)
        };
        Ok(Self { config, executor })
    }

    /// Replace the strategy executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Box<dyn StrategyExecutor>) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Vectorize a decoded image.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the request's quality
    /// target is outside `[0, 1]`, and [`EngineError::NoElementsProduced`]
    /// if every strategy (fallbacks included) produced nothing.
    pub fn vectorize(
        &self,
        source: &SourceImage,
        request: &VectorizeRequest,
    ) -> Result<Vectorization, EngineError> {
        if let Some(target) = request.quality_target
            && !(0.0..=1.0).contains(&target)
        {
            return Err(EngineError::InvalidConfig(format!(
                "quality target must be in [0, 1], got {target}"
            )));
        }
        tracing::debug!(
            width = source.width(),
            height = source.height(),
            budget_ms = request.budget.as_secs_f64() * 1000.0,
            hint = ?request.strategy_hint,
            "vectorize"
        );
        Orchestrator::new(&self.config, self.executor.as_ref()).run(source, request)
    }

    /// Vectorize a raw pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImage`] if the buffer is empty, a
    /// dimension is zero, or the length does not match, plus every error
    /// of [`Engine::vectorize`].
    pub fn vectorize_raw(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
        request: &VectorizeRequest,
    ) -> Result<Vectorization, EngineError> {
        let source = SourceImage::from_raw(width, height, format, pixels)?;
        self.vectorize(&source, request)
    }
}
