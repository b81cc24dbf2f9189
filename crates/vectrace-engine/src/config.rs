//! Engine configuration.
//!
//! Every tunable lives here with a named default so front ends (the CLI,
//! tests) can reference the same values. All structs deserialize with
//! `#[serde(default)]`, so partial JSON configs are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::EngineError;

/// Content analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Gaussian pre-blur sigma applied to luminance before gradient
    /// computation. Zero disables the blur.
    pub blur_sigma: f32,
    /// Hysteresis low threshold on Sobel gradient magnitude.
    pub canny_low: f32,
    /// Hysteresis high threshold on Sobel gradient magnitude.
    pub canny_high: f32,
    /// Summed absolute RGBA difference between neighbouring pixels that
    /// marks a colour boundary.
    pub color_edge_threshold: u32,
    /// Maximum number of dominant colors reported.
    pub max_colors: usize,
    /// Coverage a color needs to count towards the significant color count.
    pub significant_color_coverage: f64,
    /// Share of border pixels one color must cover to be the background.
    pub background_border_fraction: f64,
    /// Classification scores within this margin of the best are a tie,
    /// resolved in favor of `Mixed`.
    pub tie_margin: f64,
}

impl AnalyzerConfig {
    pub const DEFAULT_BLUR_SIGMA: f32 = 1.0;
    pub const DEFAULT_CANNY_LOW: f32 = 50.0;
    pub const DEFAULT_CANNY_HIGH: f32 = 150.0;
    pub const DEFAULT_COLOR_EDGE_THRESHOLD: u32 = 96;
    pub const DEFAULT_MAX_COLORS: usize = 16;
    pub const DEFAULT_SIGNIFICANT_COLOR_COVERAGE: f64 = 0.01;
    pub const DEFAULT_BACKGROUND_BORDER_FRACTION: f64 = 0.6;
    pub const DEFAULT_TIE_MARGIN: f64 = 0.05;
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            color_edge_threshold: Self::DEFAULT_COLOR_EDGE_THRESHOLD,
            max_colors: Self::DEFAULT_MAX_COLORS,
            significant_color_coverage: Self::DEFAULT_SIGNIFICANT_COLOR_COVERAGE,
            background_border_fraction: Self::DEFAULT_BACKGROUND_BORDER_FRACTION,
            tie_margin: Self::DEFAULT_TIE_MARGIN,
        }
    }
}

/// Primitive detector parameters.
///
/// The orchestrator owns these; faster plans raise
/// `confidence_threshold` to skip low-confidence fitting work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Candidates below this confidence are never emitted.
    pub confidence_threshold: f64,
    /// Smallest circle radius searched, in pixels.
    pub min_radius: f64,
    /// Largest circle radius searched, in pixels.
    pub max_radius: f64,
    /// Smallest rectangle/polygon extent, in pixels.
    pub min_size: f64,
    /// Polygons with more vertices than this are left to the tracer.
    pub max_polygon_vertices: usize,
    /// Overlap (fraction of the smaller box) above which two candidates
    /// explain the same region.
    pub merge_overlap: f64,
    /// Confidence difference within which the simpler primitive kind wins.
    pub kind_preference_margin: f64,
}

impl DetectorParams {
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
    pub const DEFAULT_MIN_RADIUS: f64 = 3.0;
    pub const DEFAULT_MAX_RADIUS: f64 = 1024.0;
    pub const DEFAULT_MIN_SIZE: f64 = 4.0;
    pub const DEFAULT_MAX_POLYGON_VERTICES: usize = 12;
    pub const DEFAULT_MERGE_OVERLAP: f64 = 0.7;
    pub const DEFAULT_KIND_PREFERENCE_MARGIN: f64 = 0.05;
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
            min_radius: Self::DEFAULT_MIN_RADIUS,
            max_radius: Self::DEFAULT_MAX_RADIUS,
            min_size: Self::DEFAULT_MIN_SIZE,
            max_polygon_vertices: Self::DEFAULT_MAX_POLYGON_VERTICES,
            merge_overlap: Self::DEFAULT_MERGE_OVERLAP,
            kind_preference_margin: Self::DEFAULT_KIND_PREFERENCE_MARGIN,
        }
    }
}

/// Classical tracer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerParams {
    /// Contours enclosing less area than this (square pixels) are noise.
    pub min_area: f64,
    /// Douglas-Peucker tolerance in pixels. Higher is faster and coarser.
    pub tolerance: f64,
    /// Whether to replace gentle polyline runs with cubic curves.
    pub smooth_curves: bool,
    /// Turning angle below which a vertex counts as smooth.
    pub curvature_threshold_degrees: f64,
    /// Stroke width used for thin (line-art) contours.
    pub stroke_width: f64,
    /// Overlap above which contours are grouped into one compound path.
    pub group_overlap: f64,
}

impl TracerParams {
    pub const DEFAULT_MIN_AREA: f64 = 16.0;
    pub const DEFAULT_TOLERANCE: f64 = 1.0;
    pub const DEFAULT_CURVATURE_THRESHOLD_DEGREES: f64 = 35.0;
    pub const DEFAULT_STROKE_WIDTH: f64 = 1.5;
    pub const DEFAULT_GROUP_OVERLAP: f64 = 0.7;
}

impl Default for TracerParams {
    fn default() -> Self {
        Self {
            min_area: Self::DEFAULT_MIN_AREA,
            tolerance: Self::DEFAULT_TOLERANCE,
            smooth_curves: true,
            curvature_threshold_degrees: Self::DEFAULT_CURVATURE_THRESHOLD_DEGREES,
            stroke_width: Self::DEFAULT_STROKE_WIDTH,
            group_overlap: Self::DEFAULT_GROUP_OVERLAP,
        }
    }
}

/// Differentiable refiner parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    pub enabled: bool,
    /// Gradient steps per refinement pass.
    pub iterations: usize,
    /// Only the largest elements are refined.
    pub max_elements: usize,
    /// Longest side of the raster used to measure reconstruction error.
    pub working_resolution: u32,
    /// First line-search step length, in source pixels.
    pub initial_step: f64,
    /// Wall-clock limit for one refinement pass.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub time_slice: Duration,
}

impl RefinerConfig {
    pub const DEFAULT_ITERATIONS: usize = 6;
    pub const DEFAULT_MAX_ELEMENTS: usize = 16;
    pub const DEFAULT_WORKING_RESOLUTION: u32 = 96;
    pub const DEFAULT_INITIAL_STEP: f64 = 1.0;
    pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(250);
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iterations: Self::DEFAULT_ITERATIONS,
            max_elements: Self::DEFAULT_MAX_ELEMENTS,
            working_resolution: Self::DEFAULT_WORKING_RESOLUTION,
            initial_step: Self::DEFAULT_INITIAL_STEP,
            time_slice: Self::DEFAULT_TIME_SLICE,
        }
    }
}

/// Fusion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Two elements whose bounding boxes overlap by more than this
    /// fraction of the smaller box are duplicates.
    pub overlap_threshold: f64,
}

impl FusionConfig {
    pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.7;
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: Self::DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

/// Quality assessment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Score at or above which no refinement is attempted.
    pub good_enough: f64,
    /// Longest side of the raster compared against the source.
    pub working_resolution: u32,
    /// Weight of the structural term; color fidelity gets the rest.
    pub structural_weight: f64,
    /// Upper bound of the element-count penalty.
    pub max_element_penalty: f64,
    /// Element count at which half the maximum penalty applies.
    pub element_penalty_scale: f64,
}

impl QualityConfig {
    pub const DEFAULT_GOOD_ENOUGH: f64 = 0.9;
    pub const DEFAULT_WORKING_RESOLUTION: u32 = 128;
    pub const DEFAULT_STRUCTURAL_WEIGHT: f64 = 0.6;
    pub const DEFAULT_MAX_ELEMENT_PENALTY: f64 = 0.2;
    pub const DEFAULT_ELEMENT_PENALTY_SCALE: f64 = 400.0;
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            good_enough: Self::DEFAULT_GOOD_ENOUGH,
            working_resolution: Self::DEFAULT_WORKING_RESOLUTION,
            structural_weight: Self::DEFAULT_STRUCTURAL_WEIGHT,
            max_element_penalty: Self::DEFAULT_MAX_ELEMENT_PENALTY,
            element_penalty_scale: Self::DEFAULT_ELEMENT_PENALTY_SCALE,
        }
    }
}

/// Strategy orchestration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Longest time one strategy may run before it is force-stopped.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub strategy_slice: Duration,
    /// Below this remaining budget only the primary strategy runs, with
    /// coarsened parameters.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub fast_path_threshold: Duration,
    /// Tracer tolerance multiplier on the fast path.
    pub fast_tolerance_factor: f64,
    /// Detector threshold increase on the fast path.
    pub fast_threshold_boost: f64,
    /// Classification confidence below which content is treated as mixed.
    pub low_confidence: f64,
    /// Upper bound on quality-driven refinement loops.
    pub max_refinement_passes: usize,
    /// Evaluate concurrent stages on the rayon pool.
    pub parallel: bool,
}

impl OrchestratorConfig {
    pub const DEFAULT_STRATEGY_SLICE: Duration = Duration::from_secs(2);
    pub const DEFAULT_FAST_PATH_THRESHOLD: Duration = Duration::from_millis(50);
    pub const DEFAULT_FAST_TOLERANCE_FACTOR: f64 = 2.0;
    pub const DEFAULT_FAST_THRESHOLD_BOOST: f64 = 0.15;
    pub const DEFAULT_LOW_CONFIDENCE: f64 = 0.45;
    pub const DEFAULT_MAX_REFINEMENT_PASSES: usize = 2;
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strategy_slice: Self::DEFAULT_STRATEGY_SLICE,
            fast_path_threshold: Self::DEFAULT_FAST_PATH_THRESHOLD,
            fast_tolerance_factor: Self::DEFAULT_FAST_TOLERANCE_FACTOR,
            fast_threshold_boost: Self::DEFAULT_FAST_THRESHOLD_BOOST,
            low_confidence: Self::DEFAULT_LOW_CONFIDENCE,
            max_refinement_passes: Self::DEFAULT_MAX_REFINEMENT_PASSES,
            parallel: false,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub detector: DetectorParams,
    pub tracer: TracerParams,
    pub refiner: RefinerConfig,
    pub fusion: FusionConfig,
    pub quality: QualityConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Check every value range.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), EngineError> {
        let a = &self.analyzer;
        check(a.blur_sigma >= 0.0, "analyzer.blur_sigma must be >= 0")?;
        check(
            a.canny_low > 0.0 && a.canny_low <= a.canny_high,
            "analyzer.canny_low must be > 0 and <= canny_high",
        )?;
        check(a.max_colors > 0, "analyzer.max_colors must be > 0")?;
        check(
            is_fraction(a.significant_color_coverage),
            "analyzer.significant_color_coverage must be in [0, 1]",
        )?;
        check(
            is_fraction(a.background_border_fraction),
            "analyzer.background_border_fraction must be in [0, 1]",
        )?;
        check(is_fraction(a.tie_margin), "analyzer.tie_margin must be in [0, 1]")?;

        let d = &self.detector;
        check(
            is_fraction(d.confidence_threshold),
            "detector.confidence_threshold must be in [0, 1]",
        )?;
        check(
            d.min_radius > 0.0 && d.min_radius <= d.max_radius,
            "detector.min_radius must be > 0 and <= max_radius",
        )?;
        check(d.min_size >= 0.0, "detector.min_size must be >= 0")?;
        check(
            d.max_polygon_vertices >= 3,
            "detector.max_polygon_vertices must be >= 3",
        )?;
        check(
            is_fraction(d.merge_overlap),
            "detector.merge_overlap must be in [0, 1]",
        )?;
        check(
            is_fraction(d.kind_preference_margin),
            "detector.kind_preference_margin must be in [0, 1]",
        )?;

        let t = &self.tracer;
        check(t.min_area >= 0.0, "tracer.min_area must be >= 0")?;
        check(t.tolerance > 0.0, "tracer.tolerance must be > 0")?;
        check(
            (0.0..=180.0).contains(&t.curvature_threshold_degrees),
            "tracer.curvature_threshold_degrees must be in [0, 180]",
        )?;
        check(t.stroke_width > 0.0, "tracer.stroke_width must be > 0")?;
        check(
            is_fraction(t.group_overlap),
            "tracer.group_overlap must be in [0, 1]",
        )?;

        let r = &self.refiner;
        check(
            r.working_resolution >= 8,
            "refiner.working_resolution must be >= 8",
        )?;
        check(r.initial_step > 0.0, "refiner.initial_step must be > 0")?;

        check(
            is_fraction(self.fusion.overlap_threshold),
            "fusion.overlap_threshold must be in [0, 1]",
        )?;

        let q = &self.quality;
        check(is_fraction(q.good_enough), "quality.good_enough must be in [0, 1]")?;
        check(
            q.working_resolution >= 8,
            "quality.working_resolution must be >= 8",
        )?;
        check(
            is_fraction(q.structural_weight),
            "quality.structural_weight must be in [0, 1]",
        )?;
        check(
            is_fraction(q.max_element_penalty),
            "quality.max_element_penalty must be in [0, 1]",
        )?;
        check(
            q.element_penalty_scale > 0.0,
            "quality.element_penalty_scale must be > 0",
        )?;

        let o = &self.orchestrator;
        check(
            !o.strategy_slice.is_zero(),
            "orchestrator.strategy_slice must be > 0",
        )?;
        check(
            o.fast_tolerance_factor >= 1.0,
            "orchestrator.fast_tolerance_factor must be >= 1",
        )?;
        check(
            is_fraction(o.fast_threshold_boost),
            "orchestrator.fast_threshold_boost must be in [0, 1]",
        )?;
        check(
            is_fraction(o.low_confidence),
            "orchestrator.low_confidence must be in [0, 1]",
        )?;
        Ok(())
    }
}

fn is_fraction(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn check(ok: bool, message: &str) -> Result<(), EngineError> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(message.to_string()))
    }
}
