//! Invocation metrics: timing per component, strategy outcomes, and the
//! final quality score.
//!
//! Every call to [`Engine::vectorize`](crate::Engine::vectorize) returns a
//! [`VectorizeMetrics`] record alongside the document. The engine does
//! not know how these are displayed or stored; consumers serialize them
//! (JSON) or print [`VectorizeMetrics::report`].
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analyze::ContentType;
use crate::element::StrategyKind;
use crate::orchestrator::OrchestratorState;
use crate::quality::QualityScore;

/// Serde support for `std::time::Duration` as fractional seconds.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Pipeline components whose wall-clock time is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    ContentAnalysis,
    PrimitiveDetection,
    ClassicalTracing,
    Refinement,
    Fusion,
    QualityAssessment,
    DocumentEmission,
}

impl Component {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ContentAnalysis => "Content Analysis",
            Self::PrimitiveDetection => "Primitive Detection",
            Self::ClassicalTracing => "Classical Tracing",
            Self::Refinement => "Refinement",
            Self::Fusion => "Fusion",
            Self::QualityAssessment => "Quality Assessment",
            Self::DocumentEmission => "Document Emission",
        }
    }
}

impl From<StrategyKind> for Component {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::PrimitiveDetection => Self::PrimitiveDetection,
            StrategyKind::ClassicalTracing => Self::ClassicalTracing,
            StrategyKind::Refinement => Self::Refinement,
        }
    }
}

/// One timed component execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTiming {
    pub component: Component,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Outcome of one strategy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRunMetrics {
    pub strategy: StrategyKind,
    /// Index of the plan stage the run belonged to.
    pub stage: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub element_count: usize,
    /// The run hit its slice and returned partial results.
    pub timed_out: bool,
    /// Internal error message when the run's contribution was skipped.
    pub error: Option<String>,
}

/// Structured record of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizeMetrics {
    /// Wall-clock time from entry to return.
    #[serde(with = "duration_serde")]
    pub processing_time: Duration,
    /// Budget the caller granted.
    #[serde(with = "duration_serde")]
    pub budget: Duration,
    /// Strategy that created most of the emitted elements.
    pub strategy_used: StrategyKind,
    pub strategy_runs: Vec<StrategyRunMetrics>,
    pub content_type: ContentType,
    pub content_confidence: f64,
    /// `None` only when a hard deadline aborted the run before assessment.
    pub quality: Option<QualityScore>,
    pub element_count: usize,
    /// Elements removed by fusion as duplicates.
    pub discarded_count: usize,
    pub refinement_passes: usize,
    pub final_state: OrchestratorState,
    /// Content hash of the source image.
    pub fingerprint: u64,
    pub components: Vec<ComponentTiming>,
}

impl VectorizeMetrics {
    /// Total time recorded for one component.
    #[must_use]
    pub fn component_time(&self, component: Component) -> Duration {
        self.components
            .iter()
            .filter(|t| t.component == component)
            .map(|t| t.duration)
            .sum()
    }

    /// Format metrics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Vectorization Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Content: {:?} (confidence {:.2})  |  Fingerprint: {:016x}",
            self.content_type, self.content_confidence, self.fingerprint,
        ));
        lines.push(format!(
            "Processing time: {:.3}ms of {:.3}ms budget  |  State: {:?}",
            duration_ms(self.processing_time),
            duration_ms(self.budget),
            self.final_state,
        ));
        lines.push(String::new());

        lines.push(format!("{:<24} {:>10} {:>10}", "Component", "Duration", "% Total"));
        lines.push("-".repeat(48));
        let total_ms = duration_ms(self.processing_time);
        for timing in &self.components {
            let ms = duration_ms(timing.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "{:<24} {ms:>8.3}ms {pct:>9.1}%",
                timing.component.label()
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>6} {:>10} {:>9}  {}",
            "Strategy", "Stage", "Duration", "Elements", "Notes"
        ));
        lines.push("-".repeat(60));
        for run in &self.strategy_runs {
            let notes = match (&run.error, run.timed_out) {
                (Some(e), _) => format!("skipped: {e}"),
                (None, true) => "timed out (partial)".to_string(),
                (None, false) => String::new(),
            };
            lines.push(format!(
                "{:<12} {:>6} {:>8.3}ms {:>9}  {notes}",
                run.strategy.name(),
                run.stage,
                duration_ms(run.duration),
                run.element_count,
            ));
        }

        lines.push(String::new());
        match &self.quality {
            Some(q) => lines.push(format!(
                "Quality: {:.3} (structure {:.3}, color {:.3}, penalty {:.4})",
                q.score, q.structural_similarity, q.color_fidelity, q.element_penalty,
            )),
            None => lines.push("Quality: not assessed".to_string()),
        }
        lines.push(format!(
            "Elements: {}  |  Discarded by fusion: {}  |  Refinement passes: {}",
            self.element_count, self.discarded_count, self.refinement_passes,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
