//! Strategy orchestration under a time budget.
//!
//! The orchestrator is a small state machine:
//!
//! ```text
//! Selecting -> Running -> (Refining)* -> Converged
//!     \__________\____________\______-> Aborted  (hard deadline)
//! ```
//!
//! It picks a [`StrategyPlan`] from the content type and the remaining
//! budget, runs each stage through the injected [`StrategyExecutor`],
//! fuses the results, scores them, and loops into refinement while the
//! score is below target and time remains. It is the only place where
//! strategy errors are turned into diagnostics, and the only component
//! that shortens work to meet a deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::analyze::{ContentMetadata, ContentType, analyze};
use crate::budget::{Deadline, ProcessingBudget};
use crate::config::{DetectorParams, EngineConfig, TracerParams};
use crate::detect::detect;
use crate::diagnostics::{Component, ComponentTiming, StrategyRunMetrics, VectorizeMetrics};
use crate::element::{StrategyKind, StrategyOutput, VectorElement};
use crate::emit::{VectorDocument, emit};
use crate::executor::{StrategyExecutor, StrategyRun, StrategyTask};
use crate::fusion::{StrategyResult, fuse};
use crate::quality::{QualityScore, assess};
use crate::refine::refine;
use crate::source::SourceImage;
use crate::trace::trace;
use crate::types::{EngineError, StrategyError};

/// Orchestrator life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Selecting,
    Running,
    Refining,
    Converged,
    Aborted,
}

/// Caller preference for strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyHint {
    /// Decide from the content type.
    #[default]
    Auto,
    /// Primitive detection first.
    Primitives,
    /// Classical tracing first.
    Tracing,
    /// Both strategies in one concurrent stage.
    Hybrid,
}

/// One strategy invocation with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyParams {
    Detector(DetectorParams),
    Tracer(TracerParams),
}

impl StrategyParams {
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Detector(_) => StrategyKind::PrimitiveDetection,
            Self::Tracer(_) => StrategyKind::ClassicalTracing,
        }
    }
}

/// Ordered stages; strategies within a stage may run concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyPlan {
    pub stages: Vec<Vec<StrategyParams>>,
    /// Coarsened parameters, primary stage only.
    pub fast: bool,
}

impl StrategyPlan {
    /// First strategy of the first stage.
    #[must_use]
    pub fn primary(&self) -> Option<StrategyKind> {
        self.stages
            .first()
            .and_then(|stage| stage.first())
            .map(StrategyParams::kind)
    }

    /// Every strategy in plan order.
    pub fn kinds(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        self.stages.iter().flatten().map(StrategyParams::kind)
    }
}

/// Per-invocation request options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeRequest {
    /// Soft wall-clock budget.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub budget: Duration,
    pub strategy_hint: StrategyHint,
    /// Overrides [`QualityConfig::good_enough`](crate::config::QualityConfig).
    pub quality_target: Option<f64>,
    /// Absolute cut-off measured from invocation start. On expiry the
    /// run aborts and returns the first non-empty strategy result.
    #[serde(with = "optional_duration")]
    pub hard_deadline: Option<Duration>,
}

impl VectorizeRequest {
    pub const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

    /// A request with the given budget and defaults otherwise.
    #[must_use]
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }
}

impl Default for VectorizeRequest {
    fn default() -> Self {
        Self {
            budget: Self::DEFAULT_BUDGET,
            strategy_hint: StrategyHint::Auto,
            quality_target: None,
            hard_deadline: None,
        }
    }
}

mod optional_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|_| {
                    serde::de::Error::custom("hard deadline must be finite and non-negative")
                })
            })
            .transpose()
    }
}

/// Everything one invocation returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Vectorization {
    pub document: VectorDocument,
    pub metrics: VectorizeMetrics,
    /// Strategy outputs before fusion, in plan order.
    pub strategy_results: Vec<StrategyResult>,
}

/// Choose a plan from the lookup table.
///
/// `remaining` below the fast-path threshold coarsens parameters and
/// keeps only the primary stage.
#[must_use]
pub fn select_plan(
    content: &ContentMetadata,
    hint: StrategyHint,
    remaining: Duration,
    config: &EngineConfig,
) -> StrategyPlan {
    use StrategyKind::{ClassicalTracing as T, PrimitiveDetection as D};

    let effective = match hint {
        StrategyHint::Auto if content.confidence < config.orchestrator.low_confidence => {
            StrategyHint::Hybrid
        }
        StrategyHint::Auto => match content.content_type {
            ContentType::TextDominant | ContentType::Gradient => StrategyHint::Tracing,
            ContentType::Geometric => StrategyHint::Primitives,
            ContentType::Mixed => StrategyHint::Hybrid,
        },
        explicit => explicit,
    };
    let layout: &[&[StrategyKind]] = match effective {
        StrategyHint::Primitives => &[&[D], &[T]],
        StrategyHint::Tracing => &[&[T], &[D]],
        StrategyHint::Hybrid | StrategyHint::Auto => &[&[D, T]],
    };

    let fast = remaining < config.orchestrator.fast_path_threshold;
    let stages = layout
        .iter()
        .take(if fast { 1 } else { layout.len() })
        .map(|stage| {
            stage
                .iter()
                .map(|&kind| strategy_params(kind, config, fast))
                .collect()
        })
        .collect();
    StrategyPlan { stages, fast }
}

/// Parameters for one strategy, coarsened on the fast path.
fn strategy_params(kind: StrategyKind, config: &EngineConfig, fast: bool) -> StrategyParams {
    let o = &config.orchestrator;
    match kind {
        StrategyKind::PrimitiveDetection => {
            let mut params = config.detector.clone();
            if fast {
                params.confidence_threshold =
                    (params.confidence_threshold + o.fast_threshold_boost).min(1.0);
            }
            StrategyParams::Detector(params)
        }
        StrategyKind::ClassicalTracing | StrategyKind::Refinement => {
            let mut params = config.tracer.clone();
            params.group_overlap = params.group_overlap.min(config.fusion.overlap_threshold);
            if fast {
                params.tolerance *= o.fast_tolerance_factor;
            }
            StrategyParams::Tracer(params)
        }
    }
}

/// Dispatch table from strategy parameters to the implementing
/// component.
fn dispatch(
    source: &SourceImage,
    content: &ContentMetadata,
    params: &StrategyParams,
    deadline: Deadline,
) -> Result<StrategyOutput, StrategyError> {
    match params {
        StrategyParams::Detector(p) => detect(source, content, p, deadline),
        StrategyParams::Tracer(p) => trace(source, content, p, deadline),
    }
}

/// Turn one strategy run into a result for fusion (if it contributes)
/// and a metrics row.
///
/// Timeouts keep partial output; internal errors drop the run's
/// contribution entirely.
#[must_use]
pub fn absorb(run: StrategyRun, stage: usize) -> (Option<StrategyResult>, StrategyRunMetrics) {
    let mut metrics = StrategyRunMetrics {
        strategy: run.strategy,
        stage,
        duration: run.elapsed,
        element_count: 0,
        timed_out: false,
        error: None,
    };
    match run.outcome {
        Ok(output) => {
            if output.timed_out {
                tracing::warn!(
                    strategy = run.strategy.name(),
                    elements = output.elements.len(),
                    "strategy hit its time slice; keeping partial result"
                );
            }
            metrics.element_count = output.elements.len();
            metrics.timed_out = output.timed_out;
            let result = StrategyResult {
                strategy: run.strategy,
                elements: output.elements,
                elapsed: run.elapsed,
                timed_out: output.timed_out,
            };
            (Some(result), metrics)
        }
        Err(error @ StrategyError::Timeout { .. }) => {
            tracing::warn!(strategy = run.strategy.name(), %error, "strategy timed out");
            metrics.timed_out = true;
            (None, metrics)
        }
        Err(error @ StrategyError::Internal(_)) => {
            tracing::warn!(strategy = run.strategy.name(), %error, "strategy skipped");
            metrics.error = Some(error.to_string());
            (None, metrics)
        }
    }
}

/// Per-invocation state: budget, deadlines, and the metrics being
/// collected. Never shared between invocations.
#[derive(Debug)]
pub struct InvocationContext {
    budget: ProcessingBudget,
    hard_deadline: Deadline,
    state: OrchestratorState,
    components: Vec<ComponentTiming>,
    runs: Vec<StrategyRunMetrics>,
    results: Vec<StrategyResult>,
    discarded: usize,
}

impl InvocationContext {
    #[must_use]
    pub fn new(request: &VectorizeRequest) -> Self {
        let budget = ProcessingBudget::start(request.budget);
        let hard_deadline = request
            .hard_deadline
            .map_or_else(Deadline::none, |d| Deadline::at(budget.started() + d));
        Self {
            budget,
            hard_deadline,
            state: OrchestratorState::Selecting,
            components: Vec::new(),
            runs: Vec::new(),
            results: Vec::new(),
            discarded: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> OrchestratorState {
        self.state
    }

    #[must_use]
    pub const fn budget(&self) -> &ProcessingBudget {
        &self.budget
    }

    fn transition(&mut self, to: OrchestratorState) {
        if self.state != to {
            tracing::debug!(from = ?self.state, to = ?to, "orchestrator transition");
            self.state = to;
        }
    }

    /// Run `f` and record its wall-clock time under `component`.
    fn timed<T>(&mut self, component: Component, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.components.push(ComponentTiming {
            component,
            duration: start.elapsed(),
        });
        value
    }

    /// Deadline for one strategy slice, never past the budget or the
    /// hard deadline.
    fn slice(&self, slice: Duration) -> Deadline {
        self.budget.slice(slice).min(self.hard_deadline)
    }

    fn hard_expired(&self) -> bool {
        self.hard_deadline.expired()
    }

    fn record(&mut self, runs: Vec<StrategyRun>, stage: usize) {
        for run in runs {
            self.components.push(ComponentTiming {
                component: Component::from(run.strategy),
                duration: run.elapsed,
            });
            let (result, metrics) = absorb(run, stage);
            tracing::info!(
                strategy = metrics.strategy.name(),
                stage,
                elements = metrics.element_count,
                elapsed_ms = metrics.duration.as_secs_f64() * 1000.0,
                "strategy finished"
            );
            self.runs.push(metrics);
            if let Some(result) = result {
                self.results.push(result);
            }
        }
    }

    fn produced(&self) -> usize {
        self.results.iter().map(|r| r.elements.len()).sum()
    }
}

/// Drives one invocation from analysis to document.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    config: &'a EngineConfig,
    executor: &'a dyn StrategyExecutor,
}

impl<'a> Orchestrator<'a> {
    #[must_use]
    pub fn new(config: &'a EngineConfig, executor: &'a dyn StrategyExecutor) -> Self {
        Self { config, executor }
    }

    /// Vectorize `source`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoElementsProduced`] when no strategy,
    /// including fallbacks, produced a single element.
    pub fn run(
        &self,
        source: &SourceImage,
        request: &VectorizeRequest,
    ) -> Result<Vectorization, EngineError> {
        let mut ctx = InvocationContext::new(request);
        let content = ctx.timed(Component::ContentAnalysis, || {
            analyze(source, &self.config.analyzer)
        });

        let plan = select_plan(
            &content,
            request.strategy_hint,
            ctx.budget.remaining(),
            self.config,
        );
        tracing::info!(
            content_type = ?content.content_type,
            confidence = content.confidence,
            primary = ?plan.primary(),
            stages = plan.stages.len(),
            fast = plan.fast,
            executor = self.executor.name(),
            "strategy plan selected"
        );

        ctx.transition(OrchestratorState::Running);
        for (stage, params) in plan.stages.iter().enumerate() {
            if stage > 0 && (ctx.budget.is_exhausted() || ctx.hard_expired()) {
                tracing::debug!(stage, "budget spent; skipping remaining stages");
                break;
            }
            self.run_stage(&mut ctx, source, &content, params, stage);
        }

        if ctx.produced() == 0 && !ctx.hard_expired() {
            self.run_fallbacks(&mut ctx, source, &content, &plan);
        }

        if ctx.hard_expired() {
            return Self::abort(ctx, source, &content, request);
        }

        let base = base_results(&ctx.results);
        let fused = ctx.timed(Component::Fusion, || fuse(&base, &self.config.fusion));
        ctx.discarded += fused.discards.len();
        let mut elements = fused.elements;
        if elements.is_empty() {
            tracing::warn!("no strategy produced any element");
            return Err(EngineError::NoElementsProduced);
        }

        let target = request
            .quality_target
            .unwrap_or(self.config.quality.good_enough);
        let mut quality = self.assess(&mut ctx, source, &content, &elements);
        let mut passes = 0;
        while self.config.refiner.enabled
            && passes < self.config.orchestrator.max_refinement_passes
            && !quality.meets(target)
            && !ctx.budget.is_exhausted()
            && !ctx.hard_expired()
        {
            ctx.transition(OrchestratorState::Refining);
            let Some(refined) = self.refine_once(&mut ctx, source, &content, &elements)
            else {
                break;
            };
            let candidate = self.assess(&mut ctx, source, &content, &refined);
            if !improves(&candidate, &quality) {
                tracing::debug!(
                    before = quality.score,
                    after = candidate.score,
                    "refined set scored lower; keeping previous elements"
                );
                break;
            }
            passes += 1;
            elements = refined;
            quality = candidate;
        }

        let strategy_used = dominant_strategy(&elements, &plan)
            .or_else(|| plan.primary())
            .unwrap_or(StrategyKind::PrimitiveDetection);
        ctx.transition(OrchestratorState::Converged);
        let document = ctx.timed(Component::DocumentEmission, || {
            emit(&elements, content.dimensions, content.background)
        });
        Ok(Self::finish(
            ctx,
            source,
            &content,
            request,
            strategy_used,
            document,
            Some(quality),
            passes,
        ))
    }

    fn run_stage(
        &self,
        ctx: &mut InvocationContext,
        source: &SourceImage,
        content: &ContentMetadata,
        params: &[StrategyParams],
        stage: usize,
    ) {
        let deadline = ctx.slice(self.config.orchestrator.strategy_slice);
        let tasks: Vec<StrategyTask<'_>> = params
            .iter()
            .map(|p| {
                Box::new(move || {
                    tracing::debug!(strategy = p.kind().name(), stage, "strategy started");
                    let start = Instant::now();
                    let outcome = dispatch(source, content, p, deadline);
                    StrategyRun {
                        strategy: p.kind(),
                        outcome,
                        elapsed: start.elapsed(),
                    }
                }) as StrategyTask<'_>
            })
            .collect();
        let runs = self.executor.execute(tasks);
        ctx.record(runs, stage);
    }

    /// Try every strategy the plan did not run, one at a time.
    fn run_fallbacks(
        &self,
        ctx: &mut InvocationContext,
        source: &SourceImage,
        content: &ContentMetadata,
        plan: &StrategyPlan,
    ) {
        let ran: Vec<StrategyKind> = ctx.runs.iter().map(|r| r.strategy).collect();
        let stage = plan.stages.len();
        for kind in [StrategyKind::PrimitiveDetection, StrategyKind::ClassicalTracing] {
            if ran.contains(&kind) || ctx.hard_expired() {
                continue;
            }
            tracing::info!(strategy = kind.name(), "plan produced nothing; trying fallback");
            let params = [strategy_params(kind, self.config, plan.fast)];
            self.run_stage(ctx, source, content, &params, stage);
            if ctx.produced() > 0 {
                break;
            }
        }
    }

    fn assess(
        &self,
        ctx: &mut InvocationContext,
        source: &SourceImage,
        content: &ContentMetadata,
        elements: &[VectorElement],
    ) -> QualityScore {
        ctx.timed(Component::QualityAssessment, || {
            assess(source, elements, content.background, &self.config.quality)
        })
    }

    /// One refinement pass followed by re-fusion. `None` when nothing
    /// improved or the pass failed.
    fn refine_once(
        &self,
        ctx: &mut InvocationContext,
        source: &SourceImage,
        content: &ContentMetadata,
        elements: &[VectorElement],
    ) -> Option<Vec<VectorElement>> {
        let deadline = ctx.slice(self.config.refiner.time_slice);
        let start = Instant::now();
        let outcome = refine(
            source,
            elements,
            content.background,
            &self.config.refiner,
            deadline,
        );
        let elapsed = start.elapsed();
        let stage = ctx.runs.iter().map(|r| r.stage + 1).max().unwrap_or(0);
        let improved = match &outcome {
            Ok(r) => r.improved.then(|| r.elements.clone()),
            Err(_) => None,
        };
        let run = StrategyRun {
            strategy: StrategyKind::Refinement,
            outcome: outcome.map(|r| StrategyOutput {
                elements: if r.improved { r.elements } else { Vec::new() },
                timed_out: r.timed_out,
            }),
            elapsed,
        };
        ctx.record(vec![run], stage);

        let refined = improved?;
        let fused = ctx.timed(Component::Fusion, || {
            fuse(
                &[StrategyResult {
                    strategy: StrategyKind::Refinement,
                    elements: refined,
                    elapsed,
                    timed_out: false,
                }],
                &self.config.fusion,
            )
        });
        ctx.discarded += fused.discards.len();
        Some(fused.elements)
    }

    /// Hard deadline: skip fusion and quality, emit the first non-empty
    /// result as is.
    fn abort(
        mut ctx: InvocationContext,
        source: &SourceImage,
        content: &ContentMetadata,
        request: &VectorizeRequest,
    ) -> Result<Vectorization, EngineError> {
        ctx.transition(OrchestratorState::Aborted);
        let Some(first) = ctx.results.iter().find(|r| !r.elements.is_empty()) else {
            tracing::warn!("hard deadline expired before any element was produced");
            return Err(EngineError::NoElementsProduced);
        };
        tracing::warn!(
            strategy = first.strategy.name(),
            elements = first.elements.len(),
            "hard deadline expired; emitting first available result"
        );
        let strategy_used = first.strategy;
        let elements = first.elements.clone();
        let document = ctx.timed(Component::DocumentEmission, || {
            emit(&elements, content.dimensions, content.background)
        });
        Ok(Self::finish(
            ctx,
            source,
            content,
            request,
            strategy_used,
            document,
            None,
            0,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        ctx: InvocationContext,
        source: &SourceImage,
        content: &ContentMetadata,
        request: &VectorizeRequest,
        strategy_used: StrategyKind,
        document: VectorDocument,
        quality: Option<QualityScore>,
        refinement_passes: usize,
    ) -> Vectorization {
        let metrics = VectorizeMetrics {
            processing_time: ctx.budget.elapsed(),
            budget: request.budget,
            strategy_used,
            strategy_runs: ctx.runs,
            content_type: content.content_type,
            content_confidence: content.confidence,
            quality,
            element_count: document.len(),
            discarded_count: ctx.discarded,
            refinement_passes,
            final_state: ctx.state,
            fingerprint: source.fingerprint(),
            components: ctx.components,
        };
        tracing::info!(
            elements = metrics.element_count,
            quality = metrics.quality.as_ref().map(|q| q.score),
            state = ?metrics.final_state,
            elapsed_ms = metrics.processing_time.as_secs_f64() * 1000.0,
            "vectorization finished"
        );
        Vectorization {
            document,
            metrics,
            strategy_results: ctx.results,
        }
    }
}

/// Whether a refined set should replace the current one.
fn improves(candidate: &QualityScore, current: &QualityScore) -> bool {
    candidate.score >= current.score
}

/// Strategy that created the most of `elements`; ties go to the one
/// earlier in the plan.
fn dominant_strategy(elements: &[VectorElement], plan: &StrategyPlan) -> Option<StrategyKind> {
    let mut order: Vec<StrategyKind> = plan.kinds().collect();
    for kind in [StrategyKind::PrimitiveDetection, StrategyKind::ClassicalTracing] {
        if !order.contains(&kind) {
            order.push(kind);
        }
    }
    order
        .into_iter()
        .map(|kind| {
            let count = elements
                .iter()
                .filter(|e| e.provenance().strategy == kind)
                .count();
            (kind, count)
        })
        .filter(|&(_, count)| count > 0)
        .fold(None, |best: Option<(StrategyKind, usize)>, (kind, count)| match best {
            Some((_, most)) if most >= count => best,
            _ => Some((kind, count)),
        })
        .map(|(kind, _)| kind)
}

/// Base strategy results in plan order (refinement results excluded).
fn base_results(results: &[StrategyResult]) -> Vec<StrategyResult> {
    results
        .iter()
        .filter(|r| r.strategy != StrategyKind::Refinement)
        .cloned()
        .collect()
}
