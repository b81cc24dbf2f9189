//! Integration tests: end-to-end vectorization of synthetic images.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use image::{Rgba, RgbaImage};
use vectrace_engine::{
    ContentType, ElementGeometry, Engine, EngineConfig, EngineError, OrchestratorState,
    PixelFormat, PrimitiveKind, PrimitiveShape, Provenance, SourceImage, StrategyHint,
    StrategyKind, VectorElement, VectorizeRequest,
};

const GENEROUS: Duration = Duration::from_secs(30);

fn disk(width: u32, height: u32, cx: f64, cy: f64, r: f64, background: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let d = (f64::from(x) + 0.5 - cx).hypot(f64::from(y) + 0.5 - cy);
        if d <= r { Rgba([0, 0, 0, 255]) } else { background }
    })
}

/// Horizontal gray ramp from 100 to 140: no edges, several color buckets.
fn soft_ramp() -> RgbaImage {
    RgbaImage::from_fn(100, 100, |x, _| {
        let v = u8::try_from(100 + x * 40 / 99).unwrap();
        Rgba([v, v, v, 255])
    })
}

/// A red square and a black disk on white.
fn two_shapes() -> RgbaImage {
    RgbaImage::from_fn(160, 120, |x, y| {
        let d = (f64::from(x) + 0.5 - 110.0).hypot(f64::from(y) + 0.5 - 60.0);
        if (20..60).contains(&x) && (20..60).contains(&y) {
            Rgba([200, 30, 30, 255])
        } else if d <= 25.0 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    })
}

fn vectorize(img: RgbaImage, config: EngineConfig, request: &VectorizeRequest) -> vectrace_engine::Vectorization {
    let source = SourceImage::from_rgba(img).unwrap();
    Engine::new(config)
        .unwrap()
        .vectorize(&source, request)
        .expect("vectorization should succeed")
}

#[test]
fn uniform_square_is_one_filling_primitive() {
    let img = RgbaImage::from_pixel(100, 100, Rgba([40, 120, 200, 255]));
    let out = vectorize(img, EngineConfig::default(), &VectorizeRequest::with_budget(GENEROUS));

    assert_eq!(out.document.len(), 1);
    let ElementGeometry::Primitive(p) = &out.document.elements[0] else {
        unreachable!("expected a primitive, got {:?}", out.document.elements[0]);
    };
    assert!(matches!(
        p.shape.kind(),
        PrimitiveKind::Rectangle | PrimitiveKind::Polygon
    ));
    let quality = out.metrics.quality.expect("quality is assessed");
    assert!(quality.score > 0.95, "{quality:?}");
}

#[test]
fn circle_on_transparent_background_is_one_confident_circle() {
    let img = disk(120, 120, 60.0, 60.0, 50.0, Rgba([0, 0, 0, 0]));
    let out = vectorize(img, EngineConfig::default(), &VectorizeRequest::with_budget(GENEROUS));

    let circles: Vec<&ElementGeometry> = out
        .document
        .elements
        .iter()
        .filter(|e| {
            matches!(e, ElementGeometry::Primitive(p) if p.shape.kind() == PrimitiveKind::Circle)
        })
        .collect();
    assert_eq!(circles.len(), 1);
    if let ElementGeometry::Primitive(p) = circles[0]
        && let PrimitiveShape::Circle { radius, .. } = p.shape
    {
        assert!((radius - 50.0).abs() < 2.0, "{radius}");
    }

    let confidence = out
        .strategy_results
        .iter()
        .filter(|r| r.strategy == StrategyKind::PrimitiveDetection)
        .flat_map(|r| &r.elements)
        .filter(|e| e.primitive_kind() == Some(PrimitiveKind::Circle))
        .map(VectorElement::confidence)
        .fold(0.0, f64::max);
    assert!(confidence > 0.9, "{confidence}");
}

#[test]
fn zero_budget_still_returns_elements() {
    let out = vectorize(two_shapes(), EngineConfig::default(), &VectorizeRequest::with_budget(Duration::ZERO));
    assert!(!out.document.is_empty());
    assert!(out.metrics.element_count > 0);
}

#[test]
fn both_strategies_report_results_before_fusion() {
    // Left half is a smooth ramp, right half holds a hard-edged square.
    let img = RgbaImage::from_fn(160, 80, |x, y| {
        if x < 80 {
            let v = u8::try_from(x * 3).unwrap();
            Rgba([v, v, v, 255])
        } else if (100..140).contains(&x) && (20..60).contains(&y) {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    });
    let out = vectorize(img, EngineConfig::default(), &VectorizeRequest::with_budget(GENEROUS));

    assert_eq!(out.metrics.content_type, ContentType::Mixed);
    let strategies: Vec<StrategyKind> = out.strategy_results.iter().map(|r| r.strategy).collect();
    assert!(strategies.contains(&StrategyKind::PrimitiveDetection), "{strategies:?}");
    assert!(strategies.contains(&StrategyKind::ClassicalTracing), "{strategies:?}");
    let stages: Vec<usize> = out
        .metrics
        .strategy_runs
        .iter()
        .filter(|r| r.strategy != StrategyKind::Refinement)
        .map(|r| r.stage)
        .collect();
    assert_eq!(stages, vec![0, 0]);
}

#[test]
fn hybrid_hint_runs_both_in_one_stage() {
    let request = VectorizeRequest {
        budget: GENEROUS,
        strategy_hint: StrategyHint::Hybrid,
        ..VectorizeRequest::default()
    };
    let out = vectorize(two_shapes(), EngineConfig::default(), &request);
    let base: Vec<(StrategyKind, usize)> = out
        .metrics
        .strategy_runs
        .iter()
        .filter(|r| r.strategy != StrategyKind::Refinement)
        .map(|r| (r.strategy, r.stage))
        .collect();
    assert_eq!(
        base,
        vec![
            (StrategyKind::PrimitiveDetection, 0),
            (StrategyKind::ClassicalTracing, 0)
        ]
    );
}

#[test]
fn identical_inputs_give_identical_documents() {
    let mut config = EngineConfig::default();
    config.refiner.enabled = false;
    let request = VectorizeRequest::with_budget(GENEROUS);

    let first = vectorize(two_shapes(), config.clone(), &request);
    let second = vectorize(two_shapes(), config.clone(), &request);
    assert_eq!(first.document, second.document);

    config.orchestrator.parallel = true;
    let parallel = vectorize(two_shapes(), config, &request);
    assert_eq!(first.document, parallel.document);
    assert_eq!(first.metrics.fingerprint, parallel.metrics.fingerprint);
}

#[test]
fn document_respects_overlap_threshold() {
    let config = EngineConfig::default();
    let threshold = config.fusion.overlap_threshold;
    let out = vectorize(two_shapes(), config, &VectorizeRequest::with_budget(GENEROUS));

    let dims = out.document.dimensions;
    let boxes: Vec<_> = out
        .document
        .elements
        .iter()
        .map(|g| {
            *VectorElement::new(
                g.clone(),
                0.5,
                Provenance::new(StrategyKind::ClassicalTracing, 0),
                dims,
            )
            .unwrap()
            .bounds()
        })
        .collect();
    for (i, a) in boxes.iter().enumerate() {
        assert!(a.is_within(dims));
        for b in &boxes[i + 1..] {
            assert!(a.overlap_fraction(b) <= threshold, "{a:?} vs {b:?}");
        }
    }
}

#[test]
fn primitives_precede_paths() {
    let out = vectorize(two_shapes(), EngineConfig::default(), &VectorizeRequest::with_budget(GENEROUS));
    let first_path = out
        .document
        .elements
        .iter()
        .position(|e| matches!(e, ElementGeometry::Path(_)))
        .unwrap_or(out.document.len());
    assert_eq!(out.document.primitive_count(), first_path);
}

#[test]
fn raising_confidence_threshold_never_adds_primitives() {
    let mut previous = usize::MAX;
    for threshold in [0.0, 0.3, 0.6, 0.9, 1.0] {
        let mut config = EngineConfig::default();
        config.detector.confidence_threshold = threshold;
        config.refiner.enabled = false;
        let request = VectorizeRequest {
            budget: GENEROUS,
            strategy_hint: StrategyHint::Primitives,
            ..VectorizeRequest::default()
        };
        let source = SourceImage::from_rgba(two_shapes()).unwrap();
        let count = match Engine::new(config).unwrap().vectorize(&source, &request) {
            Ok(out) => out
                .strategy_results
                .iter()
                .filter(|r| r.strategy == StrategyKind::PrimitiveDetection)
                .map(|r| r.elements.len())
                .sum(),
            Err(EngineError::NoElementsProduced) => 0,
            Err(other) => unreachable!("unexpected error {other}"),
        };
        assert!(count <= previous, "threshold {threshold}: {count} > {previous}");
        previous = count;
    }
}

#[test]
fn overrun_is_bounded_by_one_slice() {
    let config = EngineConfig::default();
    let slice = config.orchestrator.strategy_slice;
    let budget = Duration::from_millis(20);
    let out = vectorize(two_shapes(), config, &VectorizeRequest::with_budget(budget));
    assert!(
        out.metrics.processing_time <= budget + slice,
        "{:?}",
        out.metrics.processing_time
    );
    assert_eq!(out.metrics.budget, budget);
}

#[test]
fn quality_score_is_a_fraction() {
    let out = vectorize(two_shapes(), EngineConfig::default(), &VectorizeRequest::with_budget(GENEROUS));
    let quality = out.metrics.quality.as_ref().unwrap();
    assert!((0.0..=1.0).contains(&quality.score));
    assert!(out.metrics.report().contains("Quality:"));
}

#[test]
fn empty_buffer_is_invalid_image() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let err = engine
        .vectorize_raw(10, 10, PixelFormat::Rgba8, &[], &VectorizeRequest::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidImage(_)));

    let err = engine
        .vectorize_raw(0, 10, PixelFormat::Gray8, &[0; 10], &VectorizeRequest::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidImage(_)));
}

#[test]
fn metrics_serialize_to_json() {
    let out = vectorize(
        disk(64, 64, 32.0, 32.0, 20.0, Rgba([255, 255, 255, 255])),
        EngineConfig::default(),
        &VectorizeRequest::with_budget(GENEROUS),
    );
    let json = serde_json::to_value(&out.metrics).unwrap();
    assert!(json.get("processing_time").is_some());
    assert!(json.get("strategy_used").is_some());
    let doc = serde_json::to_string(&out.document).unwrap();
    assert!(!doc.contains("confidence"));
}

#[test]
fn edgeless_images_still_produce_elements() {
    let two_tone = RgbaImage::from_fn(100, 100, |x, _| {
        if x < 50 {
            Rgba([127, 127, 127, 255])
        } else {
            Rgba([128, 128, 128, 255])
        }
    });
    for img in [soft_ramp(), two_tone] {
        let out = vectorize(img, EngineConfig::default(), &VectorizeRequest::with_budget(GENEROUS));
        assert!(!out.document.is_empty());
        assert_eq!(out.metrics.final_state, OrchestratorState::Converged);
        assert!(out.metrics.quality.is_some());
    }
}

#[test]
fn hard_deadline_aborts_with_first_result() {
    let request = VectorizeRequest {
        budget: GENEROUS,
        hard_deadline: Some(Duration::ZERO),
        ..VectorizeRequest::default()
    };
    let out = vectorize(two_shapes(), EngineConfig::default(), &request);

    assert_eq!(out.metrics.final_state, OrchestratorState::Aborted);
    assert!(out.metrics.quality.is_none());
    assert_eq!(out.metrics.refinement_passes, 0);
    assert!(!out.document.is_empty());
    assert!(out.metrics.component_time(vectrace_engine::Component::Fusion).is_zero());

    // The document is the first non-empty result, unfused.
    let first = out
        .strategy_results
        .iter()
        .find(|r| !r.elements.is_empty())
        .unwrap();
    assert_eq!(out.document.len(), first.elements.len());
    assert_eq!(out.metrics.strategy_used, first.strategy);
}

#[test]
fn empty_primary_falls_back_to_other_strategy() {
    // Zero budget takes the fast path, which keeps only the tracing
    // stage. Tracing finds no contours on an edgeless ramp.
    let request = VectorizeRequest {
        budget: Duration::ZERO,
        strategy_hint: StrategyHint::Tracing,
        ..VectorizeRequest::default()
    };
    let out = vectorize(soft_ramp(), EngineConfig::default(), &request);

    let runs: Vec<(StrategyKind, usize, usize)> = out
        .metrics
        .strategy_runs
        .iter()
        .map(|r| (r.strategy, r.stage, r.element_count))
        .collect();
    assert_eq!(
        runs,
        vec![
            (StrategyKind::ClassicalTracing, 0, 0),
            (StrategyKind::PrimitiveDetection, 1, 1)
        ]
    );
    assert_eq!(out.metrics.strategy_used, StrategyKind::PrimitiveDetection);
    assert_eq!(out.document.primitive_count(), 1);
}

#[test]
fn refinement_never_lowers_quality() {
    let img = RgbaImage::from_fn(120, 90, |x, y| {
        let d = (f64::from(x) + 0.5 - 80.0).hypot(f64::from(y) + 0.5 - 45.0);
        if d <= 20.0 {
            Rgba([30, 30, 160, 255])
        } else if (10..40).contains(&x) && (60..80).contains(&y) {
            Rgba([220, 200, 20, 255])
        } else {
            Rgba([240, 240, 240, 255])
        }
    });
    let request = VectorizeRequest {
        budget: GENEROUS,
        quality_target: Some(1.0),
        ..VectorizeRequest::default()
    };

    let mut unrefined = EngineConfig::default();
    unrefined.refiner.enabled = false;
    let baseline = vectorize(img.clone(), unrefined, &request);
    let refined = vectorize(img, EngineConfig::default(), &request);

    let before = baseline.metrics.quality.as_ref().unwrap().score;
    let after = refined.metrics.quality.as_ref().unwrap().score;
    assert!(after >= before - 1e-12, "{after} < {before}");
}
