//! Fusion: merge strategy results into one deduplicated element list.
//!
//! Elements are visited in priority order (confidence, then primitives
//! before paths, then result order). An element is kept unless its box
//! overlaps an already kept box by more than the threshold, measured as
//! a fraction of the smaller box. Every discard names the element that
//! superseded it.

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::element::{Provenance, StrategyKind, VectorElement};
use crate::spatial::BoxIndex;

/// Elements produced by one strategy run, in the order they were
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyResult {
    pub strategy: StrategyKind,
    pub elements: Vec<VectorElement>,
    pub elapsed: std::time::Duration,
    /// The run hit its slice and the elements are partial.
    pub timed_out: bool,
}

/// Why an element was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discard {
    pub discarded: Provenance,
    pub superseded_by: Provenance,
    /// Overlap as a fraction of the smaller box.
    pub overlap: f64,
}

/// Output of one fusion pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    /// Primitives first, then descending confidence.
    pub elements: Vec<VectorElement>,
    pub discards: Vec<Discard>,
}

/// Fuse `results`, which must be in plan order (primary strategy
/// first).
#[must_use]
pub fn fuse(results: &[StrategyResult], config: &FusionConfig) -> Fused {
    let candidates: Vec<&VectorElement> = results.iter().flat_map(|r| &r.elements).collect();

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (candidates[a], candidates[b]);
        eb.confidence()
            .total_cmp(&ea.confidence())
            .then(eb.is_primitive().cmp(&ea.is_primitive()))
            .then(a.cmp(&b))
    });

    let mut index = BoxIndex::new();
    let mut kept: Vec<&VectorElement> = Vec::new();
    let mut discards = Vec::new();
    for i in order {
        let element = candidates[i];
        let superseding = index
            .candidates(element.bounds())
            .into_iter()
            .map(|k| (k, kept[k].bounds().overlap_fraction(element.bounds())))
            .find(|&(_, overlap)| overlap > config.overlap_threshold);
        if let Some((k, overlap)) = superseding {
            let discard = Discard {
                discarded: element.provenance(),
                superseded_by: kept[k].provenance(),
                overlap,
            };
            tracing::debug!(
                discarded = %discard.discarded,
                superseded_by = %discard.superseded_by,
                overlap,
                "fusion discarded element"
            );
            discards.push(discard);
            continue;
        }
        index.insert(kept.len(), element.bounds());
        kept.push(element);
    }

    // `kept` is in priority order; a stable sort lifts primitives ahead
    // of paths without disturbing confidence order within each.
    let mut elements: Vec<VectorElement> = kept.into_iter().cloned().collect();
    elements.sort_by_key(|e| !e.is_primitive());

    tracing::debug!(
        inputs = candidates.len(),
        kept = elements.len(),
        discarded = discards.len(),
        "fusion finished"
    );
    Fused { elements, discards }
}
