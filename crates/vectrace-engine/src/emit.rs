//! Document emission.

use serde::{Deserialize, Serialize};

use crate::element::{ElementGeometry, VectorElement};
use crate::types::{Color, Dimensions};

/// Final output: geometry and style only, in paint order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    pub dimensions: Dimensions,
    /// Opaque color painted under every element, if the source had one.
    pub background: Option<Color>,
    pub elements: Vec<ElementGeometry>,
}

impl VectorDocument {
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of primitive elements.
    #[must_use]
    pub fn primitive_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, ElementGeometry::Primitive(_)))
            .count()
    }
}

/// Strip confidence and provenance, keeping element order.
#[must_use]
pub fn emit(
    elements: &[VectorElement],
    dimensions: Dimensions,
    background: Option<Color>,
) -> VectorDocument {
    VectorDocument {
        dimensions,
        background,
        elements: elements.iter().map(|e| e.geometry().clone()).collect(),
    }
}
