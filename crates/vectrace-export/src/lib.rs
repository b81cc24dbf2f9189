//! vectrace-export: Pure format serializers (sans-IO)
//!
//! Converts a [`VectorDocument`](vectrace_engine::VectorDocument) into an
//! output format. Currently supports SVG.

pub mod svg;

pub use svg::{SvgMetadata, build_path_data, color_attribute, to_svg};
