//! SVG export serializer.
//!
//! Converts a [`VectorDocument`] into an SVG string using the [`svg`]
//! crate for document construction, XML escaping, and path data
//! formatting. The `viewBox` is the source canvas in pixels, so
//! element coordinates are written unchanged.
//!
//! | Element              | SVG                                          |
//! |----------------------|----------------------------------------------|
//! | background           | `<rect>` covering the canvas                 |
//! | circle primitive     | `<circle>`                                   |
//! | rectangle primitive  | `<rect>`, rotated with `transform` if needed |
//! | polygon primitive    | `<polygon>`                                  |
//! | path                 | `<path>` with `M`/`L`/`C`/`z` data           |
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Description, Element, Path, Polygon, Rectangle, Title};
use svg::node::{Node, Text, Value};

use vectrace_engine::{
    Color, ElementGeometry, FillRule, PathElement, Primitive, PrimitiveShape, Segment,
    VectorDocument,
};

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped by the `svg`
/// crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Emitted as `<title>`, typically the source file stem.
    pub title: Option<&'a str>,

    /// Emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized engine configuration, embedded in a namespaced
    /// `<metadata>` element so exported files carry their settings.
    pub config_json: Option<&'a str>,
}

/// Build an SVG path `d` attribute from every subpath of `path`.
///
/// Returns an empty string for a path without subpaths. Coordinates are
/// formatted by the [`svg`] crate with `f32` precision.
///
/// # Examples
///
/// ```
/// use vectrace_engine::{Color, PathElement, PathStyle, Point, Subpath};
/// use vectrace_export::build_path_data;
///
/// let sub = Subpath::from_points(&[Point::new(10.0, 20.0), Point::new(30.0, 40.0)], false)
///     .unwrap();
/// let path = PathElement {
///     subpaths: vec![sub],
///     style: PathStyle::stroked(Color::BLACK, 1.0),
/// };
/// assert_eq!(build_path_data(&path), "M10,20 L30,40");
/// ```
#[must_use]
pub fn build_path_data(path: &PathElement) -> String {
    if path.subpaths.is_empty() {
        return String::new();
    }
    let mut data = Data::new();
    for sub in &path.subpaths {
        data = data.move_to((sub.start.x, sub.start.y));
        for segment in &sub.segments {
            data = match *segment {
                Segment::Line(p) => data.line_to((p.x, p.y)),
                Segment::Cubic { ctrl1, ctrl2, to } => {
                    data.cubic_curve_to((ctrl1.x, ctrl1.y, ctrl2.x, ctrl2.y, to.x, to.y))
                }
            };
        }
        if sub.closed {
            data = data.close();
        }
    }
    String::from(Value::from(data))
}

/// `#rrggbb` for a color; alpha is written separately as an opacity.
#[must_use]
pub fn color_attribute(color: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
}

fn opacity(color: Color) -> Option<f64> {
    (color.a < 255).then(|| (f64::from(color.a) / 255.0 * 1000.0).round() / 1000.0)
}

/// Set `fill` (and `fill-opacity` for translucent colors) on a node.
fn set_fill<N: Node>(node: &mut N, color: Color) {
    node.assign("fill", color_attribute(color));
    if let Some(alpha) = opacity(color) {
        node.assign("fill-opacity", alpha);
    }
}

/// Append a primitive as its native SVG shape.
fn add_primitive(doc: Document, primitive: &Primitive) -> Document {
    match &primitive.shape {
        PrimitiveShape::Circle { center, radius } => {
            let mut circle = Circle::new()
                .set("cx", center.x)
                .set("cy", center.y)
                .set("r", *radius);
            set_fill(&mut circle, primitive.fill);
            doc.add(circle)
        }
        PrimitiveShape::Rectangle {
            center,
            width,
            height,
            angle,
        } => {
            let mut rect = Rectangle::new()
                .set("x", center.x - width / 2.0)
                .set("y", center.y - height / 2.0)
                .set("width", *width)
                .set("height", *height);
            if angle.abs() > f64::EPSILON {
                let degrees = (angle.to_degrees() * 1000.0).round() / 1000.0;
                rect = rect.set(
                    "transform",
                    format!("rotate({degrees} {} {})", center.x, center.y),
                );
            }
            set_fill(&mut rect, primitive.fill);
            doc.add(rect)
        }
        PrimitiveShape::Polygon { vertices } => {
            let points = vertices
                .iter()
                .map(|p| format!("{},{}", p.x, p.y))
                .collect::<Vec<_>>()
                .join(" ");
            let mut polygon = Polygon::new().set("points", points);
            set_fill(&mut polygon, primitive.fill);
            doc.add(polygon)
        }
    }
}

fn path_node(path: &PathElement) -> Option<Path> {
    let d = build_path_data(path);
    if d.is_empty() {
        return None;
    }
    let mut node = Path::new().set("d", d);
    match path.style.fill {
        Some(fill) => {
            set_fill(&mut node, fill);
            let rule = match path.style.fill_rule {
                FillRule::EvenOdd => "evenodd",
                FillRule::NonZero => "nonzero",
            };
            node.assign("fill-rule", rule);
        }
        None => node.assign("fill", "none"),
    }
    if let Some(stroke) = path.style.stroke {
        node.assign("stroke", color_attribute(stroke.color));
        node.assign("stroke-width", stroke.width);
        if let Some(alpha) = opacity(stroke.color) {
            node.assign("stroke-opacity", alpha);
        }
        node.assign("stroke-linejoin", "round");
        node.assign("stroke-linecap", "round");
    }
    Some(node)
}

/// Serialize a vector document as an SVG string.
///
/// Elements are written in document order, which is paint order.
#[must_use]
pub fn to_svg(document: &VectorDocument, metadata: &SvgMetadata<'_>) -> String {
    let w = document.dimensions.width;
    let h = document.dimensions.height;
    let mut doc = Document::new()
        .set("width", w)
        .set("height", h)
        .set("viewBox", (0, 0, w, h));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(config_json) = metadata.config_json {
        let mut engine_el = Element::new("vectrace:config");
        engine_el.assign("xmlns:vectrace", "https://github.com/vectrace/vectrace/ns/1");
        engine_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(engine_el);
        doc = doc.add(metadata_el);
    }

    if let Some(background) = document.background {
        let mut rect = Rectangle::new()
            .set("x", 0)
            .set("y", 0)
            .set("width", w)
            .set("height", h);
        set_fill(&mut rect, background);
        doc = doc.add(rect);
    }

    for element in &document.elements {
        match element {
            ElementGeometry::Primitive(p) => doc = add_primitive(doc, p),
            ElementGeometry::Path(p) => {
                if let Some(node) = path_node(p) {
                    doc = doc.add(node);
                }
            }
        }
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vectrace_engine::{Dimensions, PathStyle, Point, Subpath};

    use super::*;

    fn doc(elements: Vec<ElementGeometry>, background: Option<Color>) -> VectorDocument {
        VectorDocument {
            dimensions: Dimensions {
                width: 100,
                height: 80,
            },
            background,
            elements,
        }
    }

    fn no_meta() -> SvgMetadata<'static> {
        SvgMetadata::default()
    }

    fn square(closed: bool) -> Subpath {
        Subpath::from_points(
            &[
                Point::new(10.0, 10.0),
                Point::new(50.0, 10.0),
                Point::new(50.0, 50.0),
                Point::new(10.0, 50.0),
            ],
            closed,
        )
        .unwrap()
    }

    // --- build_path_data ---

    #[test]
    fn build_path_data_empty() {
        let path = PathElement {
            subpaths: Vec::new(),
            style: PathStyle::filled(Color::BLACK),
        };
        assert_eq!(build_path_data(&path), "");
    }

    #[test]
    fn build_path_data_open_lines() {
        let path = PathElement {
            subpaths: vec![square(false)],
            style: PathStyle::stroked(Color::BLACK, 1.0),
        };
        assert_eq!(build_path_data(&path), "M10,10 L50,10 L50,50 L10,50");
    }

    #[test]
    fn build_path_data_compound_closes_each_subpath() {
        let inner = Subpath::from_points(
            &[
                Point::new(20.0, 20.0),
                Point::new(40.0, 20.0),
                Point::new(40.0, 40.0),
            ],
            true,
        )
        .unwrap();
        let path = PathElement {
            subpaths: vec![square(true), inner],
            style: PathStyle::filled(Color::BLACK),
        };
        let d = build_path_data(&path);
        assert_eq!(d.matches('M').count(), 2);
        assert_eq!(d.to_ascii_lowercase().matches('z').count(), 2);
    }

    #[test]
    fn build_path_data_cubic() {
        let path = PathElement {
            subpaths: vec![Subpath {
                start: Point::new(0.0, 0.0),
                segments: vec![Segment::Cubic {
                    ctrl1: Point::new(1.0, 2.0),
                    ctrl2: Point::new(3.0, 4.0),
                    to: Point::new(5.0, 6.0),
                }],
                closed: false,
            }],
            style: PathStyle::stroked(Color::BLACK, 1.0),
        };
        assert_eq!(build_path_data(&path), "M0,0 C1,2,3,4,5,6");
    }

    // --- color ---

    #[test]
    fn color_attribute_is_lowercase_hex() {
        assert_eq!(color_attribute(Color::rgba(200, 30, 255, 255)), "#c81eff");
        assert_eq!(opacity(Color::BLACK), None);
        assert_eq!(opacity(Color::rgba(0, 0, 0, 0)), Some(0.0));
    }

    // --- to_svg ---

    #[test]
    fn empty_document_has_viewbox() {
        let svg = to_svg(&doc(Vec::new(), None), &no_meta());
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
        assert!(svg.contains("viewBox=\"0 0 100 80\""));
        assert!(!svg.contains("<rect"));
    }

    #[test]
    fn background_becomes_rect() {
        let svg = to_svg(&doc(Vec::new(), Some(Color::WHITE)), &no_meta());
        assert!(svg.contains("<rect"));
        assert!(svg.contains("fill=\"#ffffff\""));
    }

    #[test]
    fn primitives_map_to_svg_shapes() {
        let elements = vec![
            ElementGeometry::Primitive(Primitive {
                shape: PrimitiveShape::Circle {
                    center: Point::new(30.0, 30.0),
                    radius: 12.5,
                },
                fill: Color::BLACK,
            }),
            ElementGeometry::Primitive(Primitive {
                shape: PrimitiveShape::Rectangle {
                    center: Point::new(60.0, 40.0),
                    width: 20.0,
                    height: 10.0,
                    angle: std::f64::consts::FRAC_PI_2,
                },
                fill: Color::rgba(200, 30, 30, 128),
            }),
            ElementGeometry::Primitive(Primitive {
                shape: PrimitiveShape::Polygon {
                    vertices: vec![
                        Point::new(0.0, 0.0),
                        Point::new(10.0, 0.0),
                        Point::new(5.0, 8.0),
                    ],
                },
                fill: Color::BLACK,
            }),
        ];
        let svg = to_svg(&doc(elements, None), &no_meta());
        assert!(svg.contains("<circle"));
        assert!(svg.contains("r=\"12.5\""));
        assert!(svg.contains("rotate(90 60 40)"));
        assert!(svg.contains("fill-opacity=\"0.502\""));
        assert!(svg.contains("points=\"0,0 10,0 5,8\""));

        // Paint order follows the document.
        let circle = svg.find("<circle").unwrap();
        let rect = svg.find("<rect").unwrap();
        let polygon = svg.find("<polygon").unwrap();
        assert!(circle < rect && rect < polygon);
    }

    #[test]
    fn axis_aligned_rectangle_has_no_transform() {
        let elements = vec![ElementGeometry::Primitive(Primitive {
            shape: PrimitiveShape::Rectangle {
                center: Point::new(50.0, 40.0),
                width: 100.0,
                height: 80.0,
                angle: 0.0,
            },
            fill: Color::BLACK,
        })];
        let svg = to_svg(&doc(elements, None), &no_meta());
        assert!(!svg.contains("transform"));
        assert!(svg.contains("width=\"100\""));
    }

    #[test]
    fn filled_path_uses_evenodd() {
        let elements = vec![ElementGeometry::Path(PathElement {
            subpaths: vec![square(true)],
            style: PathStyle::filled(Color::BLACK),
        })];
        let svg = to_svg(&doc(elements, None), &no_meta());
        assert!(svg.contains("fill-rule=\"evenodd\""));
        assert!(!svg.contains("stroke="));
    }

    #[test]
    fn stroked_path_has_no_fill() {
        let elements = vec![ElementGeometry::Path(PathElement {
            subpaths: vec![square(false)],
            style: PathStyle::stroked(Color::BLACK, 1.5),
        })];
        let svg = to_svg(&doc(elements, None), &no_meta());
        assert!(svg.contains("fill=\"none\""));
        assert!(svg.contains("stroke-width=\"1.5\""));
    }

    #[test]
    fn metadata_is_escaped() {
        let meta = SvgMetadata {
            title: Some("logo <draft>"),
            description: Some("budget=500ms & hybrid"),
            config_json: Some("{\"fusion\":{}}"),
        };
        let svg = to_svg(&doc(Vec::new(), None), &meta);
        assert!(svg.contains("<title>logo &lt;draft&gt;</title>"));
        assert!(svg.contains("&amp; hybrid"));
        assert!(svg.contains("<metadata>"));
        assert!(svg.contains("vectrace:config"));
    }
}
