//! Rasterization of vector elements via `tiny-skia`.
//!
//! The refiner and the quality assessor both compare a rendering of the
//! current elements against the source. Everything is drawn over opaque
//! white so transparent source pixels (also composited over white)
//! compare equal to empty canvas.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tiny_skia::{FillRule, LineCap, LineJoin, Paint, Path, PathBuilder, Pixmap, Rect, Stroke, Transform};

use crate::element::{ElementGeometry, PathElement, PrimitiveShape, Segment};
use crate::source::SourceImage;
use crate::types::{Color, Dimensions, Point};

/// Scale that brings the longest canvas side down to `resolution`.
/// Never upsamples.
#[must_use]
pub fn working_scale(canvas: Dimensions, resolution: u32) -> f64 {
    let longest = f64::from(canvas.longest_side().max(1));
    (f64::from(resolution) / longest).min(1.0)
}

/// Output raster size for a canvas drawn at `scale` (at least 1x1).
#[must_use]
pub fn scaled_dimensions(canvas: Dimensions, scale: f64) -> Dimensions {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let axis = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
    Dimensions {
        width: axis(canvas.width),
        height: axis(canvas.height),
    }
}

/// Source composited over white and resampled to `size`.
#[must_use]
pub fn resample_source(source: &SourceImage, size: Dimensions) -> RgbImage {
    let flat = RgbImage::from_fn(source.width(), source.height(), |x, y| {
        Rgb(source.color_at(x, y).over_white())
    });
    if flat.dimensions() == (size.width, size.height) {
        return flat;
    }
    imageops::resize(&flat, size.width, size.height, FilterType::Triangle)
}

/// Render elements in order over an optional background.
///
/// `canvas` is the element coordinate space; the output is
/// `scaled_dimensions(canvas, scale)` pixels.
#[must_use]
pub fn render<'a>(
    elements: impl IntoIterator<Item = &'a ElementGeometry>,
    background: Option<Color>,
    canvas: Dimensions,
    scale: f64,
) -> RgbImage {
    let size = scaled_dimensions(canvas, scale);
    let Some(mut pixmap) = Pixmap::new(size.width, size.height) else {
        return RgbImage::from_pixel(size.width, size.height, Rgb([255, 255, 255]));
    };
    pixmap.fill(tiny_skia::Color::WHITE);
    if let Some(bg) = background {
        #[allow(clippy::cast_precision_loss)]
        let full = Rect::from_xywh(0.0, 0.0, size.width as f32, size.height as f32);
        if let Some(full) = full {
            pixmap.fill_rect(full, &paint(bg), Transform::identity(), None);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let transform = Transform::from_scale(
        (f64::from(size.width) / f64::from(canvas.width)) as f32,
        (f64::from(size.height) / f64::from(canvas.height)) as f32,
    );
    for element in elements {
        draw(&mut pixmap, element, transform);
    }

    let data = pixmap.data();
    RgbImage::from_fn(size.width, size.height, |x, y| {
        let off = (y as usize * size.width as usize + x as usize) * 4;
        Rgb([data[off], data[off + 1], data[off + 2]])
    })
}

fn draw(pixmap: &mut Pixmap, element: &ElementGeometry, transform: Transform) {
    match element {
        ElementGeometry::Primitive(primitive) => {
            let path = match &primitive.shape {
                #[allow(clippy::cast_possible_truncation)]
                PrimitiveShape::Circle { center, radius } => {
                    PathBuilder::from_circle(center.x as f32, center.y as f32, *radius as f32)
                }
                shape => polygon_path(&shape.outline()),
            };
            if let Some(path) = path {
                pixmap.fill_path(
                    &path,
                    &paint(primitive.fill),
                    FillRule::Winding,
                    transform,
                    None,
                );
            }
        }
        ElementGeometry::Path(path) => draw_path(pixmap, path, transform),
    }
}

fn draw_path(pixmap: &mut Pixmap, element: &PathElement, transform: Transform) {
    let Some(path) = build_path(element) else {
        return;
    };
    if let Some(fill) = element.style.fill {
        let rule = match element.style.fill_rule {
            crate::element::FillRule::NonZero => FillRule::Winding,
            crate::element::FillRule::EvenOdd => FillRule::EvenOdd,
        };
        pixmap.fill_path(&path, &paint(fill), rule, transform, None);
    }
    if let Some(stroke) = element.style.stroke {
        #[allow(clippy::cast_possible_truncation)]
        let style = Stroke {
            width: stroke.width as f32,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &paint(stroke.color), &style, transform, None);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn polygon_path(points: &[Point]) -> Option<Path> {
    let (first, rest) = points.split_first()?;
    let mut pb = PathBuilder::new();
    pb.move_to(first.x as f32, first.y as f32);
    for p in rest {
        pb.line_to(p.x as f32, p.y as f32);
    }
    pb.close();
    pb.finish()
}

#[allow(clippy::cast_possible_truncation)]
fn build_path(element: &PathElement) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for sub in &element.subpaths {
        pb.move_to(sub.start.x as f32, sub.start.y as f32);
        for segment in &sub.segments {
            match *segment {
                Segment::Line(p) => pb.line_to(p.x as f32, p.y as f32),
                Segment::Cubic { ctrl1, ctrl2, to } => pb.cubic_to(
                    ctrl1.x as f32,
                    ctrl1.y as f32,
                    ctrl2.x as f32,
                    ctrl2.y as f32,
                    to.x as f32,
                    to.y as f32,
                ),
            }
        }
        if sub.closed {
            pb.close();
        }
    }
    pb.finish()
}

fn paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PathStyle, Primitive, Subpath};

    const CANVAS: Dimensions = Dimensions {
        width: 40,
        height: 20,
    };

    #[test]
    fn empty_render_is_white() {
        let img = render(&[], None, CANVAS, 1.0);
        assert_eq!(img.dimensions(), (40, 20));
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn background_fills_canvas() {
        let img = render(&[], Some(Color::rgba(10, 20, 30, 255)), CANVAS, 1.0);
        assert_eq!(img.get_pixel(5, 5).0, [10, 20, 30]);
    }

    #[test]
    fn circle_covers_its_center_only() {
        let circle = ElementGeometry::Primitive(Primitive {
            shape: PrimitiveShape::Circle {
                center: Point::new(10.0, 10.0),
                radius: 5.0,
            },
            fill: Color::BLACK,
        });
        let img = render([&circle], None, CANVAS, 1.0);
        assert_eq!(img.get_pixel(10, 10).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(30, 10).0, [255, 255, 255]);
    }

    #[test]
    fn scale_shrinks_output() {
        let rect = ElementGeometry::Primitive(Primitive {
            shape: PrimitiveShape::Rectangle {
                center: Point::new(20.0, 10.0),
                width: 40.0,
                height: 20.0,
                angle: 0.0,
            },
            fill: Color::rgba(255, 0, 0, 255),
        });
        let img = render([&rect], None, CANVAS, 0.5);
        assert_eq!(img.dimensions(), (20, 10));
        assert!(img.pixels().all(|p| p.0 == [255, 0, 0]));
    }

    #[test]
    fn even_odd_leaves_hole() {
        let outer = Subpath::from_points(
            &[
                Point::new(2.0, 2.0),
                Point::new(18.0, 2.0),
                Point::new(18.0, 18.0),
                Point::new(2.0, 18.0),
            ],
            true,
        );
        let inner = Subpath::from_points(
            &[
                Point::new(6.0, 6.0),
                Point::new(14.0, 6.0),
                Point::new(14.0, 14.0),
                Point::new(6.0, 14.0),
            ],
            true,
        );
        let ring = ElementGeometry::Path(PathElement {
            subpaths: [outer, inner].into_iter().flatten().collect(),
            style: PathStyle::filled(Color::BLACK),
        });
        let img = render([&ring], None, CANVAS, 1.0);
        assert_eq!(img.get_pixel(3, 10).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(10, 10).0, [255, 255, 255]);
    }

    #[test]
    fn working_scale_never_upsamples() {
        assert!((working_scale(CANVAS, 128) - 1.0).abs() < f64::EPSILON);
        assert!((working_scale(CANVAS, 10) - 0.25).abs() < f64::EPSILON);
    }
}
