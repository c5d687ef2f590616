//! Coordinate transform engine.
//!
//! Three spaces are involved: natural image pixels, the on-screen
//! rendering of that image (object-contain: uniformly scaled to fit the
//! container, centered, padded on one axis), and the `[x, y, w, h]`
//! wire form used for submissions. All functions here are pure.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Primitive types
// ---------------------------------------------------------------------------

/// A point in either image or display space; the caller knows which.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Width and height of an image or a container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A rectangle in image-pixel space stored as two opposite corners.
///
/// Detection results arrive in this form; the corners need not be
/// ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_points(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y)
    }

    pub fn corners(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Top-left + size form used on the wire.
    pub fn to_xywh(&self) -> [f64; 4] {
        corners_to_xywh(self.corners())
    }

    pub fn is_finite(&self) -> bool {
        self.corners().iter().all(|v| v.is_finite())
    }
}

/// Placement of a natural-size image inside its container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
    pub natural_width: f64,
    pub natural_height: f64,
    pub display_width: f64,
    pub display_height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

fn is_positive_finite(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Compute where an image of the given natural size lands inside a
/// container under object-contain scaling.
///
/// Fits by width when the image is relatively wider than the container,
/// by height otherwise; the other axis is centered. Zero, negative, or
/// non-finite inputs produce [`CoreError::Geometry`] so callers can skip
/// rendering instead of dividing by zero.
pub fn compute_display_geometry(
    natural_width: f64,
    natural_height: f64,
    container_width: f64,
    container_height: f64,
) -> Result<DisplayGeometry, CoreError> {
    let dims = [natural_width, natural_height, container_width, container_height];
    if !dims.iter().all(|v| is_positive_finite(*v)) {
        return Err(CoreError::Geometry(format!(
            "degenerate dimensions: natural {natural_width}x{natural_height}, \
             container {container_width}x{container_height}"
        )));
    }

    let natural_ratio = natural_width / natural_height;
    let container_ratio = container_width / container_height;

    let (display_width, display_height) = if natural_ratio > container_ratio {
        (container_width, container_width / natural_ratio)
    } else {
        (container_height * natural_ratio, container_height)
    };

    Ok(DisplayGeometry {
        natural_width,
        natural_height,
        display_width,
        display_height,
        offset_x: ((container_width - display_width) / 2.0).max(0.0),
        offset_y: ((container_height - display_height) / 2.0).max(0.0),
    })
}

/// Map a natural-image point to display space.
pub fn image_to_display(point: Point, geometry: &DisplayGeometry) -> Point {
    Point {
        x: point.x * (geometry.display_width / geometry.natural_width) + geometry.offset_x,
        y: point.y * (geometry.display_height / geometry.natural_height) + geometry.offset_y,
    }
}

/// Map a display point back to natural-image space, clamped into the
/// image bounds. Pointer positions over the letterbox padding land on
/// the nearest image edge.
pub fn display_to_image(point: Point, geometry: &DisplayGeometry) -> Point {
    let x = (point.x - geometry.offset_x) * (geometry.natural_width / geometry.display_width);
    let y = (point.y - geometry.offset_y) * (geometry.natural_height / geometry.display_height);
    Point {
        x: x.clamp(0.0, geometry.natural_width),
        y: y.clamp(0.0, geometry.natural_height),
    }
}

/// Convert `[x1, y1, x2, y2]` corners to `[x, y, w, h]`.
pub fn corners_to_xywh(corners: [f64; 4]) -> [f64; 4] {
    let [x1, y1, x2, y2] = corners;
    [x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs()]
}

/// Project an image-space box into display space for overlay rendering.
pub fn bbox_to_display(bbox: &BoundingBox, geometry: &DisplayGeometry) -> (Point, Point) {
    let [x, y, w, h] = bbox.to_xywh();
    (
        image_to_display(Point::new(x, y), geometry),
        image_to_display(Point::new(x + w, y + h), geometry),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    // -- compute_display_geometry ---------------------------------------------

    #[test]
    fn wide_image_fits_by_width() {
        let g = compute_display_geometry(1920.0, 1080.0, 800.0, 800.0).unwrap();
        assert!(approx(g.display_width, 800.0));
        assert!(approx(g.display_height, 450.0));
        assert!(approx(g.offset_x, 0.0));
        assert!(approx(g.offset_y, 175.0));
    }

    #[test]
    fn tall_image_fits_by_height() {
        let g = compute_display_geometry(600.0, 1200.0, 1000.0, 600.0).unwrap();
        assert!(approx(g.display_width, 300.0));
        assert!(approx(g.display_height, 600.0));
        assert!(approx(g.offset_x, 350.0));
        assert!(approx(g.offset_y, 0.0));
    }

    #[test]
    fn aspect_ratio_preserved_and_one_offset_at_most() {
        let cases = [
            (640.0, 480.0, 1024.0, 768.0),
            (1280.0, 720.0, 300.0, 500.0),
            (333.0, 777.0, 1000.0, 200.0),
            (50.0, 50.0, 120.0, 80.0),
        ];
        for (nw, nh, cw, ch) in cases {
            let g = compute_display_geometry(nw, nh, cw, ch).unwrap();
            let src = nw / nh;
            let dst = g.display_width / g.display_height;
            assert!((src - dst).abs() < 1e-9, "ratio drift for {nw}x{nh} in {cw}x{ch}");
            assert!(g.offset_x >= 0.0 && g.offset_y >= 0.0);
            assert!(g.offset_x < EPS || g.offset_y < EPS);
        }
    }

    #[test]
    fn degenerate_inputs_rejected() {
        assert!(compute_display_geometry(0.0, 100.0, 100.0, 100.0).is_err());
        assert!(compute_display_geometry(100.0, 100.0, 100.0, -5.0).is_err());
        assert!(compute_display_geometry(f64::NAN, 100.0, 100.0, 100.0).is_err());
        assert!(compute_display_geometry(100.0, f64::INFINITY, 100.0, 100.0).is_err());
    }

    // -- image_to_display / display_to_image ----------------------------------

    #[test]
    fn round_trip_inside_bounds() {
        let g = compute_display_geometry(1920.0, 1080.0, 700.0, 900.0).unwrap();
        for &(x, y) in &[(0.5, 0.5), (960.0, 540.0), (1919.5, 1079.5), (12.25, 1000.0)] {
            let p = Point::new(x, y);
            let back = display_to_image(image_to_display(p, &g), &g);
            assert!(approx(back.x, p.x) && approx(back.y, p.y), "{p:?} -> {back:?}");
        }
    }

    #[test]
    fn display_to_image_clamps_letterbox() {
        let g = compute_display_geometry(1920.0, 1080.0, 800.0, 800.0).unwrap();
        // Above the image, inside the top padding band.
        let p = display_to_image(Point::new(-20.0, 10.0), &g);
        assert_eq!(p, Point::new(0.0, 0.0));
        let p = display_to_image(Point::new(900.0, 790.0), &g);
        assert_eq!(p, Point::new(1920.0, 1080.0));
    }

    #[test]
    fn image_to_display_applies_offset() {
        let g = compute_display_geometry(1920.0, 1080.0, 800.0, 800.0).unwrap();
        let p = image_to_display(Point::new(0.0, 0.0), &g);
        assert!(approx(p.x, 0.0) && approx(p.y, 175.0));
    }

    // -- corners_to_xywh ------------------------------------------------------

    #[test]
    fn corners_to_xywh_orders_corners() {
        assert_eq!(corners_to_xywh([10.0, 20.0, 50.0, 80.0]), [10.0, 20.0, 40.0, 60.0]);
        assert_eq!(corners_to_xywh([50.0, 80.0, 10.0, 20.0]), [10.0, 20.0, 40.0, 60.0]);
    }

    #[test]
    fn bbox_to_display_scales() {
        let g = compute_display_geometry(200.0, 100.0, 100.0, 50.0).unwrap();
        let (a, b) = bbox_to_display(&BoundingBox::new(20.0, 10.0, 60.0, 30.0), &g);
        assert_eq!(a, Point::new(10.0, 5.0));
        assert_eq!(b, Point::new(30.0, 15.0));
    }
}
