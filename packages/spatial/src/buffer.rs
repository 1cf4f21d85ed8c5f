//! Circular buffers in projected meters.
//!
//! A buffer is a regular polygon whose circumradius is inflated so that its
//! area equals the area of the true circle. Inscribed polygons would
//! otherwise undercount population at every radius by the same small
//! factor.

use std::f64::consts::TAU;

use geo::{Coord, LineString, Polygon, Rect};

/// Default number of vertices per buffer.
pub const DEFAULT_SEGMENTS: usize = 128;

/// A circular region around a projected center point.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    /// Projected center.
    pub center: Coord<f64>,
    /// Radius in meters.
    pub radius_m: f64,
    /// Polygonal approximation with the circle's area.
    pub polygon: Polygon<f64>,
    circumradius: f64,
    inradius: f64,
}

impl Buffer {
    /// Builds a buffer of `radius_m` meters with `segments` vertices
    /// (minimum 8).
    #[must_use]
    pub fn new(center: Coord<f64>, radius_m: f64, segments: usize) -> Self {
        let segments = segments.max(8);
        #[allow(clippy::cast_precision_loss)]
        let n = segments as f64;
        let step = TAU / n;
        let circumradius = radius_m * (TAU / (n * step.sin())).sqrt();

        let ring: Vec<Coord<f64>> = (0..=segments)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let angle = step * (i % segments) as f64;
                Coord {
                    x: circumradius.mul_add(angle.cos(), center.x),
                    y: circumradius.mul_add(angle.sin(), center.y),
                }
            })
            .collect();

        Self {
            center,
            radius_m,
            polygon: Polygon::new(LineString::from(ring), vec![]),
            circumradius,
            inradius: circumradius * (step / 2.0).cos(),
        }
    }

    /// Area of the true circle in square meters.
    #[must_use]
    pub fn circle_area(&self) -> f64 {
        std::f64::consts::PI * self.radius_m * self.radius_m
    }

    /// Bounding box of the polygon.
    #[must_use]
    pub fn bounds(&self) -> Rect<f64> {
        let r = self.circumradius;
        Rect::new(
            Coord {
                x: self.center.x - r,
                y: self.center.y - r,
            },
            Coord {
                x: self.center.x + r,
                y: self.center.y + r,
            },
        )
    }

    /// Whether every corner of `rect` lies within the polygon's inscribed
    /// circle, which (the disc being convex) puts the whole rectangle
    /// inside the polygon.
    #[must_use]
    pub fn contains_rect(&self, rect: &Rect<f64>) -> bool {
        let r2 = self.inradius * self.inradius;
        let (min, max) = (rect.min(), rect.max());
        [
            (min.x, min.y),
            (min.x, max.y),
            (max.x, min.y),
            (max.x, max.y),
        ]
        .iter()
        .all(|&(x, y)| {
            let (dx, dy) = (x - self.center.x, y - self.center.y);
            dx.mul_add(dx, dy * dy) <= r2
        })
    }
}

/// A disc of the given area around a center, used for tracts with no
/// boundary polygon.
#[must_use]
pub fn equal_area_disc(center: Coord<f64>, area_sqm: f64, segments: usize) -> Polygon<f64> {
    let radius = (area_sqm.max(0.0) / std::f64::consts::PI).sqrt();
    Buffer::new(center, radius, segments).polygon
}
