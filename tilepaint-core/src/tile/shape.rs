//! Geometry shared by shape draw operations, vector layers, and flood fill clipping.

use crate::util::{FiniteF32, RectI};

/// A closed, filled shape in document pixel space.
#[derive(Clone, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Rectangle {
        min: [FiniteF32; 2],
        max: [FiniteF32; 2],
    },
    /// Ellipse inscribed in the given box.
    Ellipse {
        min: [FiniteF32; 2],
        max: [FiniteF32; 2],
    },
    /// Even-odd filled polygon. Implicitly closed.
    Polygon { points: Vec<[FiniteF32; 2]> },
}

fn point(x: f32, y: f32) -> [FiniteF32; 2] {
    // Documents are nowhere near this large, keeps the math far from overflow.
    const LIMIT: f32 = 1.0e7;
    [
        FiniteF32::clamped(x, -LIMIT, LIMIT),
        FiniteF32::clamped(y, -LIMIT, LIMIT),
    ]
}

impl Shape {
    /// Axis-aligned rectangle from a corner and a size. Negative sizes are normalized.
    #[must_use]
    pub fn rectangle(x: f32, y: f32, width: f32, height: f32) -> Self {
        let (min, max) = Self::corners(x, y, width, height);
        Self::Rectangle { min, max }
    }
    #[must_use]
    pub fn ellipse(x: f32, y: f32, width: f32, height: f32) -> Self {
        let (min, max) = Self::corners(x, y, width, height);
        Self::Ellipse { min, max }
    }
    #[must_use]
    pub fn polygon(points: impl IntoIterator<Item = [f32; 2]>) -> Self {
        Self::Polygon {
            points: points.into_iter().map(|[x, y]| point(x, y)).collect(),
        }
    }
    fn corners(x: f32, y: f32, width: f32, height: f32) -> ([FiniteF32; 2], [FiniteF32; 2]) {
        let (x0, x1) = (x.min(x + width), x.max(x + width));
        let (y0, y1) = (y.min(y + height), y.max(y + height));
        (point(x0, y0), point(x1, y1))
    }
    /// Whether the point is inside. Edges follow a top-left rule: min inclusive, max exclusive.
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        match self {
            Self::Rectangle { min, max } => {
                x >= min[0].get() && y >= min[1].get() && x < max[0].get() && y < max[1].get()
            }
            Self::Ellipse { min, max } => {
                let rx = (max[0].get() - min[0].get()) / 2.0;
                let ry = (max[1].get() - min[1].get()) / 2.0;
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let dx = (x - (min[0].get() + rx)) / rx;
                let dy = (y - (min[1].get() + ry)) / ry;
                dx * dx + dy * dy < 1.0
            }
            Self::Polygon { points } => {
                let mut inside = false;
                let n = points.len();
                if n < 3 {
                    return false;
                }
                let mut j = n - 1;
                for i in 0..n {
                    let [xi, yi] = points[i].map(FiniteF32::get);
                    let [xj, yj] = points[j].map(FiniteF32::get);
                    if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }
    /// Pixel bounds, rounded outwards. Empty for degenerate shapes.
    #[must_use]
    pub fn bounds(&self) -> RectI {
        let (min, max) = match self {
            Self::Rectangle { min, max } | Self::Ellipse { min, max } => {
                (min.map(FiniteF32::get), max.map(FiniteF32::get))
            }
            Self::Polygon { points } => {
                if points.is_empty() {
                    return RectI::default();
                }
                points.iter().fold(
                    ([f32::MAX; 2], [f32::MIN; 2]),
                    |(min, max), p| {
                        (
                            [min[0].min(p[0].get()), min[1].min(p[1].get())],
                            [max[0].max(p[0].get()), max[1].max(p[1].get())],
                        )
                    },
                )
            }
        };
        RectI::from_corners(
            [min[0].floor() as i32, min[1].floor() as i32],
            [max[0].ceil() as i32, max[1].ceil() as i32],
        )
    }
    /// Fraction of the full-resolution pixel area `[x, x+scale) x [y, y+scale)` that is
    /// covered, from a fixed sample grid (1 sample, or 2x2 when antialiased).
    #[must_use]
    pub fn coverage(&self, x: f32, y: f32, scale: f32, antialias: bool) -> f32 {
        if antialias {
            const OFFSETS: [f32; 2] = [0.25, 0.75];
            let hits = OFFSETS
                .iter()
                .flat_map(|oy| OFFSETS.iter().map(move |ox| (*ox, *oy)))
                .filter(|(ox, oy)| self.contains(x + ox * scale, y + oy * scale))
                .count();
            hits as f32 / 4.0
        } else if self.contains(x + 0.5 * scale, y + 0.5 * scale) {
            1.0
        } else {
            0.0
        }
    }
}
