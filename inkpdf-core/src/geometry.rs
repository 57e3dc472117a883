use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn approx_eq(self, other: Point, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        Self::new(left, top, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn bounding<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for p in iter {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(Self::from_corners(min, max))
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn inflate(&self, amount: f64) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            self.width + 2.0 * amount,
            self.height + 2.0 * amount,
        )
    }

    pub fn centered(center: Point, half_size: f64) -> Self {
        Self::new(
            center.x - half_size,
            center.y - half_size,
            2.0 * half_size,
            2.0 * half_size,
        )
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    pub fn intersects_segment(&self, a: Point, b: Point) -> bool {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
        let edges = [
            (-dx, a.x - self.x),
            (dx, self.right() - a.x),
            (-dy, a.y - self.y),
            (dy, self.bottom() - a.y),
        ];
        for (p, q) in edges {
            if p == 0.0 {
                if q < 0.0 {
                    return false;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return false;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return false;
                }
                t1 = t1.min(r);
            }
        }
        true
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    pub fn approx_eq(&self, other: &Rect, tolerance: f64) -> bool {
        self.origin().approx_eq(other.origin(), tolerance)
            && (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RenderScale(f64);

impl RenderScale {
    pub const DEFAULT: RenderScale = RenderScale(2.0);

    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value > 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f64> for RenderScale {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("render scale must be positive, got {value}"))
    }
}

impl From<RenderScale> for f64 {
    fn from(scale: RenderScale) -> Self {
        scale.0
    }
}

pub fn to_document_space(point: Point, scale: RenderScale) -> Point {
    Point::new(point.x / scale.0, point.y / scale.0)
}

pub fn to_render_space(point: Point, scale: RenderScale) -> Point {
    Point::new(point.x * scale.0, point.y * scale.0)
}

pub fn length_to_document(length: f64, scale: RenderScale) -> f64 {
    length / scale.0
}

pub fn length_to_render(length: f64, scale: RenderScale) -> f64 {
    length * scale.0
}

pub fn rect_to_render(rect: Rect, scale: RenderScale) -> Rect {
    let origin = to_render_space(rect.origin(), scale);
    Rect::new(
        origin.x,
        origin.y,
        length_to_render(rect.width, scale),
        length_to_render(rect.height, scale),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_to_render_scales_origin_and_size() {
        let scale = RenderScale::new(2.5).unwrap();
        let rect = rect_to_render(Rect::new(2.0, 4.0, 10.0, 0.0), scale);
        assert_eq!(rect, Rect::new(5.0, 10.0, 25.0, 0.0));
        assert_eq!(rect.origin(), to_render_space(Point::new(2.0, 4.0), scale));
    }

    #[test]
    fn coordinate_round_trip_is_lossless_within_tolerance() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(123.456, 789.012),
            Point::new(-5.5, 1e6),
            Point::new(0.001, 0.002),
        ];
        for raw in [0.5, 1.0, 2.0, 3.3333, 7.25] {
            let scale = RenderScale::new(raw).unwrap();
            for p in points {
                let back = to_render_space(to_document_space(p, scale), scale);
                assert!(back.approx_eq(p, 1e-9), "{p:?} at {raw} came back as {back:?}");
            }
        }
    }

    #[test]
    fn lengths_follow_the_same_scalar() {
        let scale = RenderScale::new(2.0).unwrap();
        assert_eq!(length_to_document(4.0, scale), 2.0);
        assert_eq!(length_to_render(2.0, scale), 4.0);
    }

    #[test]
    fn render_scale_rejects_non_positive_values() {
        assert!(RenderScale::new(0.0).is_none());
        assert!(RenderScale::new(-1.0).is_none());
        assert!(RenderScale::new(f64::NAN).is_none());
        assert!(RenderScale::new(f64::INFINITY).is_none());
        assert_eq!(RenderScale::default().get(), 2.0);
    }

    #[test]
    fn from_corners_normalizes_drag_direction() {
        let rect = Rect::from_corners(Point::new(50.0, 40.0), Point::new(10.0, 100.0));
        assert_eq!(rect, Rect::new(10.0, 40.0, 40.0, 60.0));
        assert!(rect.width >= 0.0 && rect.height >= 0.0);
    }

    #[test]
    fn bounding_covers_all_points() {
        let rect = Rect::bounding([
            Point::new(3.0, 9.0),
            Point::new(-1.0, 2.0),
            Point::new(5.0, 4.0),
        ])
        .unwrap();
        assert_eq!(rect, Rect::new(-1.0, 2.0, 6.0, 7.0));
        assert!(Rect::bounding(std::iter::empty()).is_none());
    }

    #[test]
    fn segment_clipping_detects_crossings_and_misses() {
        let square = Rect::centered(Point::new(5.0, 5.0), 1.0);
        assert!(square.intersects_segment(Point::new(0.0, 5.0), Point::new(10.0, 5.0)));
        assert!(square.intersects_segment(Point::new(5.0, 5.0), Point::new(5.0, 5.0)));
        assert!(!square.intersects_segment(Point::new(0.0, 0.0), Point::new(10.0, 0.0)));
        assert!(!square.intersects_segment(Point::new(0.0, 5.0), Point::new(3.9, 5.0)));
        assert!(square.intersects_segment(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
    }

    #[test]
    fn rect_overlap_includes_touching_edges() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Rect::new(10.0, 10.0, 5.0, 5.0)));
        assert!(a.intersects(&Rect::new(2.0, 2.0, 1.0, 1.0)));
        assert!(!a.intersects(&Rect::new(10.5, 0.0, 5.0, 5.0)));
    }
}
