//! Rectangles and the scale + translate transform used for tile placement

/// Floating point rectangle, edges inclusive-exclusive
///
/// Used both for fractional slice bounds in `[0,1]²` and for device-space
/// target rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectF {
    /// The whole page in slice coordinates
    pub const UNIT: RectF = RectF {
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Whether the two rectangles overlap with non-zero area
    pub fn intersects(&self, other: &RectF) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    pub fn intersection(&self, other: &RectF) -> Option<RectF> {
        let rect = RectF::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!rect.is_empty()).then_some(rect)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn offset(&self, dx: f32, dy: f32) -> RectF {
        RectF::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Map a rectangle expressed in `outer`'s unit space into `outer`
    ///
    /// `RectF::UNIT.map_into(&r) == r`; quadrants of a slice are obtained by
    /// mapping the unit quadrants into it.
    pub fn map_into(&self, outer: &RectF) -> RectF {
        let w = outer.width();
        let h = outer.height();
        RectF::new(
            outer.left + self.left * w,
            outer.top + self.top * h,
            outer.left + self.right * w,
            outer.top + self.bottom * h,
        )
    }

    /// Round each edge to the nearest integer
    pub fn round(&self) -> Rect {
        Rect::new(
            self.left.round() as i32,
            self.top.round() as i32,
            self.right.round() as i32,
            self.bottom.round() as i32,
        )
    }

    /// Approximate equality within `epsilon` on every edge
    pub fn approx_eq(&self, other: &RectF, epsilon: f32) -> bool {
        (self.left - other.left).abs() <= epsilon
            && (self.top - other.top).abs() <= epsilon
            && (self.right - other.right).abs() <= epsilon
            && (self.bottom - other.bottom).abs() <= epsilon
    }
}

/// Integer rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn to_f32(&self) -> RectF {
        RectF::new(
            self.left as f32,
            self.top as f32,
            self.right as f32,
            self.bottom as f32,
        )
    }
}

/// Axis-aligned scale followed by translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale_x: 1.0,
        scale_y: 1.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    /// Transform taking `from` onto `to`
    pub fn mapping(from: &RectF, to: &RectF) -> Self {
        let scale_x = if from.width() == 0.0 {
            1.0
        } else {
            to.width() / from.width()
        };
        let scale_y = if from.height() == 0.0 {
            1.0
        } else {
            to.height() / from.height()
        };
        Self {
            scale_x,
            scale_y,
            translate_x: to.left - from.left * scale_x,
            translate_y: to.top - from.top * scale_y,
        }
    }

    pub fn map_rect(&self, rect: &RectF) -> RectF {
        RectF::new(
            rect.left * self.scale_x + self.translate_x,
            rect.top * self.scale_y + self.translate_y,
            rect.right * self.scale_x + self.translate_x,
            rect.bottom * self.scale_y + self.translate_y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_into_quadrants() {
        let slice = RectF::new(0.5, 0.0, 1.0, 0.5);
        let quadrant = RectF::new(0.5, 0.5, 1.0, 1.0).map_into(&slice);
        assert_eq!(quadrant, RectF::new(0.75, 0.25, 1.0, 0.5));
        assert_eq!(RectF::UNIT.map_into(&slice), slice);
    }

    #[test]
    fn test_intersects_excludes_touching_edges() {
        let a = RectF::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&RectF::new(5.0, 5.0, 15.0, 15.0)));
        assert!(!a.intersects(&RectF::new(10.0, 0.0, 20.0, 10.0)));
        assert_eq!(
            a.intersection(&RectF::new(5.0, -5.0, 20.0, 5.0)),
            Some(RectF::new(5.0, 0.0, 10.0, 5.0))
        );
        assert_eq!(a.intersection(&RectF::new(20.0, 20.0, 30.0, 30.0)), None);
    }

    #[test]
    fn test_transform_mapping() {
        let from = RectF::from_size(256.0, 128.0);
        let to = RectF::new(100.0, 50.0, 612.0, 306.0);
        let t = Transform::mapping(&from, &to);

        assert_eq!(t.map_rect(&from), to);
        let cell = t.map_rect(&RectF::new(128.0, 0.0, 256.0, 128.0));
        assert_eq!(cell, RectF::new(356.0, 50.0, 612.0, 306.0));
    }

    #[test]
    fn test_center_and_offset() {
        let r = RectF::new(10.0, 20.0, 30.0, 60.0);
        assert_eq!(r.center(), (20.0, 40.0));
        assert_eq!(r.offset(-10.0, -20.0), RectF::new(0.0, 0.0, 20.0, 40.0));
        assert_eq!(r.round(), Rect::new(10, 20, 30, 60));
    }
}
