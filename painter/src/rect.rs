use glam::Vec2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SplitDirection {
    Top,
    Bottom,
    Left,
    Right,
}

/// Axis-aligned rectangle, position is the top-left corner.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rect {
    pub pos: Vec2,
    pub size: Vec2,
}

impl Rect {
    pub fn new(pos: Vec2, size: Vec2) -> Self {
        Self { pos, size }
    }

    // -- Posing

    pub fn ceil(&self) -> Self {
        Self {
            pos: self.pos.ceil(),
            size: self.size.ceil(),
        }
    }

    pub fn center(&self, element_size: Vec2) -> Self {
        Self {
            pos: self.pos + 0.5 * (self.size - element_size),
            size: element_size,
        }
    }

    pub fn offset(&self, offset: Vec2) -> Self {
        Self {
            pos: self.pos + offset,
            size: self.size,
        }
    }

    // -- Testing

    pub fn is_point_inside(&self, point: Vec2) -> bool {
        self.pos.x <= point.x
            && point.x <= self.pos.x + self.size.x
            && self.pos.y <= point.y
            && point.y <= self.pos.y + self.size.y
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !(other.pos.x > self.pos.x + self.size.x
            || other.pos.x + other.size.x < self.pos.x
            || other.pos.y > self.pos.y + self.size.y
            || other.pos.y + other.size.y < self.pos.y)
    }

    // -- Margins

    pub fn outset(&self, margin: Vec2) -> Self {
        Self {
            pos: self.pos - margin,
            size: self.size + 2.0 * margin,
        }
    }

    pub fn inset(&self, margin: Vec2) -> Self {
        self.outset(-margin)
    }

    // -- Splitting
    //
    // Each `split_*` carves a strip off one edge, shrinks `self` to the rest
    // and returns the strip.

    pub fn split_top(&mut self, height: f32) -> Rect {
        let top = Rect {
            pos: self.pos,
            size: Vec2::new(self.size.x, height),
        };
        *self = Rect {
            pos: Vec2::new(self.pos.x, self.pos.y + height),
            size: Vec2::new(self.size.x, self.size.y - height),
        };
        top
    }

    pub fn split_bottom(&mut self, height: f32) -> Rect {
        let top = Rect {
            pos: self.pos,
            size: Vec2::new(self.size.x, self.size.y - height),
        };
        let bottom = Rect {
            pos: Vec2::new(self.pos.x, self.pos.y + top.size.y),
            size: Vec2::new(self.size.x, height),
        };
        *self = top;
        bottom
    }

    pub fn split_left(&mut self, width: f32) -> Rect {
        let left = Rect {
            pos: self.pos,
            size: Vec2::new(width, self.size.y),
        };
        *self = Rect {
            pos: Vec2::new(self.pos.x + width, self.pos.y),
            size: Vec2::new(self.size.x - width, self.size.y),
        };
        left
    }

    pub fn split_right(&mut self, width: f32) -> Rect {
        let left = Rect {
            pos: self.pos,
            size: Vec2::new(self.size.x - width, self.size.y),
        };
        let right = Rect {
            pos: Vec2::new(self.pos.x + left.size.x, self.pos.y),
            size: Vec2::new(width, self.size.y),
        };
        *self = left;
        right
    }

    /// Split in two around a vertical gap of `thickness` placed at `at`.
    pub fn split_off_left(&self, at: f32, thickness: f32) -> (Rect, Rect) {
        let left = Rect {
            pos: self.pos,
            size: Vec2::new(at - 0.5 * thickness, self.size.y),
        };
        let right = Rect {
            pos: Vec2::new(self.pos.x + at + 0.5 * thickness, self.pos.y),
            size: Vec2::new(self.size.x - at - 0.5 * thickness, self.size.y),
        };
        (left, right)
    }

    /// Split in two around a horizontal gap of `thickness` placed at `at`.
    pub fn split_off_top(&self, at: f32, thickness: f32) -> (Rect, Rect) {
        let top = Rect {
            pos: self.pos,
            size: Vec2::new(self.size.x, at - 0.5 * thickness),
        };
        let bottom = Rect {
            pos: Vec2::new(self.pos.x, self.pos.y + at + 0.5 * thickness),
            size: Vec2::new(self.size.x, self.size.y - at - 0.5 * thickness),
        };
        (top, bottom)
    }
}

/// Rect + direction pair to lay out successive elements along one edge.
pub struct RectSplit<'a> {
    pub rect: &'a mut Rect,
    pub direction: SplitDirection,
}

impl<'a> RectSplit<'a> {
    pub fn new(rect: &'a mut Rect, direction: SplitDirection) -> Self {
        Self { rect, direction }
    }

    pub fn split(&mut self, value: f32) -> Rect {
        match self.direction {
            SplitDirection::Top => self.rect.split_top(value),
            SplitDirection::Bottom => self.rect.split_bottom(value),
            SplitDirection::Left => self.rect.split_left(value),
            SplitDirection::Right => self.rect.split_right(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect::new(Vec2::new(x, y), Vec2::new(w, h))
    }

    // The strip and the rest must union back to the original rect.
    fn assert_union(original: Rect, a: Rect, b: Rect) {
        let min = a.pos.min(b.pos);
        let max = (a.pos + a.size).max(b.pos + b.size);
        assert_eq!(min, original.pos);
        assert_eq!(max - min, original.size);
    }

    #[test]
    fn test_split_top_union() {
        let original = rect(10.0, 20.0, 100.0, 50.0);
        let mut remaining = original;
        let top = remaining.split_top(12.0);
        assert_eq!(top, rect(10.0, 20.0, 100.0, 12.0));
        assert_eq!(remaining, rect(10.0, 32.0, 100.0, 38.0));
        assert_union(original, top, remaining);
    }

    #[test]
    fn test_split_bottom_union() {
        let original = rect(0.0, 0.0, 64.0, 64.0);
        let mut remaining = original;
        let bottom = remaining.split_bottom(16.0);
        assert_eq!(bottom, rect(0.0, 48.0, 64.0, 16.0));
        assert_union(original, bottom, remaining);
    }

    #[test]
    fn test_split_left_union() {
        let original = rect(5.0, 5.0, 40.0, 10.0);
        let mut remaining = original;
        let left = remaining.split_left(15.0);
        assert_eq!(left, rect(5.0, 5.0, 15.0, 10.0));
        assert_eq!(remaining, rect(20.0, 5.0, 25.0, 10.0));
        assert_union(original, left, remaining);
    }

    #[test]
    fn test_split_right_union() {
        let original = rect(0.0, 0.0, 40.0, 10.0);
        let mut remaining = original;
        let right = remaining.split_right(15.0);
        assert_eq!(right, rect(25.0, 0.0, 15.0, 10.0));
        assert_union(original, right, remaining);
    }

    #[test]
    fn test_inset_outset_round_trip() {
        let original = rect(3.0, 4.0, 30.0, 40.0);
        let margin = Vec2::new(2.0, 5.0);
        assert_eq!(original.inset(margin).outset(margin), original);
        assert_eq!(original.outset(margin).inset(margin), original);
    }

    #[test]
    fn test_center() {
        let outer = rect(0.0, 0.0, 100.0, 100.0);
        let centered = outer.center(Vec2::new(20.0, 10.0));
        assert_eq!(centered, rect(40.0, 45.0, 20.0, 10.0));
    }

    #[test]
    fn test_point_inside() {
        let r = rect(0.0, 0.0, 100.0, 30.0);
        assert!(r.is_point_inside(Vec2::new(50.0, 15.0)));
        assert!(r.is_point_inside(Vec2::new(0.0, 0.0)));
        assert!(r.is_point_inside(Vec2::new(100.0, 30.0)));
        assert!(!r.is_point_inside(Vec2::new(101.0, 15.0)));
        assert!(!r.is_point_inside(Vec2::new(50.0, -1.0)));
    }

    #[test]
    fn test_intersects() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&rect(5.0, 5.0, 10.0, 10.0)));
        assert!(a.intersects(&a));
        assert!(!a.intersects(&rect(20.0, 0.0, 5.0, 5.0)));
    }

    #[test]
    fn test_rectsplit_directions() {
        let mut r = rect(0.0, 0.0, 100.0, 100.0);
        let mut split = RectSplit::new(&mut r, SplitDirection::Top);
        let first = split.split(10.0);
        let second = split.split(10.0);
        assert_eq!(first, rect(0.0, 0.0, 100.0, 10.0));
        assert_eq!(second, rect(0.0, 10.0, 100.0, 10.0));
        assert_eq!(r, rect(0.0, 20.0, 100.0, 80.0));
    }
}
