use serde::{Deserialize, Serialize};

/// BoundingBox represents the image-space box of a detected instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left of the bounding box (i.e. min-x)
    x: f32,
    /// Top of the bounding box (i.e. min-y)
    y: f32,
    /// Width of the bounding box
    width: f32,
    /// Height of the bounding box
    height: f32,
}

impl BoundingBox {
    /// Returns a new BoundingBox
    ///
    /// # Parameters
    ///
    /// * `x`: Bounding box left.
    /// * `y`: Bounding box top.
    /// * `width`: Bounding box width.
    /// * `height`: Bounding box height.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns the x of the bounding box
    pub fn x(&self) -> f32 {
        self.x
    }

    /// Returns the y of the bounding box
    pub fn y(&self) -> f32 {
        self.y
    }

    /// Returns the width of the bounding box
    pub fn width(&self) -> f32 {
        self.width
    }

    /// Returns the height of the bounding box
    pub fn height(&self) -> f32 {
        self.height
    }

    /// max-x
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// max-y
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Returns the area of the bounding box
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Returns the center of the bounding box as `(x, y)`.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Returns a copy of this bounding box shifted by `(dx, dy)`.
    pub fn translate(&self, dx: f32, dy: f32) -> BoundingBox {
        BoundingBox::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Returns the overlapping region of the two boxes, if they overlap at all.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right > left && bottom > top {
            Some(BoundingBox::new(left, top, right - left, bottom - top))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn extent() {
        let bbox = BoundingBox::new(1.0, 2.0, 13.0, 4.0);
        assert_eq!(bbox.right(), 14.0);
        assert_eq!(bbox.bottom(), 6.0);
        assert_eq!(bbox.area(), 52.0);
        assert_eq!(BoundingBox::new(0.0, 0.0, -1.0, 3.0).area(), 0.0);
    }

    #[test]
    fn intersection() {
        let a = BoundingBox::new(0.0, 0.0, 5.0, 5.0);
        let b = BoundingBox::new(3.0, 2.0, 5.0, 5.0);
        assert_eq!(
            a.intersection(&b),
            Some(BoundingBox::new(3.0, 2.0, 2.0, 3.0))
        );

        // touching edges do not overlap
        let c = BoundingBox::new(5.0, 0.0, 5.0, 5.0);
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn translate() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0).translate(-1.0, 0.5);
        assert_eq!(bbox, BoundingBox::new(0.0, 2.5, 3.0, 4.0));
        assert_eq!(bbox.center(), (1.5, 4.5));
    }
}
