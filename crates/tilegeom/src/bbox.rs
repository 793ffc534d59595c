use glam::{DMat4, DVec3};

/// Axis-aligned bounding box in 3-D.
///
/// Starts uninitialized; the first point added sets both corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
    initialized: bool,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingBox {
    pub const fn new() -> Self {
        Self {
            min: DVec3::ZERO,
            max: DVec3::ZERO,
            initialized: false,
        }
    }

    pub fn from_points<I: IntoIterator<Item = DVec3>>(points: I) -> Self {
        let mut bbox = Self::new();
        for p in points {
            bbox.add_point(p);
        }
        bbox
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn add_point(&mut self, p: DVec3) {
        if self.initialized {
            self.min = self.min.min(p);
            self.max = self.max.max(p);
        } else {
            self.min = p;
            self.max = p;
            self.initialized = true;
        }
    }

    /// Union with `other`; an uninitialized box contributes nothing.
    pub fn add_box(&mut self, other: &BoundingBox) {
        if !other.initialized {
            return;
        }
        self.add_point(other.min);
        self.add_point(other.max);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut out = *self;
        out.add_box(other);
        out
    }

    /// Centre point of the box.
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Grow every side by `margin` (per axis).
    pub fn expanded(&self, margin: DVec3) -> BoundingBox {
        if !self.initialized {
            return *self;
        }
        BoundingBox {
            min: self.min - margin,
            max: self.max + margin,
            initialized: true,
        }
    }

    pub fn contains_point(&self, p: DVec3) -> bool {
        self.initialized && p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        !other.initialized || (self.contains_point(other.min) && self.contains_point(other.max))
    }

    /// Box enclosing the eight transformed corners.
    pub fn transformed(&self, m: &DMat4) -> BoundingBox {
        if !self.initialized {
            return *self;
        }

        let mut out = BoundingBox::new();
        for i in 0..8 {
            let corner = DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.add_point(m.transform_point3(corner));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_point_initializes() {
        let mut bbox = BoundingBox::new();
        assert!(!bbox.is_initialized());

        bbox.add_point(DVec3::new(-3.0, 4.0, 5.0));
        assert!(bbox.is_initialized());
        assert_eq!(bbox.min, bbox.max);
    }

    #[test]
    fn union_contains_both() {
        let a = BoundingBox::from_points([DVec3::new(0.0, 0.0, 0.0), DVec3::new(1.0, 2.0, 3.0)]);
        let b = BoundingBox::from_points([DVec3::new(-5.0, 1.0, 1.0), DVec3::new(0.5, 7.0, 2.0)]);

        let u = a.union(&b);
        assert!(u.contains_box(&a));
        assert!(u.contains_box(&b));
        assert!(u.min.cmple(u.max).all());

        let empty = BoundingBox::new();
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);
    }

    #[test]
    fn transformed_box_covers_rotated_corners() {
        let bbox = BoundingBox::from_points([DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0)]);
        let m = DMat4::from_rotation_z(std::f64::consts::FRAC_PI_2)
            * DMat4::from_translation(DVec3::new(1.0, 0.0, 0.0));

        let t = bbox.transformed(&m);
        let corner = m.transform_point3(DVec3::new(2.0, 1.0, 1.0));
        assert!(t.min.x <= corner.x + 1e-12 && t.max.x >= corner.x - 1e-12);
        assert!((t.size() - DVec3::new(1.0, 2.0, 1.0)).length() < 1e-9);
    }
}
