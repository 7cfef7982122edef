// THEORY:
// The `region` module is the pure data layer underneath the occupancy
// estimator. It knows nothing about frames or masks; it only answers
// "where are the two circles, and are they both placed yet?". Callers that
// work in raw pixel coordinates (a click-selection UI, a saved layout) use
// negative values as their "not placed" sentinel; the setter maps that to
// `Option<Point>` at the boundary, so a setter handed negative coordinates
// clears the region, and the analysis may not start until both circles
// exist.

use serde::{Deserialize, Serialize};

/// An integer pixel coordinate in frame space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Which of the two tracked circles a caller is addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// The two occupancy circles plus the transient hover indicator.
///
/// The radius is shared between both circles; the assay compares two
/// identical footprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPair {
    pub left: Option<Point>,
    pub right: Option<Point>,
    /// Shared circle radius in pixels.
    pub radius: i32,
    /// Where the pointer is hovering, if anywhere. Display-only; the
    /// session clears it on every start.
    pub pointed: Option<Point>,
}

impl RegionPair {
    pub fn new(radius: i32) -> Self {
        Self {
            left: None,
            right: None,
            radius,
            pointed: None,
        }
    }

    /// Places one circle. Negative coordinates clear it, preserving the
    /// sentinel behavior downstream logic gates on.
    pub fn set(&mut self, side: Side, point: Point) {
        let value = if point.x < 0 || point.y < 0 {
            None
        } else {
            Some(point)
        };
        match side {
            Side::Left => self.left = value,
            Side::Right => self.right = value,
        }
    }

    pub fn set_pointed(&mut self, point: Option<Point>) {
        self.pointed = point.filter(|p| p.x >= 0 && p.y >= 0);
    }

    /// Both circles placed; the precondition for starting an analysis.
    pub fn both_set(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

impl Default for RegionPair {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCLE_RADIUS)
    }
}

/// Default circle radius in pixels.
pub const DEFAULT_CIRCLE_RADIUS: i32 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_start_unset() {
        let regions = RegionPair::default();
        assert!(regions.left.is_none());
        assert!(regions.right.is_none());
        assert!(!regions.both_set());
    }

    #[test]
    fn negative_coordinates_clear_a_region() {
        let mut regions = RegionPair::default();
        regions.set(Side::Left, Point::new(10, 20));
        assert!(regions.left.is_some());

        regions.set(Side::Left, Point::new(-1, -1));
        assert!(regions.left.is_none());
    }

    #[test]
    fn both_set_requires_both_circles() {
        let mut regions = RegionPair::default();
        regions.set(Side::Left, Point::new(100, 100));
        assert!(!regions.both_set());
        regions.set(Side::Right, Point::new(300, 100));
        assert!(regions.both_set());
    }

    #[test]
    fn pointed_rejects_negative_coordinates() {
        let mut regions = RegionPair::default();
        regions.set_pointed(Some(Point::new(-5, 12)));
        assert!(regions.pointed.is_none());
        regions.set_pointed(Some(Point::new(5, 12)));
        assert_eq!(regions.pointed, Some(Point::new(5, 12)));
    }
}
