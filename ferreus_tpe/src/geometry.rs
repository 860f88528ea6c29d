/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides small fixed-size vector helpers and axis aligned bounding boxes for curve geometry.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use serde::{Deserialize, Serialize};

/// A point or direction in 3D space.
pub type Vec3 = [f64; 3];

#[inline(always)]
pub fn add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline(always)]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline(always)]
pub fn scale(a: &Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// Returns `a + s * b`.
#[inline(always)]
pub fn axpy(a: &Vec3, s: f64, b: &Vec3) -> Vec3 {
    [a[0] + s * b[0], a[1] + s * b[1], a[2] + s * b[2]]
}

#[inline(always)]
pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline(always)]
pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline(always)]
pub fn norm_squared(a: &Vec3) -> f64 {
    dot(a, a)
}

#[inline(always)]
pub fn norm(a: &Vec3) -> f64 {
    norm_squared(a).sqrt()
}

#[inline(always)]
pub fn distance(a: &Vec3, b: &Vec3) -> f64 {
    norm(&sub(a, b))
}

/// Midpoint of the segment `a`-`b`.
#[inline(always)]
pub fn midpoint(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        0.5 * (a[0] + b[0]),
        0.5 * (a[1] + b[1]),
        0.5 * (a[2] + b[2]),
    ]
}

/// Removes the component of `v` along the unit vector `t`.
#[inline(always)]
pub fn reject(v: &Vec3, t: &Vec3) -> Vec3 {
    axpy(v, -dot(t, v), t)
}

/// Axis aligned bounding box (AABB) in 3D.
///
/// An empty box has `min = +inf` and `max = -inf`, so that the union with any
/// other box returns the other box unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Computes the extents of a set of points.
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Vec3>,
    {
        let mut aabb = Self::empty();
        for point in points {
            aabb.expand(point);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    /// Grows the box to include `point`.
    #[inline(always)]
    pub fn expand(&mut self, point: &Vec3) {
        for axis in 0..3 {
            if point[axis] < self.min[axis] {
                self.min[axis] = point[axis];
            }
            if point[axis] > self.max[axis] {
                self.max[axis] = point[axis];
            }
        }
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut result = *self;
        for axis in 0..3 {
            result.min[axis] = result.min[axis].min(other.min[axis]);
            result.max[axis] = result.max[axis].max(other.max[axis]);
        }
        result
    }

    /// Closed containment test, points on the boundary are inside.
    #[inline(always)]
    pub fn contains_point(&self, point: &Vec3) -> bool {
        (0..3).all(|axis| self.min[axis] <= point[axis] && point[axis] <= self.max[axis])
    }

    pub fn contains_box(&self, other: &Aabb) -> bool {
        other.is_empty() || (self.contains_point(&other.min) && self.contains_point(&other.max))
    }

    #[inline(always)]
    pub fn center(&self) -> Vec3 {
        midpoint(&self.min, &self.max)
    }

    #[inline(always)]
    pub fn extent(&self) -> Vec3 {
        sub(&self.max, &self.min)
    }

    /// Length of the box diagonal.
    #[inline(always)]
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        norm(&self.extent())
    }

    /// Axis of maximum extent. Ties resolve to the lowest axis.
    pub fn longest_axis(&self) -> usize {
        let extent = self.extent();
        let mut axis = 0;
        for candidate in 1..3 {
            if extent[candidate] > extent[axis] {
                axis = candidate;
            }
        }
        axis
    }
}
