/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the element sample type and the metric kernel trait used by the block-cluster tree.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{curve_network::CurveEdge, geometry::Vec3};

/// A curve element reduced to a single quadrature point: an edge (midpoint,
/// unit tangent, length) or a BVH cluster (centroid, average tangent, total length).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementSample {
    pub position: Vec3,
    pub tangent: Vec3,
    pub length: f64,
}

impl ElementSample {
    #[inline(always)]
    pub fn from_edge(edge: &CurveEdge) -> Self {
        Self {
            position: edge.midpoint,
            tangent: edge.tangent,
            length: edge.length,
        }
    }
}

/// Evaluates the interaction weight between two curve elements for the
/// metric operator.
///
/// The weight excludes the element lengths; [`MetricKernel::entry`] applies
/// them to give the off-diagonal matrix entry.
pub trait MetricKernel: Send + Sync {
    fn weight(&self, target: &ElementSample, source: &ElementSample) -> f64;

    #[inline(always)]
    fn entry(&self, target: &ElementSample, source: &ElementSample) -> f64 {
        target.length * source.length * self.weight(target, source)
    }
}
