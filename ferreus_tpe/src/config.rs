/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares configuration types for kernel exponents, Barnes-Hut traversal and block clustering.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares configuration types for kernel exponents, Barnes-Hut traversal and block clustering.
use serde::{Deserialize, Serialize};

use crate::error::{Result, TpeError};

/// Default separation factor used by the admissibility test.
pub const DEFAULT_SEPARATION_FACTOR: f64 = 1.0;

/// Default maximum number of edges stored in a BVH leaf.
pub const DEFAULT_LEAF_CAPACITY: usize = 4;

/// Exponents of the tangent-point kernel
/// `k(p, q, T) = |sin θ|^alpha / |p - q|^beta`.
///
/// The continuum energy is only well defined for `beta > alpha > 1`.
/// Values outside that range are rejected by [`TpeParams::validate`], they are
/// never silently corrected.
///
/// ### Default Values
/// - `alpha`: `3.0`
/// - `beta`: `6.0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpeParams {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for TpeParams {
    fn default() -> Self {
        Self {
            alpha: 3.0,
            beta: 6.0,
        }
    }
}

impl TpeParams {
    /// Creates and validates a new set of exponents.
    pub fn new(alpha: f64, beta: f64) -> Result<Self> {
        let params = Self { alpha, beta };
        params.validate()?;
        Ok(params)
    }

    /// Checks `beta > alpha > 1` (and that both are finite).
    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() || !self.beta.is_finite() {
            return Err(TpeError::invalid(format!(
                "kernel exponents must be finite, got alpha = {}, beta = {}",
                self.alpha, self.beta
            )));
        }
        if !(self.beta > self.alpha && self.alpha > 1.0) {
            return Err(TpeError::invalid(format!(
                "kernel exponents must satisfy beta > alpha > 1, got alpha = {}, beta = {}",
                self.alpha, self.beta
            )));
        }
        Ok(())
    }

    /// Fractional order `s = (beta - 1) / alpha` of the energy.
    pub fn sobolev_order(&self) -> f64 {
        (self.beta - 1.0) / self.alpha
    }

    /// Order `sigma = s - 1` of the fractional Laplacian in the metric.
    pub fn metric_sigma(&self) -> f64 {
        self.sobolev_order() - 1.0
    }
}

/// How near-coincident element pairs are handled during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DegeneracyPolicy {
    /// Fail with [`TpeError::NumericalDegeneracy`].
    #[default]
    Report,

    /// Floor the pair distance at `min_distance` and continue.
    Clamp,
}

impl DegeneracyPolicy {
    /// Applies the policy to a pair of elements `distance` apart.
    #[inline(always)]
    pub(crate) fn check(
        &self,
        distance: f64,
        min_distance: f64,
        first: usize,
        second: usize,
    ) -> Result<()> {
        match self {
            DegeneracyPolicy::Report if distance < min_distance => {
                Err(TpeError::NumericalDegeneracy {
                    distance,
                    first,
                    second,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Parameters controlling the bounding volume hierarchy and Barnes-Hut traversal.
///
/// ### Default Values
/// - `separation_factor`: `1.0`
/// - `leaf_capacity`: `4`
/// - `min_distance`: `1e-10`
/// - `degeneracy_policy`: [`DegeneracyPolicy::Report`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarnesHutParams {
    /// A cluster is admissible when the distance from the query midpoint to
    /// its box center exceeds `separation_factor` times its radius (see
    /// `BvhNode::radius`). Larger values are more accurate;
    /// `f64::INFINITY` forces exact evaluation.
    pub separation_factor: f64,

    /// Maximum number of edges in a BVH leaf.
    pub leaf_capacity: usize,

    /// Distances below this are treated as degenerate.
    pub min_distance: f64,

    pub degeneracy_policy: DegeneracyPolicy,
}

impl Default for BarnesHutParams {
    fn default() -> Self {
        Self {
            separation_factor: DEFAULT_SEPARATION_FACTOR,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            min_distance: 1e-10,
            degeneracy_policy: DegeneracyPolicy::Report,
        }
    }
}

impl BarnesHutParams {
    /// Returns a new [`BarnesHutParamsBuilder`] populated with defaults.
    pub fn builder() -> BarnesHutParamsBuilder {
        BarnesHutParamsBuilder {
            params: Self::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.separation_factor.is_nan() || self.separation_factor < 0.0 {
            return Err(TpeError::invalid(format!(
                "separation factor must be non-negative, got {}",
                self.separation_factor
            )));
        }
        if self.leaf_capacity == 0 {
            return Err(TpeError::invalid("leaf capacity must be at least one edge"));
        }
        if !(self.min_distance >= 0.0) {
            return Err(TpeError::invalid(format!(
                "minimum distance must be non-negative, got {}",
                self.min_distance
            )));
        }
        Ok(())
    }
}

/// A convenience builder for [`BarnesHutParams`].
#[derive(Debug, Clone, Copy)]
pub struct BarnesHutParamsBuilder {
    params: BarnesHutParams,
}

impl BarnesHutParamsBuilder {
    pub fn separation_factor(mut self, separation_factor: f64) -> Self {
        self.params.separation_factor = separation_factor;
        self
    }

    pub fn leaf_capacity(mut self, leaf_capacity: usize) -> Self {
        self.params.leaf_capacity = leaf_capacity;
        self
    }

    pub fn min_distance(mut self, min_distance: f64) -> Self {
        self.params.min_distance = min_distance;
        self
    }

    pub fn degeneracy_policy(mut self, degeneracy_policy: DegeneracyPolicy) -> Self {
        self.params.degeneracy_policy = degeneracy_policy;
        self
    }

    /// Builds and returns a [`BarnesHutParams`] instance.
    pub fn build(self) -> BarnesHutParams {
        self.params
    }
}

/// Supported far-field block representations in the block-cluster tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum BlockCompression {
    /// Rank-1 block built from the cluster aggregates (centroid, total length
    /// and average tangent) of both clusters.
    #[default]
    Aggregate,

    /// Adaptive cross approximation (ACA) with partial pivoting of the exact
    /// block, truncated at relative tolerance `epsilon`.
    Aca { epsilon: f64 },
}

/// Parameters controlling construction of the block-cluster tree.
///
/// ### Default Values
/// - `separation_factor`: `1.0`
/// - `leaf_capacity`: `4`
/// - `compression`: [`BlockCompression::Aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockClusterParams {
    /// Two clusters are admissible when their box centers are further
    /// apart than `separation_factor` times the larger of their radii. At the
    /// default with [`BlockCompression::Aggregate`], the metric product is
    /// within a relative Frobenius error of `1e-2` of the dense product on
    /// smooth curves.
    pub separation_factor: f64,

    /// Maximum number of edges in a BVH leaf, used when the tree builds its own BVH.
    pub leaf_capacity: usize,

    pub compression: BlockCompression,

    /// Distances below this are treated as degenerate.
    pub min_distance: f64,

    pub degeneracy_policy: DegeneracyPolicy,
}

impl Default for BlockClusterParams {
    fn default() -> Self {
        Self {
            separation_factor: DEFAULT_SEPARATION_FACTOR,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            compression: BlockCompression::Aggregate,
            min_distance: 1e-10,
            degeneracy_policy: DegeneracyPolicy::Report,
        }
    }
}

impl BlockClusterParams {
    pub fn with_separation_factor(separation_factor: f64) -> Self {
        Self {
            separation_factor,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.separation_factor.is_nan() || self.separation_factor < 0.0 {
            return Err(TpeError::invalid(format!(
                "separation factor must be non-negative, got {}",
                self.separation_factor
            )));
        }
        if self.leaf_capacity == 0 {
            return Err(TpeError::invalid("leaf capacity must be at least one edge"));
        }
        if let BlockCompression::Aca { epsilon } = self.compression {
            if !(epsilon > 0.0 && epsilon < 1.0) {
                return Err(TpeError::invalid(format!(
                    "ACA tolerance must lie in (0, 1), got {}",
                    epsilon
                )));
            }
        }
        Ok(())
    }
}
