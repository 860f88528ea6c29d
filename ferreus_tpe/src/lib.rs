/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the tangent-point energy and fractional Sobolev metric crate.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Tangent-point energy for space curves
//!
//! This crate evaluates the discrete tangent-point energy of a network of
//! polygonal curves, and its gradient, with a Barnes-Hut approximation over a
//! bounding volume hierarchy (BVH) of edges. It also builds a block-cluster
//! tree over the same hierarchy to apply the fractional Sobolev metric used to
//! precondition the gradient flow.
//!
//! The kernel is
//! `k(p, q, T) = |T x (p - q)|^alpha / |p - q|^(alpha + beta)`,
//! and the energy sums `l_I l_J k(m_I, m_J, T_I)` over ordered pairs of
//! non-adjacent edges with midpoints `m`, unit tangents `T` and lengths `l`.
//!
//! # Features:
//! - Median-split BVH over edge positions and tangents, built in parallel
//! - Barnes-Hut energy and exact-near-field gradient, with results independent
//!   of the number of threads
//! - Block-cluster partition of the metric with aggregate or ACA far-field blocks
//! - Multiple right-hand sides for metric products
//!
//! # Example: Energy, gradient and metric product
//!
//! ```
//! use ferreus_tpe::{
//!     BarnesHut, BarnesHutParams, BlockClusterParams, BlockClusterTree, Bvh, TpeParams,
//!     test_curves::CurveTestShapes,
//! };
//! use faer::Mat;
//!
//! // A trefoil knot with 200 edges
//! let network = CurveTestShapes::trefoil(200).unwrap();
//!
//! // The BVH is rebuilt whenever the vertex positions change
//! let params = BarnesHutParams::builder()
//!     .separation_factor(1.0)
//!     .leaf_capacity(4)
//!     .build();
//! let bvh = Bvh::build(&network, params.leaf_capacity).unwrap();
//!
//! let evaluator = BarnesHut::new(&network, &bvh, TpeParams::default(), params).unwrap();
//! let (energy, gradient) = evaluator.energy_and_gradient().unwrap();
//! println!("energy = {energy}, |gradient rows| = {}", gradient.nrows());
//!
//! // Apply the metric to the edge-wise gradient of some quantity
//! let tree =
//!     BlockClusterTree::new(&network, TpeParams::default(), BlockClusterParams::default())
//!         .unwrap();
//! let x = Mat::from_fn(network.num_edges(), 2, |i, j| (i + j) as f64);
//! let y = tree.multiply(x.as_ref()).unwrap();
//! assert_eq!(y.nrows(), network.num_edges());
//! ```
//!
//! # References
//!
//! 1. Barnes, J., & Hut, P. (1986).
//!    *A hierarchical O(N log N) force-calculation algorithm.*
//!    *Nature*, **324**, 446–449.
//!
//! 2. Hackbusch, W. (1999).
//!    *A sparse matrix arithmetic based on H-matrices. Part I: Introduction to H-matrices.*
//!    *Computing*, **62**, 89–108.
//!
//! 3. Yu, C., Schumacher, H., & Crane, K. (2021).
//!    *Repulsive Curves.*
//!    *ACM Transactions on Graphics*, **40**(2).

mod aca;
mod barnes_hut;
mod block_cluster_tree;
mod bvh;
mod config;
mod curve_network;
mod error;
mod geometry;
mod kernels;
mod metric;
mod traits;

pub mod api;
pub mod progress;
pub mod test_curves;

#[doc(inline)]
pub use {
    barnes_hut::{BarnesHut, exact_energy, exact_gradient},
    block_cluster_tree::{
        BlockClusterTree, ClusterPair, PairKind, clusters_admissible, covered_pair_count,
        partition_cluster_pairs,
    },
    bvh::{Bvh, BvhNode},
    config::{
        BarnesHutParams, BarnesHutParamsBuilder, BlockClusterParams, BlockCompression,
        DEFAULT_LEAF_CAPACITY, DEFAULT_SEPARATION_FACTOR, DegeneracyPolicy, TpeParams,
    },
    curve_network::{CurveEdge, CurveNetwork, CurveVertex, PinFlags},
    error::{Result, TpeError},
    geometry::{Aabb, Vec3},
    kernels::{FractionalSobolevKernel, KernelDerivatives, TangentPointKernel},
    metric::{assemble_dense_metric, assemble_sobolev_metric},
    traits::{ElementSample, MetricKernel},
};
