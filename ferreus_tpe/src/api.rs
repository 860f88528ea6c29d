/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides the flat handle-style entry points used by solver and application code.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Flat entry points for solver and application code.
//!
//! Each function takes its inputs explicitly and returns owned values; there
//! is no global state. A [`BlockClusterTree`] borrows the network it was
//! built from and cannot outlive it.

use crate::{
    barnes_hut::BarnesHut,
    block_cluster_tree::BlockClusterTree,
    bvh::Bvh,
    config::{BarnesHutParams, BlockClusterParams, DEFAULT_LEAF_CAPACITY, TpeParams},
    curve_network::CurveNetwork,
    error::{Result, TpeError},
    geometry::Vec3,
};

/// Builds a curve network from vertex positions and `[prev, next]` edge index pairs.
pub fn create_curve_network(positions: &[Vec3], edges: &[[usize; 2]]) -> Result<CurveNetwork> {
    CurveNetwork::new(positions, edges)
}

/// Builds a BVH over all edges of `network` with the default leaf capacity.
pub fn create_bvh_for_energy(network: &CurveNetwork) -> Result<Bvh> {
    Bvh::build(network, DEFAULT_LEAF_CAPACITY)
}

/// Builds the block-cluster tree of the metric for the given separation
/// factor and kernel exponents.
pub fn create_block_cluster_tree(
    network: &CurveNetwork,
    separation_factor: f64,
    alpha: f64,
    beta: f64,
) -> Result<BlockClusterTree<'_>> {
    let tpe_params = TpeParams::new(alpha, beta)?;
    BlockClusterTree::new(
        network,
        tpe_params,
        BlockClusterParams::with_separation_factor(separation_factor),
    )
}

/// Applies the metric to `input`, overwriting `output`. Both must have one
/// entry per edge.
pub fn multiply_metric_with_vector(
    tree: &BlockClusterTree,
    input: &[f64],
    output: &mut [f64],
) -> Result<()> {
    tree.multiply_vector(input, output)
}

/// Barnes-Hut tangent-point energy with the default traversal parameters.
pub fn evaluate_energy(network: &CurveNetwork, bvh: &Bvh, alpha: f64, beta: f64) -> Result<f64> {
    let tpe_params = TpeParams::new(alpha, beta)?;
    BarnesHut::new(network, bvh, tpe_params, BarnesHutParams::default())?.energy()
}

/// Barnes-Hut energy gradient, one row per vertex, overwriting `output`.
///
/// `output` must already hold one entry per vertex.
pub fn evaluate_gradient(
    network: &CurveNetwork,
    bvh: &Bvh,
    output: &mut [Vec3],
    alpha: f64,
    beta: f64,
) -> Result<()> {
    let tpe_params = TpeParams::new(alpha, beta)?;
    if output.len() != network.num_vertices() {
        return Err(TpeError::invalid(format!(
            "gradient output must have {} entries, got {}",
            network.num_vertices(),
            output.len()
        )));
    }

    let gradient = BarnesHut::new(network, bvh, tpe_params, BarnesHutParams::default())?.gradient()?;
    for (vertex, row) in output.iter_mut().enumerate() {
        *row = [gradient[(vertex, 0)], gradient[(vertex, 1)], gradient[(vertex, 2)]];
    }
    Ok(())
}
