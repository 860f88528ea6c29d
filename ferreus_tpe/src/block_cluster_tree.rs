/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the block-cluster tree: a hierarchical partition of the edge-by-edge metric matrix
// into admissible (compressed) and inadmissible (dense) blocks.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::{ptr, sync::Arc, time::Instant};

use faer::Mat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    aca::aca_partial_pivoting,
    bvh::{Bvh, BvhNode},
    config::{BlockClusterParams, BlockCompression, TpeParams},
    curve_network::CurveNetwork,
    error::{Result, TpeError},
    geometry,
    kernels::FractionalSobolevKernel,
    progress::{self, ProgressMsg, ProgressSink},
    traits::{ElementSample, MetricKernel},
};

/// Whether a block may be approximated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairKind {
    /// Far field, represented by a compressed block.
    Admissible,

    /// Near field between two leaves, evaluated densely.
    Inadmissible,
}

/// A block of the metric matrix, addressed by a row node and a column node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPair {
    pub row_node: usize,
    pub col_node: usize,
    pub kind: PairKind,
}

/// Two clusters are admissible when they are distinct and their box centers
/// are further apart than `separation_factor` times the larger
/// [`BvhNode::radius`].
#[inline(always)]
pub fn clusters_admissible(
    a: &BvhNode,
    b: &BvhNode,
    same_node: bool,
    separation_factor: f64,
) -> bool {
    !same_node
        && geometry::distance(&a.center(), &b.center())
            > separation_factor * a.radius().max(b.radius())
}

/// Partitions the `rows x cols` index space into cluster pairs.
///
/// When `rows` and `cols` are the same tree, only one of `(A, B)` and
/// `(B, A)` is emitted, so an off-diagonal pair stands for both orientations.
///
/// # Errors
/// [`TpeError::InvalidArgument`] if the trees cover different numbers of edges.
pub fn partition_cluster_pairs(
    rows: &Bvh,
    cols: &Bvh,
    separation_factor: f64,
) -> Result<Vec<ClusterPair>> {
    if rows.num_edges() != cols.num_edges() {
        return Err(TpeError::invalid(format!(
            "row tree covers {} edges but column tree covers {}",
            rows.num_edges(),
            cols.num_edges()
        )));
    }
    if separation_factor.is_nan() || separation_factor < 0.0 {
        return Err(TpeError::invalid(format!(
            "separation factor must be non-negative, got {}",
            separation_factor
        )));
    }

    let symmetric = ptr::eq(rows, cols);
    Ok(partition_recursive(rows, cols, 0, 0, symmetric, separation_factor))
}

fn partition_recursive(
    rows: &Bvh,
    cols: &Bvh,
    row_node: usize,
    col_node: usize,
    symmetric: bool,
    separation_factor: f64,
) -> Vec<ClusterPair> {
    let a = rows.node(row_node);
    let b = cols.node(col_node);
    let same_node = symmetric && row_node == col_node;

    if clusters_admissible(a, b, same_node, separation_factor) {
        return vec![ClusterPair {
            row_node,
            col_node,
            kind: PairKind::Admissible,
        }];
    }

    if a.is_leaf() && b.is_leaf() {
        return vec![ClusterPair {
            row_node,
            col_node,
            kind: PairKind::Inadmissible,
        }];
    }

    let split = |node: &BvhNode, index: usize| match node.is_leaf() {
        true => vec![index],
        false => node.children.clone(),
    };
    let row_children = split(a, row_node);
    let col_children = split(b, col_node);

    let mut child_pairs = Vec::with_capacity(row_children.len() * col_children.len());
    for (i, &r) in row_children.iter().enumerate() {
        for (j, &c) in col_children.iter().enumerate() {
            if same_node && j < i {
                continue;
            }
            child_pairs.push((r, c));
        }
    }

    child_pairs
        .par_iter()
        .map(|&(r, c)| partition_recursive(rows, cols, r, c, symmetric, separation_factor))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Number of ordered edge pairs covered by `pairs`. Equals `m^2` for a
/// complete partition.
pub fn covered_pair_count(rows: &Bvh, cols: &Bvh, pairs: &[ClusterPair]) -> usize {
    let symmetric = ptr::eq(rows, cols);
    pairs
        .iter()
        .map(|pair| {
            let count = rows.node(pair.row_node).num_edges() * cols.node(pair.col_node).num_edges();
            match symmetric && pair.row_node != pair.col_node {
                true => 2 * count,
                false => count,
            }
        })
        .sum()
}

/// Stored representation of one block of the weighted adjacency matrix `W`,
/// with rows and columns in tree order.
#[derive(Debug, Clone)]
pub(crate) enum BlockData {
    /// Exact entries `l_i l_j w(i, j)`, zero on the diagonal.
    Dense(Mat<f64>),

    /// Rank-1 block `l_i l_j w(A, B)` from the cluster aggregates.
    Aggregate { weight: f64 },

    /// Low-rank factors `U V^T` of the exact block.
    LowRank { u: Mat<f64>, v: Mat<f64> },
}

/// Hierarchical representation of the fractional Sobolev metric over the
/// edges of a curve network.
///
/// The tree owns a BVH over the network and borrows the network itself, so
/// it cannot outlive the geometry it was built from. It is read-only once
/// built; see [`BlockClusterTree::multiply`].
#[derive(Debug, Clone)]
pub struct BlockClusterTree<'a> {
    pub(crate) network: &'a CurveNetwork,
    pub(crate) bvh: Bvh,
    pub(crate) tpe_params: TpeParams,
    pub(crate) params: BlockClusterParams,
    pub(crate) pairs: Vec<ClusterPair>,
    pub(crate) blocks: Vec<BlockData>,
    num_admissible: usize,
}

impl<'a> BlockClusterTree<'a> {
    /// Builds a BVH over `network` and partitions the metric matrix against itself.
    ///
    /// # Errors
    /// * [`TpeError::InvalidArgument`] for invalid exponents or parameters, or
    ///   an empty network.
    /// * [`TpeError::NumericalDegeneracy`] if two distinct edges in a dense block
    ///   are closer than `min_distance` under [`crate::DegeneracyPolicy::Report`].
    pub fn new(
        network: &'a CurveNetwork,
        tpe_params: TpeParams,
        params: BlockClusterParams,
    ) -> Result<Self> {
        Self::build_with_progress(network, tpe_params, params, None)
    }

    pub fn build_with_progress(
        network: &'a CurveNetwork,
        tpe_params: TpeParams,
        params: BlockClusterParams,
        progress_callback: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Self> {
        tpe_params.validate()?;
        params.validate()?;

        let bvh = Bvh::build_with_progress(network, params.leaf_capacity, progress_callback.clone())?;

        let start = Instant::now();
        let pairs = partition_cluster_pairs(&bvh, &bvh, params.separation_factor)?;
        let kernel = FractionalSobolevKernel::new(&tpe_params, params.min_distance);

        let blocks = pairs
            .par_iter()
            .map(|pair| build_block(network, &bvh, &kernel, &params, pair))
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let num_admissible = pairs
            .iter()
            .filter(|pair| pair.kind == PairKind::Admissible)
            .count();
        let num_inadmissible = pairs.len() - num_admissible;
        let elapsed = start.elapsed();

        debug!(
            num_edges = network.num_edges(),
            num_admissible,
            num_inadmissible,
            ?elapsed,
            "built block-cluster tree"
        );
        progress::emit(
            &progress_callback,
            ProgressMsg::BlockClusterTreeBuilt {
                num_admissible,
                num_inadmissible,
                elapsed,
            },
        );

        Ok(Self {
            network,
            bvh,
            tpe_params,
            params,
            pairs,
            blocks,
            num_admissible,
        })
    }

    pub fn network(&self) -> &'a CurveNetwork {
        self.network
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    pub fn tpe_params(&self) -> &TpeParams {
        &self.tpe_params
    }

    pub fn params(&self) -> &BlockClusterParams {
        &self.params
    }

    pub fn num_edges(&self) -> usize {
        self.bvh.num_edges()
    }

    pub fn pairs(&self) -> &[ClusterPair] {
        &self.pairs
    }

    pub fn num_admissible(&self) -> usize {
        self.num_admissible
    }

    pub fn num_inadmissible(&self) -> usize {
        self.pairs.len() - self.num_admissible
    }

    /// Always `num_edges^2`.
    pub fn covered_pair_count(&self) -> usize {
        covered_pair_count(&self.bvh, &self.bvh, &self.pairs)
    }
}

fn build_block(
    network: &CurveNetwork,
    bvh: &Bvh,
    kernel: &FractionalSobolevKernel,
    params: &BlockClusterParams,
    pair: &ClusterPair,
) -> Result<BlockData> {
    let row_edges = bvh.node_edges(pair.row_node);
    let col_edges = bvh.node_edges(pair.col_node);
    let sample = |edge: usize| ElementSample::from_edge(network.edge(edge));

    match (pair.kind, params.compression) {
        (PairKind::Inadmissible, _) => {
            let mut block = Mat::zeros(row_edges.len(), col_edges.len());
            for (i, &row) in row_edges.iter().enumerate() {
                let target = sample(row);
                for (j, &col) in col_edges.iter().enumerate() {
                    if row == col {
                        continue;
                    }
                    let source = sample(col);
                    let distance = geometry::distance(&target.position, &source.position);
                    params
                        .degeneracy_policy
                        .check(distance, params.min_distance, row, col)?;
                    block[(i, j)] = kernel.entry(&target, &source);
                }
            }
            Ok(BlockData::Dense(block))
        }
        (PairKind::Admissible, BlockCompression::Aggregate) => Ok(BlockData::Aggregate {
            weight: kernel.weight(
                &bvh.node(pair.row_node).sample(),
                &bvh.node(pair.col_node).sample(),
            ),
        }),
        (PairKind::Admissible, BlockCompression::Aca { epsilon }) => {
            let (u, v) = aca_partial_pivoting(
                row_edges.len(),
                col_edges.len(),
                |i, j| kernel.entry(&sample(row_edges[i]), &sample(col_edges[j])),
                epsilon,
            );
            Ok(BlockData::LowRank { u, v })
        }
    }
}
