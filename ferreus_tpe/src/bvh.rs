/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the bounding volume hierarchy over curve edges used by the Barnes-Hut evaluator
// and the block-cluster tree.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::{cmp::Ordering, ops::Range, sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    curve_network::CurveNetwork,
    error::{Result, TpeError},
    geometry::{self, Aabb, Vec3},
    progress::{self, ProgressMsg, ProgressSink},
    traits::ElementSample,
};

/// A node of a [`Bvh`].
///
/// Nodes live in an arena ordered by pre-order traversal, so `traversal_id`
/// is also the node's index in [`Bvh::nodes`]. Children are referenced by
/// index; there are no parent links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvhNode {
    /// Bounds of all edge endpoints in the subtree.
    pub position_box: Aabb,

    /// Bounds of all edge tangents in the subtree.
    pub tangent_box: Aabb,

    /// Range of the subtree's edges in [`Bvh::edge_order`].
    pub edge_range: Range<usize>,

    /// Child node indices. Exactly two for internal nodes, empty for leaves.
    pub children: Vec<usize>,

    pub total_length: f64,

    /// Length-weighted mean of the edge midpoints.
    pub centroid: Vec3,

    /// Length-weighted mean of the edge tangents. Not renormalised.
    pub average_tangent: Vec3,

    pub traversal_id: usize,
    pub depth: usize,
}

impl BvhNode {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[inline(always)]
    pub fn num_edges(&self) -> usize {
        self.edge_range.len()
    }

    #[inline(always)]
    pub fn center(&self) -> Vec3 {
        self.position_box.center()
    }

    /// Radius used by the admissibility tests.
    ///
    /// The diagonal of the position box, widened by the spread of the
    /// subtree's tangents: `diag * (3 + tangent_diag)`. A straight run of
    /// edges has `tangent_diag = 0`; a cluster that turns through a half
    /// circle or more has `tangent_diag >= 2`.
    #[inline(always)]
    pub fn radius(&self) -> f64 {
        self.position_box.diagonal() * (3.0 + self.tangent_box.diagonal())
    }

    /// The cluster viewed as a single element located at its centroid.
    #[inline(always)]
    pub fn sample(&self) -> ElementSample {
        ElementSample {
            position: self.centroid,
            tangent: self.average_tangent,
            length: self.total_length,
        }
    }
}

/// Bounding volume hierarchy over the edges of a [`CurveNetwork`].
///
/// Built by recursive median splits along the longest axis of each node's
/// position box. The tree is immutable once built and is rebuilt whenever
/// the curve geometry changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    edge_order: Vec<usize>,
    leaf_capacity: usize,
    num_leaves: usize,
    depth: usize,
}

struct BuildNode {
    node: BvhNode,
    children: Vec<BuildNode>,
}

impl Bvh {
    /// Builds a hierarchy with at most `leaf_capacity` edges per leaf.
    ///
    /// # Errors
    /// [`TpeError::InvalidArgument`] if the network has no edges or
    /// `leaf_capacity` is zero.
    pub fn build(network: &CurveNetwork, leaf_capacity: usize) -> Result<Self> {
        Self::build_with_progress(network, leaf_capacity, None)
    }

    pub fn build_with_progress(
        network: &CurveNetwork,
        leaf_capacity: usize,
        progress_callback: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Self> {
        if network.num_edges() == 0 {
            return Err(TpeError::invalid("cannot build a BVH over a network with no edges"));
        }
        if leaf_capacity == 0 {
            return Err(TpeError::invalid("leaf capacity must be at least one edge"));
        }

        let start = Instant::now();

        let mut edge_order: Vec<usize> = (0..network.num_edges()).collect();
        let root = build_recursive(network, &mut edge_order, 0, 0, leaf_capacity);

        let mut nodes = Vec::with_capacity(2 * network.num_edges().div_ceil(leaf_capacity));
        flatten(root, &mut nodes);

        let num_leaves = nodes.iter().filter(|node| node.is_leaf()).count();
        let depth = nodes.iter().map(|node| node.depth).max().unwrap_or(0);
        let elapsed = start.elapsed();

        debug!(
            num_edges = network.num_edges(),
            num_nodes = nodes.len(),
            num_leaves,
            depth,
            ?elapsed,
            "built edge BVH"
        );
        progress::emit(
            &progress_callback,
            ProgressMsg::TreeBuilt {
                num_edges: network.num_edges(),
                num_nodes: nodes.len(),
                num_leaves,
                depth,
                elapsed,
            },
        );

        Ok(Self {
            nodes,
            edge_order,
            leaf_capacity,
            num_leaves,
            depth,
        })
    }

    #[inline(always)]
    pub fn root(&self) -> &BvhNode {
        &self.nodes[0]
    }

    #[inline(always)]
    pub fn node(&self, index: usize) -> &BvhNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Depth of the deepest leaf, `0` for a single-leaf tree.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn num_edges(&self) -> usize {
        self.edge_order.len()
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    /// Edge indices in tree order. Every node covers a contiguous range.
    pub fn edge_order(&self) -> &[usize] {
        &self.edge_order
    }

    /// Edges in the subtree of node `index`.
    #[inline(always)]
    pub fn node_edges(&self, index: usize) -> &[usize] {
        &self.edge_order[self.nodes[index].edge_range.clone()]
    }

    pub fn leaves(&self) -> impl Iterator<Item = &BvhNode> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }
}

fn build_recursive(
    network: &CurveNetwork,
    edges: &mut [usize],
    offset: usize,
    depth: usize,
    leaf_capacity: usize,
) -> BuildNode {
    if edges.len() <= leaf_capacity {
        return BuildNode {
            node: leaf_node(network, edges, offset, depth),
            children: Vec::new(),
        };
    }

    let position_box = Aabb::from_points(edges.iter().flat_map(move |&e| {
        let edge = network.edge(e);
        [&network.vertex(edge.prev).position, &network.vertex(edge.next).position]
    }));
    let axis = position_box.longest_axis();

    edges.sort_by(|&a, &b| {
        network.edge(a).midpoint[axis]
            .partial_cmp(&network.edge(b).midpoint[axis])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    let split = edges.len() / 2;
    let (left_edges, right_edges) = edges.split_at_mut(split);

    let (left, right) = rayon::join(
        || build_recursive(network, left_edges, offset, depth + 1, leaf_capacity),
        || build_recursive(network, right_edges, offset + split, depth + 1, leaf_capacity),
    );

    BuildNode {
        node: combine(&left.node, &right.node, depth),
        children: vec![left, right],
    }
}

fn leaf_node(network: &CurveNetwork, edges: &[usize], offset: usize, depth: usize) -> BvhNode {
    let mut position_box = Aabb::empty();
    let mut tangent_box = Aabb::empty();
    let mut total_length = 0.0;
    let mut weighted_midpoint = [0.0; 3];
    let mut weighted_tangent = [0.0; 3];

    for &e in edges {
        let edge = network.edge(e);
        position_box.expand(&network.vertex(edge.prev).position);
        position_box.expand(&network.vertex(edge.next).position);
        tangent_box.expand(&edge.tangent);

        total_length += edge.length;
        weighted_midpoint = geometry::axpy(&weighted_midpoint, edge.length, &edge.midpoint);
        weighted_tangent = geometry::axpy(&weighted_tangent, edge.length, &edge.tangent);
    }

    BvhNode {
        position_box,
        tangent_box,
        edge_range: offset..offset + edges.len(),
        children: Vec::new(),
        total_length,
        centroid: geometry::scale(&weighted_midpoint, 1.0 / total_length),
        average_tangent: geometry::scale(&weighted_tangent, 1.0 / total_length),
        traversal_id: 0,
        depth,
    }
}

fn combine(left: &BvhNode, right: &BvhNode, depth: usize) -> BvhNode {
    let total_length = left.total_length + right.total_length;
    let weighted = |a: &Vec3, b: &Vec3| {
        geometry::scale(
            &geometry::axpy(&geometry::scale(a, left.total_length), right.total_length, b),
            1.0 / total_length,
        )
    };

    BvhNode {
        position_box: left.position_box.union(&right.position_box),
        tangent_box: left.tangent_box.union(&right.tangent_box),
        edge_range: left.edge_range.start..right.edge_range.end,
        children: Vec::new(),
        total_length,
        centroid: weighted(&left.centroid, &right.centroid),
        average_tangent: weighted(&left.average_tangent, &right.average_tangent),
        traversal_id: 0,
        depth,
    }
}

/// Moves a built subtree into the arena in pre-order and returns its index.
fn flatten(build: BuildNode, nodes: &mut Vec<BvhNode>) -> usize {
    let BuildNode { mut node, children } = build;
    let index = nodes.len();
    node.traversal_id = index;
    nodes.push(node);

    let child_indices: Vec<usize> = children
        .into_iter()
        .map(|child| flatten(child, nodes))
        .collect();
    nodes[index].children = child_indices;

    index
}
