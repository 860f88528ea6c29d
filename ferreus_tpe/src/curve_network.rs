/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the curve network data model: vertices, edges, adjacency and subdivision.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Result, TpeError},
    geometry::{self, Vec3},
};

/// Constraint flags attached to a vertex. They are carried for the flow
/// solver and do not affect energy or metric evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinFlags {
    /// The vertex position is fixed.
    pub position: bool,

    /// The vertex tangent is fixed.
    pub tangent: bool,

    /// The vertex is constrained to lie on a surface.
    pub on_surface: bool,
}

/// A vertex of a [`CurveNetwork`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveVertex {
    /// Dense global index in `0..num_vertices`.
    pub index: usize,

    pub position: Vec3,

    /// Unit tangent, the normalised sum of the incident edge tangents.
    /// Zero for a vertex without edges.
    pub tangent: Vec3,

    pub pins: PinFlags,
}

/// An edge of a [`CurveNetwork`], oriented from `prev` to `next`.
///
/// Length, midpoint and tangent are derived from the vertex positions and
/// recomputed whenever the positions change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveEdge {
    /// Dense global index in `0..num_edges`.
    pub index: usize,
    pub prev: usize,
    pub next: usize,
    pub length: f64,
    pub midpoint: Vec3,

    /// Unit vector from `prev` to `next`.
    pub tangent: Vec3,
}

impl CurveEdge {
    #[inline(always)]
    pub fn vertices(&self) -> [usize; 2] {
        [self.prev, self.next]
    }

    #[inline(always)]
    pub fn has_vertex(&self, vertex: usize) -> bool {
        self.prev == vertex || self.next == vertex
    }

    /// Whether two edges share at least one vertex.
    #[inline(always)]
    pub fn is_adjacent(&self, other: &CurveEdge) -> bool {
        other.has_vertex(self.prev) || other.has_vertex(self.next)
    }
}

/// A network of polygonal curves: an ordered list of vertices and an
/// ordered list of edges between them.
///
/// Vertex and edge indices are dense and stable for the lifetime of the
/// network. Topological edits such as [`CurveNetwork::subdivide`] return a
/// new network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveNetwork {
    vertices: Vec<CurveVertex>,
    edges: Vec<CurveEdge>,

    /// Incident edge indices for each vertex.
    adjacency: Vec<Vec<usize>>,
}

impl CurveNetwork {
    /// Builds a network from vertex positions and `[prev, next]` index pairs.
    ///
    /// # Errors
    /// * [`TpeError::InvalidArgument`] if a position is not finite or an edge
    ///   references an out-of-range vertex or the same vertex twice.
    /// * [`TpeError::NumericalDegeneracy`] if an edge has zero length.
    pub fn new(positions: &[Vec3], edges: &[[usize; 2]]) -> Result<Self> {
        validate_positions(positions)?;

        let num_vertices = positions.len();
        let mut adjacency = vec![Vec::new(); num_vertices];

        for (edge_index, &[prev, next]) in edges.iter().enumerate() {
            if prev >= num_vertices || next >= num_vertices {
                return Err(TpeError::invalid(format!(
                    "edge {} references vertex ({}, {}) but the network has {} vertices",
                    edge_index, prev, next, num_vertices
                )));
            }
            if prev == next {
                return Err(TpeError::invalid(format!(
                    "edge {} connects vertex {} to itself",
                    edge_index, prev
                )));
            }
            adjacency[prev].push(edge_index);
            adjacency[next].push(edge_index);
        }

        let curve_edges = compute_edges(positions, edges)?;

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(index, position)| CurveVertex {
                index,
                position: *position,
                tangent: [0.0; 3],
                pins: PinFlags::default(),
            })
            .collect();

        let mut network = Self {
            vertices,
            edges: curve_edges,
            adjacency,
        };
        network.update_vertex_tangents();

        Ok(network)
    }

    /// Builds a single closed polygon through `positions` in order.
    pub fn closed_polyline(positions: &[Vec3]) -> Result<Self> {
        let n = positions.len();
        let edges: Vec<[usize; 2]> = (0..n).map(|i| [i, (i + 1) % n]).collect();
        Self::new(positions, &edges)
    }

    /// Builds a single open polyline through `positions` in order.
    pub fn open_polyline(positions: &[Vec3]) -> Result<Self> {
        let edges: Vec<[usize; 2]> = (1..positions.len()).map(|i| [i - 1, i]).collect();
        Self::new(positions, &edges)
    }

    #[inline(always)]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[inline(always)]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[inline(always)]
    pub fn vertex(&self, index: usize) -> &CurveVertex {
        &self.vertices[index]
    }

    #[inline(always)]
    pub fn edge(&self, index: usize) -> &CurveEdge {
        &self.edges[index]
    }

    pub fn vertices(&self) -> &[CurveVertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[CurveEdge] {
        &self.edges
    }

    /// Edges incident to `vertex`.
    pub fn vertex_edges(&self, vertex: usize) -> &[usize] {
        &self.adjacency[vertex]
    }

    /// Whether edges `i` and `j` share a vertex.
    #[inline(always)]
    pub fn edges_adjacent(&self, i: usize, j: usize) -> bool {
        self.edges[i].is_adjacent(&self.edges[j])
    }

    pub fn total_length(&self) -> f64 {
        self.edges.iter().map(|edge| edge.length).sum()
    }

    pub fn average_edge_length(&self) -> f64 {
        match self.edges.is_empty() {
            true => 0.0,
            false => self.total_length() / self.edges.len() as f64,
        }
    }

    /// Vertex positions as an `(n, 3)` matrix.
    pub fn positions(&self) -> Mat<f64> {
        Mat::from_fn(self.vertices.len(), 3, |i, j| self.vertices[i].position[j])
    }

    /// Replaces all vertex positions and recomputes derived edge and vertex data.
    ///
    /// The network is left untouched if the update fails.
    pub fn set_positions(&mut self, positions: &[Vec3]) -> Result<()> {
        if positions.len() != self.vertices.len() {
            return Err(TpeError::invalid(format!(
                "expected {} positions, got {}",
                self.vertices.len(),
                positions.len()
            )));
        }
        validate_positions(positions)?;

        let index_pairs: Vec<[usize; 2]> = self.edges.iter().map(|e| e.vertices()).collect();
        let edges = compute_edges(positions, &index_pairs)?;

        for (vertex, position) in self.vertices.iter_mut().zip(positions) {
            vertex.position = *position;
        }
        self.edges = edges;
        self.update_vertex_tangents();

        Ok(())
    }

    /// Sets the constraint flags of a vertex.
    pub fn pin_vertex(&mut self, vertex: usize, pins: PinFlags) -> Result<()> {
        let num_vertices = self.vertices.len();
        match self.vertices.get_mut(vertex) {
            Some(v) => {
                v.pins = pins;
                Ok(())
            }
            None => Err(TpeError::invalid(format!(
                "vertex {} out of range for a network with {} vertices",
                vertex, num_vertices
            ))),
        }
    }

    /// Pins the position of every endpoint (a vertex with exactly one incident
    /// edge), and its tangent as well when `pin_tangents` is set.
    ///
    /// Other flags are kept. Returns the number of vertices pinned.
    pub fn pin_all_endpoints(&mut self, pin_tangents: bool) -> usize {
        let count = self.update_pins(
            |degree| degree == 1,
            |pins| {
                pins.position = true;
                pins.tangent |= pin_tangents;
            },
        );
        debug!(count, pin_tangents, "pinned endpoint vertices");
        count
    }

    /// Like [`CurveNetwork::pin_all_endpoints`] for every vertex whose degree
    /// is not two: endpoints, junctions and isolated vertices.
    pub fn pin_all_special_vertices(&mut self, pin_tangents: bool) -> usize {
        let count = self.update_pins(
            |degree| degree != 2,
            |pins| {
                pins.position = true;
                pins.tangent |= pin_tangents;
            },
        );
        debug!(count, pin_tangents, "pinned special vertices");
        count
    }

    /// Marks every vertex as constrained to the surface.
    pub fn constrain_all_to_surface(&mut self) -> usize {
        self.update_pins(|_| true, |pins| pins.on_surface = true)
    }

    /// Marks every endpoint as constrained to the surface.
    pub fn constrain_endpoints_to_surface(&mut self) -> usize {
        self.update_pins(|degree| degree == 1, |pins| pins.on_surface = true)
    }

    fn update_pins<S, A>(&mut self, select: S, apply: A) -> usize
    where
        S: Fn(usize) -> bool,
        A: Fn(&mut PinFlags),
    {
        let mut count = 0;
        for (vertex, incident) in self.vertices.iter_mut().zip(&self.adjacency) {
            if select(incident.len()) {
                apply(&mut vertex.pins);
                count += 1;
            }
        }
        count
    }

    /// Splits every edge at its midpoint and returns the refined network.
    ///
    /// Existing vertices keep their indices and pins. The midpoint of edge `e`
    /// becomes vertex `num_vertices + e`, and edge `e` is replaced by edges
    /// `2e` (`prev -> mid`) and `2e + 1` (`mid -> next`).
    pub fn subdivide(&self) -> Result<CurveNetwork> {
        let num_vertices = self.vertices.len();

        let mut positions: Vec<Vec3> = self.vertices.iter().map(|v| v.position).collect();
        positions.extend(self.edges.iter().map(|e| e.midpoint));

        let mut edges = Vec::with_capacity(2 * self.edges.len());
        for edge in &self.edges {
            let mid = num_vertices + edge.index;
            edges.push([edge.prev, mid]);
            edges.push([mid, edge.next]);
        }

        let mut refined = CurveNetwork::new(&positions, &edges)?;
        for vertex in &self.vertices {
            refined.vertices[vertex.index].pins = vertex.pins;
        }

        Ok(refined)
    }

    fn update_vertex_tangents(&mut self) {
        for (vertex, incident) in self.vertices.iter_mut().zip(&self.adjacency) {
            let sum = incident
                .iter()
                .fold([0.0; 3], |acc, &e| geometry::add(&acc, &self.edges[e].tangent));
            let length = geometry::norm(&sum);

            // Opposing tangents cancel at a cusp, fall back to the first edge.
            vertex.tangent = if length > f64::EPSILON {
                geometry::scale(&sum, 1.0 / length)
            } else if let Some(&first) = incident.first() {
                self.edges[first].tangent
            } else {
                [0.0; 3]
            };
        }
    }
}

fn validate_positions(positions: &[Vec3]) -> Result<()> {
    match positions
        .iter()
        .position(|p| p.iter().any(|c| !c.is_finite()))
    {
        Some(index) => Err(TpeError::invalid(format!(
            "vertex {} has a non-finite position {:?}",
            index, positions[index]
        ))),
        None => Ok(()),
    }
}

fn compute_edges(positions: &[Vec3], index_pairs: &[[usize; 2]]) -> Result<Vec<CurveEdge>> {
    index_pairs
        .iter()
        .enumerate()
        .map(|(index, &[prev, next])| {
            let difference = geometry::sub(&positions[next], &positions[prev]);
            let length = geometry::norm(&difference);

            if !(length > 0.0) {
                return Err(TpeError::NumericalDegeneracy {
                    distance: length,
                    first: prev,
                    second: next,
                });
            }

            Ok(CurveEdge {
                index,
                prev,
                next,
                length,
                midpoint: geometry::midpoint(&positions[prev], &positions[next]),
                tangent: geometry::scale(&difference, 1.0 / length),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_curves::CurveTestShapes;

    fn unit_square() -> CurveNetwork {
        CurveNetwork::closed_polyline(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn derived_edge_data() {
        let network = unit_square();
        assert_eq!(network.num_vertices(), 4);
        assert_eq!(network.num_edges(), 4);

        let edge = network.edge(1);
        assert_eq!(edge.vertices(), [1, 2]);
        assert_eq!(edge.length, 1.0);
        assert_eq!(edge.midpoint, [1.0, 0.5, 0.0]);
        assert_eq!(edge.tangent, [0.0, 1.0, 0.0]);
        assert_eq!(network.total_length(), 4.0);
        assert_eq!(network.average_edge_length(), 1.0);
    }

    #[test]
    fn vertex_tangents_average_incident_edges() {
        let network = unit_square();
        let s = 0.5f64.sqrt();
        let t = network.vertex(1).tangent;
        assert!((t[0] - s).abs() < 1e-15 && (t[1] - s).abs() < 1e-15 && t[2] == 0.0);
        assert_eq!(network.vertex_edges(1), &[0, 1]);
    }

    #[test]
    fn adjacency_between_edges() {
        let network = unit_square();
        assert!(network.edges_adjacent(0, 1));
        assert!(network.edges_adjacent(0, 3));
        assert!(!network.edges_adjacent(0, 2));
    }

    #[test]
    fn rejects_invalid_edges() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];

        match CurveNetwork::new(&positions, &[[0, 2]]) {
            Err(TpeError::InvalidArgument { .. }) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        match CurveNetwork::new(&positions, &[[1, 1]]) {
            Err(TpeError::InvalidArgument { .. }) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        match CurveNetwork::new(&[[0.0, f64::NAN, 0.0], [1.0, 0.0, 0.0]], &[[0, 1]]) {
            Err(TpeError::InvalidArgument { .. }) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn zero_length_edge_is_degenerate() {
        let positions = [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        match CurveNetwork::new(&positions, &[[0, 1]]) {
            Err(TpeError::NumericalDegeneracy { first: 0, second: 1, .. }) => {}
            other => panic!("expected NumericalDegeneracy, got {:?}", other),
        }
    }

    #[test]
    fn set_positions_recomputes_and_is_atomic() {
        let mut network = unit_square();
        let scaled: Vec<Vec3> = network
            .vertices()
            .iter()
            .map(|v| geometry::scale(&v.position, 2.0))
            .collect();

        network.set_positions(&scaled).unwrap();
        assert_eq!(network.total_length(), 8.0);
        assert_eq!(network.edge(2).midpoint, [1.0, 2.0, 0.0]);

        let before = network.clone();
        let mut collapsed = scaled.clone();
        collapsed[1] = collapsed[0];
        assert!(network.set_positions(&collapsed).is_err());
        assert_eq!(network, before);

        assert!(network.set_positions(&scaled[..3]).is_err());
    }

    #[test]
    fn subdivision_preserves_shape_and_pins() {
        let mut network = CurveTestShapes::regular_polygon(6, 1.0).unwrap();
        network
            .pin_vertex(2, PinFlags { position: true, ..PinFlags::default() })
            .unwrap();

        let refined = network.subdivide().unwrap();
        assert_eq!(refined.num_vertices(), 12);
        assert_eq!(refined.num_edges(), 12);
        assert!((refined.total_length() - network.total_length()).abs() < 1e-12);
        assert!(refined.vertex(2).pins.position);
        assert_eq!(refined.vertex(6 + 3).position, network.edge(3).midpoint);
        assert_eq!(refined.edge(7).vertices(), [6 + 3, network.edge(3).next]);

        // The source network is untouched.
        assert_eq!(network.num_edges(), 6);
    }

    /// Three arms of two edges each meeting at vertex 0.
    fn junction() -> CurveNetwork {
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 2.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, 2.0],
        ];
        CurveNetwork::new(&positions, &[[0, 1], [1, 2], [0, 3], [3, 4], [0, 5], [5, 6]]).unwrap()
    }

    fn pinned(network: &CurveNetwork) -> Vec<usize> {
        network
            .vertices()
            .iter()
            .filter(|v| v.pins.position)
            .map(|v| v.index)
            .collect()
    }

    #[test]
    fn pin_all_endpoints_of_open_helix() {
        let mut network = CurveTestShapes::helix(30, 2.0, 0.5).unwrap();
        assert_eq!(network.pin_all_endpoints(true), 2);
        assert_eq!(pinned(&network), vec![0, 30]);
        assert!(network.vertex(30).pins.tangent);
        assert!(!network.vertex(15).pins.tangent);

        // Closed curves have no endpoints.
        let mut closed = CurveTestShapes::trefoil(20).unwrap();
        assert_eq!(closed.pin_all_endpoints(true), 0);
        assert_eq!(closed.pin_all_special_vertices(false), 0);
    }

    #[test]
    fn pin_special_vertices_includes_junctions() {
        let mut network = junction();
        assert_eq!(network.pin_all_endpoints(false), 3);
        assert_eq!(pinned(&network), vec![2, 4, 6]);
        assert!(network.vertices().iter().all(|v| !v.pins.tangent));

        let mut network = junction();
        assert_eq!(network.pin_all_special_vertices(true), 4);
        assert_eq!(pinned(&network), vec![0, 2, 4, 6]);
        assert!(network.vertex(0).pins.tangent);
        assert!(!network.vertex(1).pins.position);
    }

    #[test]
    fn surface_constraints_keep_other_pins() {
        let mut network = junction();
        network
            .pin_vertex(1, PinFlags { tangent: true, ..PinFlags::default() })
            .unwrap();

        assert_eq!(network.constrain_endpoints_to_surface(), 3);
        assert!(network.vertex(6).pins.on_surface);
        assert!(!network.vertex(0).pins.on_surface);

        assert_eq!(network.constrain_all_to_surface(), 7);
        assert!(network.vertices().iter().all(|v| v.pins.on_surface));
        assert!(network.vertex(1).pins.tangent);
        assert!(!network.vertex(1).pins.position);
    }

    #[test]
    fn pin_out_of_range() {
        let mut network = unit_square();
        assert!(network.pin_vertex(4, PinFlags::default()).is_err());
    }

    #[test]
    fn positions_matrix_matches_vertices() {
        let network = unit_square();
        let positions = network.positions();
        assert_eq!(positions.nrows(), 4);
        assert_eq!(positions.ncols(), 3);
        assert_eq!(positions[(2, 1)], 1.0);
    }
}
