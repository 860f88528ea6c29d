/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements Barnes-Hut evaluation of the tangent-point energy and its gradient over an
// edge BVH, plus brute-force reference evaluators.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::sync::Arc;

use faer::Mat;
use rayon::prelude::*;
use tracing::trace;

use crate::{
    bvh::{Bvh, BvhNode},
    config::{BarnesHutParams, TpeParams},
    curve_network::CurveNetwork,
    error::{Result, TpeError},
    geometry::{self, Vec3},
    kernels::TangentPointKernel,
    progress::{self, ProgressMsg, ProgressSink},
    traits::ElementSample,
};

/// Accumulated contribution of one query edge.
#[derive(Debug, Clone, Copy, Default)]
struct QueryResult {
    energy: f64,
    prev: Vec3,
    next: Vec3,
    far_field: usize,
    near_field: usize,
}

impl QueryResult {
    #[inline(always)]
    fn accumulate(
        &mut self,
        kernel: &TangentPointKernel,
        query: &ElementSample,
        other: &ElementSample,
        with_gradient: bool,
    ) {
        self.energy += kernel.pair_energy(query, other);
        if with_gradient {
            let (prev, next) = kernel.pair_gradient(query, other);
            self.prev = geometry::add(&self.prev, &prev);
            self.next = geometry::add(&self.next, &next);
        }
    }
}

/// Barnes-Hut evaluator of the tangent-point energy over a [`Bvh`].
///
/// Each edge is a query that walks the tree from the root. A node whose
/// position box contains neither endpoint of the query, and whose box center
/// is further than `separation_factor * radius` from the query midpoint, is
/// replaced by a single element at its centroid. Inadmissible leaves are
/// summed exactly, skipping the query edge and edges adjacent to it. See
/// [`BvhNode::radius`] for how the tangent spread enters the radius.
///
/// At the default parameters the relative Frobenius error of the gradient
/// against [`exact_gradient`] stays below `1e-2` on smooth curves, and the
/// energy error shrinks as the separation factor grows.
///
/// Queries run in parallel. Their results are reduced in edge order, so the
/// output does not depend on the number of threads.
///
/// # Examples
/// ```
/// use ferreus_tpe::{BarnesHut, BarnesHutParams, Bvh, TpeParams, test_curves::CurveTestShapes};
///
/// let network = CurveTestShapes::trefoil(64).unwrap();
/// let bvh = Bvh::build(&network, 4).unwrap();
/// let evaluator =
///     BarnesHut::new(&network, &bvh, TpeParams::default(), BarnesHutParams::default()).unwrap();
///
/// let (energy, gradient) = evaluator.energy_and_gradient().unwrap();
/// assert!(energy > 0.0);
/// assert_eq!(gradient.nrows(), network.num_vertices());
/// ```
#[derive(Debug, Clone)]
pub struct BarnesHut<'a> {
    network: &'a CurveNetwork,
    bvh: &'a Bvh,
    tpe_params: TpeParams,
    params: BarnesHutParams,
    kernel: TangentPointKernel,
    progress_callback: Option<Arc<dyn ProgressSink>>,
}

impl<'a> BarnesHut<'a> {
    /// Validates the parameters and the tree against the network.
    ///
    /// # Errors
    /// [`TpeError::InvalidArgument`] for kernel exponents outside
    /// `beta > alpha > 1`, invalid traversal parameters, or a tree built over
    /// a different number of edges than the network has.
    pub fn new(
        network: &'a CurveNetwork,
        bvh: &'a Bvh,
        tpe_params: TpeParams,
        params: BarnesHutParams,
    ) -> Result<Self> {
        tpe_params.validate()?;
        params.validate()?;

        if bvh.num_edges() == 0 {
            return Err(TpeError::invalid("cannot evaluate against an empty tree"));
        }
        if bvh.num_edges() != network.num_edges() {
            return Err(TpeError::invalid(format!(
                "tree covers {} edges but the network has {}",
                bvh.num_edges(),
                network.num_edges()
            )));
        }

        Ok(Self {
            network,
            bvh,
            tpe_params,
            params,
            kernel: TangentPointKernel::new(&tpe_params, params.min_distance),
            progress_callback: None,
        })
    }

    /// Reports an [`ProgressMsg::EnergyEvaluated`] event after each evaluation.
    pub fn with_progress(mut self, progress_callback: Arc<dyn ProgressSink>) -> Self {
        self.progress_callback = Some(progress_callback);
        self
    }

    pub fn tpe_params(&self) -> &TpeParams {
        &self.tpe_params
    }

    pub fn params(&self) -> &BarnesHutParams {
        &self.params
    }

    pub fn energy(&self) -> Result<f64> {
        let results = self.evaluate(false)?;
        Ok(self.reduce_energy(&results))
    }

    /// Gradient of the energy with respect to every vertex, as an `(n, 3)` matrix.
    pub fn gradient(&self) -> Result<Mat<f64>> {
        let mut gradient = Mat::zeros(self.network.num_vertices(), 3);
        self.gradient_into(&mut gradient)?;
        Ok(gradient)
    }

    /// Writes the gradient into `gradient`, which must already be `(n, 3)`.
    pub fn gradient_into(&self, gradient: &mut Mat<f64>) -> Result<()> {
        check_gradient_shape(self.network, gradient)?;
        let results = self.evaluate(true)?;
        self.reduce_energy(&results);
        scatter_gradient(self.network, &results, gradient);
        Ok(())
    }

    pub fn energy_and_gradient(&self) -> Result<(f64, Mat<f64>)> {
        let results = self.evaluate(true)?;
        let energy = self.reduce_energy(&results);

        let mut gradient = Mat::zeros(self.network.num_vertices(), 3);
        scatter_gradient(self.network, &results, &mut gradient);

        Ok((energy, gradient))
    }

    fn evaluate(&self, with_gradient: bool) -> Result<Vec<QueryResult>> {
        (0..self.network.num_edges())
            .into_par_iter()
            .map(|edge| self.query(edge, with_gradient))
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    fn reduce_energy(&self, results: &[QueryResult]) -> f64 {
        let energy: f64 = results.iter().map(|result| result.energy).sum();
        let far_field_interactions: usize = results.iter().map(|result| result.far_field).sum();
        let near_field_interactions: usize = results.iter().map(|result| result.near_field).sum();

        trace!(
            energy,
            far_field_interactions,
            near_field_interactions,
            "Barnes-Hut evaluation finished"
        );
        progress::emit(
            &self.progress_callback,
            ProgressMsg::EnergyEvaluated {
                energy,
                far_field_interactions,
                near_field_interactions,
            },
        );

        energy
    }

    fn query(&self, index: usize, with_gradient: bool) -> Result<QueryResult> {
        let edge = self.network.edge(index);
        let sample = ElementSample::from_edge(edge);
        let endpoints = [
            &self.network.vertex(edge.prev).position,
            &self.network.vertex(edge.next).position,
        ];

        let mut result = QueryResult::default();
        let mut stack = vec![0usize];

        while let Some(node_index) = stack.pop() {
            let node = self.bvh.node(node_index);

            if self.is_admissible(&sample, &endpoints, node) {
                result.accumulate(&self.kernel, &sample, &node.sample(), with_gradient);
                result.far_field += 1;
                continue;
            }

            if !node.is_leaf() {
                stack.extend(node.children.iter().rev());
                continue;
            }

            for &other in self.bvh.node_edges(node_index) {
                if other == index || self.network.edges_adjacent(index, other) {
                    continue;
                }
                let other_edge = self.network.edge(other);
                let distance = geometry::distance(&sample.position, &other_edge.midpoint);
                self.params.degeneracy_policy.check(
                    distance,
                    self.params.min_distance,
                    index,
                    other,
                )?;

                result.accumulate(
                    &self.kernel,
                    &sample,
                    &ElementSample::from_edge(other_edge),
                    with_gradient,
                );
                result.near_field += 1;
            }
        }

        Ok(result)
    }

    /// A node can stand in for its edges when the query edge does not reach
    /// into its box and the query midpoint is well separated from it.
    #[inline(always)]
    fn is_admissible(&self, query: &ElementSample, endpoints: &[&Vec3; 2], node: &BvhNode) -> bool {
        if endpoints.iter().any(|p| node.position_box.contains_point(p)) {
            return false;
        }

        geometry::distance(&query.position, &node.center())
            > self.params.separation_factor * node.radius()
            && geometry::distance(&query.position, &node.centroid) >= self.params.min_distance
    }
}

/// Brute-force O(m^2) tangent-point energy over all ordered non-adjacent edge pairs.
pub fn exact_energy(
    network: &CurveNetwork,
    tpe_params: &TpeParams,
    params: &BarnesHutParams,
) -> Result<f64> {
    let results = exact_queries(network, tpe_params, params, false)?;
    Ok(results.iter().map(|result| result.energy).sum())
}

/// Brute-force O(m^2) gradient of [`exact_energy`], as an `(n, 3)` matrix.
pub fn exact_gradient(
    network: &CurveNetwork,
    tpe_params: &TpeParams,
    params: &BarnesHutParams,
) -> Result<Mat<f64>> {
    let results = exact_queries(network, tpe_params, params, true)?;
    let mut gradient = Mat::zeros(network.num_vertices(), 3);
    scatter_gradient(network, &results, &mut gradient);
    Ok(gradient)
}

fn exact_queries(
    network: &CurveNetwork,
    tpe_params: &TpeParams,
    params: &BarnesHutParams,
    with_gradient: bool,
) -> Result<Vec<QueryResult>> {
    tpe_params.validate()?;
    params.validate()?;

    let kernel = TangentPointKernel::new(tpe_params, params.min_distance);
    let edges = network.edges();

    (0..edges.len())
        .into_par_iter()
        .map(|index| -> Result<QueryResult> {
            let query = ElementSample::from_edge(&edges[index]);
            let mut result = QueryResult::default();

            for (other, other_edge) in edges.iter().enumerate() {
                if other == index || edges[index].is_adjacent(other_edge) {
                    continue;
                }
                let distance = geometry::distance(&query.position, &other_edge.midpoint);
                params
                    .degeneracy_policy
                    .check(distance, params.min_distance, index, other)?;

                result.accumulate(&kernel, &query, &ElementSample::from_edge(other_edge), with_gradient);
                result.near_field += 1;
            }

            Ok(result)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

fn check_gradient_shape(network: &CurveNetwork, gradient: &Mat<f64>) -> Result<()> {
    if gradient.nrows() != network.num_vertices() || gradient.ncols() != 3 {
        return Err(TpeError::invalid(format!(
            "gradient output must be {} x 3, got {} x {}",
            network.num_vertices(),
            gradient.nrows(),
            gradient.ncols()
        )));
    }
    Ok(())
}

/// Sums per-edge endpoint gradients into per-vertex rows, in edge order.
fn scatter_gradient(network: &CurveNetwork, results: &[QueryResult], gradient: &mut Mat<f64>) {
    gradient.fill(0.0);
    for (edge, result) in network.edges().iter().zip(results) {
        for axis in 0..3 {
            gradient[(edge.prev, axis)] += result.prev[axis];
            gradient[(edge.next, axis)] += result.next[axis];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DegeneracyPolicy,
        progress::closure_sink,
        test_curves::CurveTestShapes,
    };
    use equator::assert;
    use std::sync::Mutex;

    fn params(separation_factor: f64, leaf_capacity: usize) -> BarnesHutParams {
        BarnesHutParams::builder()
            .separation_factor(separation_factor)
            .leaf_capacity(leaf_capacity)
            .build()
    }

    fn barnes_hut_energy(network: &CurveNetwork, params: BarnesHutParams) -> f64 {
        let bvh = Bvh::build(network, params.leaf_capacity).unwrap();
        BarnesHut::new(network, &bvh, TpeParams::default(), params)
            .unwrap()
            .energy()
            .unwrap()
    }

    fn relative_error(approx: f64, exact: f64) -> f64 {
        (approx - exact).abs() / exact.abs()
    }

    fn max_abs_difference(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
        let mut max = 0.0f64;
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                max = max.max((a[(i, j)] - b[(i, j)]).abs());
            }
        }
        max
    }

    fn max_abs(a: &Mat<f64>) -> f64 {
        max_abs_difference(a, &Mat::zeros(a.nrows(), a.ncols()))
    }

    #[test]
    fn single_leaf_equals_exact() {
        let network = CurveTestShapes::random_closed_curve(4, 5).unwrap();
        let params = params(1.0, 4);
        let bvh = Bvh::build(&network, 4).unwrap();
        assert!(bvh.num_nodes() == 1);

        let evaluator = BarnesHut::new(&network, &bvh, TpeParams::default(), params).unwrap();
        let (energy, gradient) = evaluator.energy_and_gradient().unwrap();

        let exact = exact_energy(&network, &TpeParams::default(), &params).unwrap();
        let exact_grad = exact_gradient(&network, &TpeParams::default(), &params).unwrap();

        assert!(energy == exact);
        assert!(max_abs_difference(&gradient, &exact_grad) == 0.0);
    }

    #[test]
    fn octagon_agrees_with_exact() {
        let network = CurveTestShapes::regular_polygon(8, 1.0).unwrap();
        let exact = exact_energy(&network, &TpeParams::default(), &params(1.0, 4)).unwrap();
        let approx = barnes_hut_energy(&network, params(1.0, 4));

        assert!(exact > 0.0);
        assert!(relative_error(approx, exact) < 1e-2);
    }

    #[test]
    fn error_shrinks_as_separation_grows() {
        let factors = [0.5, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0];

        for network in [
            CurveTestShapes::trefoil(64).unwrap(),
            CurveTestShapes::trefoil(200).unwrap(),
            CurveTestShapes::helix(150, 4.0, 0.5).unwrap(),
            CurveTestShapes::helix(150, 2.0, 1.0).unwrap(),
            CurveTestShapes::random_closed_curve(160, 3).unwrap(),
        ] {
            let exact = exact_energy(&network, &TpeParams::default(), &params(1.0, 4)).unwrap();
            let errors: Vec<f64> = factors
                .iter()
                .map(|&factor| relative_error(barnes_hut_energy(&network, params(factor, 4)), exact))
                .collect();

            assert!(errors[0] > 0.0);
            // Differences below 1e-12 are summation order.
            for pair in errors.windows(2) {
                assert!(pair[1] <= pair[0].max(1e-12));
            }

            let far = relative_error(barnes_hut_energy(&network, params(1e6, 4)), exact);
            let infinite = relative_error(barnes_hut_energy(&network, params(f64::INFINITY, 4)), exact);
            assert!(far < 1e-12);
            assert!(infinite < 1e-12);
        }
    }

    #[test]
    fn far_field_is_used_for_large_curves() {
        let network = CurveTestShapes::trefoil(128).unwrap();
        let bvh = Bvh::build(&network, 4).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let (sink, handle) = closure_sink(4, move |msg| events_clone.lock().unwrap().push(msg));

        let energy = BarnesHut::new(&network, &bvh, TpeParams::default(), params(1.0, 4))
            .unwrap()
            .with_progress(Arc::clone(&sink))
            .energy()
            .unwrap();
        drop(sink);
        handle.join().unwrap();

        let events = events.lock().unwrap();
        match events.as_slice() {
            [ProgressMsg::EnergyEvaluated { energy: reported, far_field_interactions, .. }] => {
                assert!(*reported == energy);
                assert!(*far_field_interactions > 0);
            }
            other => panic!("unexpected progress events {:?}", other),
        }
    }

    /// Central differences of the Barnes-Hut energy for the given vertices,
    /// one row per vertex. The tree is rebuilt for every shifted curve.
    fn finite_difference_rows(
        network: &CurveNetwork,
        params: BarnesHutParams,
        vertices: &[usize],
        h: f64,
    ) -> Mat<f64> {
        let base: Vec<Vec3> = network.vertices().iter().map(|v| v.position).collect();
        let mut gradient = Mat::zeros(vertices.len(), 3);

        for (row, &vertex) in vertices.iter().enumerate() {
            for axis in 0..3 {
                let mut shifted = network.clone();
                let mut positions = base.clone();

                positions[vertex][axis] = base[vertex][axis] + h;
                shifted.set_positions(&positions).unwrap();
                let plus = barnes_hut_energy(&shifted, params);

                positions[vertex][axis] = base[vertex][axis] - h;
                shifted.set_positions(&positions).unwrap();
                let minus = barnes_hut_energy(&shifted, params);

                gradient[(row, axis)] = (plus - minus) / (2.0 * h);
            }
        }
        gradient
    }

    fn relative_frobenius(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
        let mut diff = 0.0;
        let mut norm = 0.0;
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                diff += (a[(i, j)] - b[(i, j)]).powi(2);
                norm += b[(i, j)].powi(2);
            }
        }
        (diff / norm).sqrt()
    }

    fn assert_gradient_matches_finite_differences(network: &CurveNetwork) {
        let bvh = Bvh::build(network, 4).unwrap();
        let analytic = BarnesHut::new(network, &bvh, TpeParams::default(), params(f64::INFINITY, 4))
            .unwrap()
            .gradient()
            .unwrap();
        let all: Vec<usize> = (0..network.num_vertices()).collect();
        let numeric = finite_difference_rows(network, params(f64::INFINITY, 4), &all, 1e-5);

        let scale = max_abs(&analytic);
        assert!(scale > 0.0);
        assert!(max_abs_difference(&analytic, &numeric) < 1e-4 * scale);
    }

    #[test]
    fn gradient_matches_finite_differences_planar_polygon() {
        let network = CurveTestShapes::perturbed_polygon(10, 1.0, 0.1, 3).unwrap();
        assert_gradient_matches_finite_differences(&network);
    }

    #[test]
    fn gradient_matches_finite_differences_trefoil() {
        let network = CurveTestShapes::trefoil(24).unwrap();
        assert_gradient_matches_finite_differences(&network);
    }

    #[test]
    fn default_gradient_matches_exact_and_finite_differences() {
        let defaults = BarnesHutParams::default();

        for (network, stride) in [
            (CurveTestShapes::trefoil(128).unwrap(), 8),
            (CurveTestShapes::helix(150, 4.0, 0.5).unwrap(), 10),
        ] {
            let bvh = Bvh::build(&network, defaults.leaf_capacity).unwrap();
            let approx = BarnesHut::new(&network, &bvh, TpeParams::default(), defaults)
                .unwrap()
                .gradient()
                .unwrap();
            let exact = exact_gradient(&network, &TpeParams::default(), &defaults).unwrap();
            assert!(relative_frobenius(&approx, &exact) < 1e-2);

            let vertices: Vec<usize> = (0..network.num_vertices()).step_by(stride).collect();
            let numeric = finite_difference_rows(&network, defaults, &vertices, 1e-5);
            let analytic = Mat::from_fn(vertices.len(), 3, |row, axis| approx[(vertices[row], axis)]);
            assert!(relative_frobenius(&analytic, &numeric) < 1e-2);
        }
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let network = CurveTestShapes::random_closed_curve(200, 17).unwrap();
        let params = params(1.0, 4);

        let run = || {
            let bvh = Bvh::build(&network, 4).unwrap();
            BarnesHut::new(&network, &bvh, TpeParams::default(), params)
                .unwrap()
                .energy_and_gradient()
                .unwrap()
        };

        let (energy, gradient) = run();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let (serial_energy, serial_gradient) = pool.install(run);

        assert!(energy == serial_energy);
        assert!(max_abs_difference(&gradient, &serial_gradient) == 0.0);
    }

    #[test]
    fn gradient_into_overwrites_and_checks_shape() {
        let network = CurveTestShapes::trefoil(32).unwrap();
        let bvh = Bvh::build(&network, 4).unwrap();
        let evaluator =
            BarnesHut::new(&network, &bvh, TpeParams::default(), BarnesHutParams::default()).unwrap();

        let mut output = Mat::from_fn(network.num_vertices(), 3, |_, _| 123.0);
        evaluator.gradient_into(&mut output).unwrap();
        assert!(max_abs_difference(&output, &evaluator.gradient().unwrap()) == 0.0);

        let mut wrong = Mat::zeros(network.num_vertices() + 1, 3);
        assert!(matches!(
            evaluator.gradient_into(&mut wrong),
            Err(TpeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let network = CurveTestShapes::trefoil(32).unwrap();
        let bvh = Bvh::build(&network, 4).unwrap();

        let bad_exponents = TpeParams { alpha: 6.0, beta: 3.0 };
        assert!(matches!(
            BarnesHut::new(&network, &bvh, bad_exponents, BarnesHutParams::default()),
            Err(TpeError::InvalidArgument { .. })
        ));

        let other = CurveTestShapes::trefoil(16).unwrap();
        assert!(matches!(
            BarnesHut::new(&other, &bvh, TpeParams::default(), BarnesHutParams::default()),
            Err(TpeError::InvalidArgument { .. })
        ));
    }

    fn crossing_segments() -> CurveNetwork {
        let positions = [
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        CurveNetwork::new(&positions, &[[0, 1], [2, 3]]).unwrap()
    }

    #[test]
    fn coincident_midpoints_are_reported() {
        let network = crossing_segments();
        let bvh = Bvh::build(&network, 4).unwrap();
        let evaluator =
            BarnesHut::new(&network, &bvh, TpeParams::default(), BarnesHutParams::default()).unwrap();

        match evaluator.energy() {
            Err(TpeError::NumericalDegeneracy { distance, first: 0, second: 1 }) => {
                assert!(distance == 0.0)
            }
            other => panic!("expected NumericalDegeneracy, got {:?}", other),
        }
        assert!(exact_energy(&network, &TpeParams::default(), &BarnesHutParams::default()).is_err());
    }

    #[test]
    fn coincident_midpoints_are_clamped() {
        let network = crossing_segments();
        let bvh = Bvh::build(&network, 4).unwrap();
        let params = BarnesHutParams::builder()
            .degeneracy_policy(DegeneracyPolicy::Clamp)
            .build();
        let evaluator = BarnesHut::new(&network, &bvh, TpeParams::default(), params).unwrap();

        let (energy, gradient) = evaluator.energy_and_gradient().unwrap();
        assert!(energy.is_finite());
        assert!(max_abs(&gradient).is_finite());
    }
}
