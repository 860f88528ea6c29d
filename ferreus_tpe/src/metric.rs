/////////////////////////////////////////////////////////////////////////////////////////////
//
// Applies the block-structured fractional Sobolev metric to vectors and assembles the dense
// reference matrix.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::{Mat, MatRef};
use rayon::prelude::*;
use tracing::trace;

use crate::{
    block_cluster_tree::{BlockClusterTree, BlockData, ClusterPair},
    config::{DegeneracyPolicy, TpeParams},
    curve_network::CurveNetwork,
    error::{Result, TpeError},
    geometry,
    traits::{ElementSample, MetricKernel},
};

/// Contribution of one block to the tree-ordered output rows.
struct BlockProduct {
    row_start: usize,
    row_product: Mat<f64>,
    col_start: usize,
    col_product: Option<Mat<f64>>,
}

impl BlockClusterTree<'_> {
    /// Applies the metric `A = diag(W 1) - W` to every column of `x`.
    ///
    /// `W` is the length-weighted metric kernel between distinct edges. Both
    /// `W 1` and `W x` are evaluated block by block: dense blocks exactly,
    /// admissible blocks through their far-field representation.
    ///
    /// # Errors
    /// [`TpeError::InvalidArgument`] if `x` does not have one row per edge.
    pub fn multiply(&self, x: MatRef<'_, f64>) -> Result<Mat<f64>> {
        let m = self.num_edges();
        if x.nrows() != m {
            return Err(TpeError::invalid(format!(
                "metric input must have {} rows, got {}",
                m,
                x.nrows()
            )));
        }

        let k = x.ncols();
        let order = self.bvh.edge_order();

        // Column 0 carries the ones vector, so that one pass yields W 1 and W x.
        let input = Mat::from_fn(m, k + 1, |p, j| match j {
            0 => 1.0,
            _ => x[(order[p], j - 1)],
        });

        let weighted = self.weighted_adjacency_product(input.as_ref());

        let mut output = Mat::<f64>::zeros(m, k);
        for (p, &edge) in order.iter().enumerate() {
            let degree = weighted[(p, 0)];
            for j in 0..k {
                output[(edge, j)] = degree * x[(edge, j)] - weighted[(p, j + 1)];
            }
        }

        trace!(num_edges = m, num_columns = k, "applied metric operator");
        Ok(output)
    }

    /// Applies the metric to a single vector, overwriting `output`.
    pub fn multiply_vector(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        let m = self.num_edges();
        if input.len() != m || output.len() != m {
            return Err(TpeError::invalid(format!(
                "metric vectors must have length {}, got input {} and output {}",
                m,
                input.len(),
                output.len()
            )));
        }

        let x = Mat::from_fn(m, 1, |i, _| input[i]);
        let y = self.multiply(x.as_ref())?;
        for (i, value) in output.iter_mut().enumerate() {
            *value = y[(i, 0)];
        }
        Ok(())
    }

    /// `W X` for tree-ordered `X`, returned in tree order.
    fn weighted_adjacency_product(&self, input: MatRef<'_, f64>) -> Mat<f64> {
        let cluster_sums = self.cluster_sums(input);

        let products: Vec<BlockProduct> = self
            .pairs
            .par_iter()
            .zip(self.blocks.par_iter())
            .map(|(pair, block)| self.block_product(pair, block, input, &cluster_sums))
            .collect();

        let mut output = Mat::<f64>::zeros(input.nrows(), input.ncols());
        for product in &products {
            accumulate_rows(&mut output, product.row_start, &product.row_product);
            if let Some(col_product) = &product.col_product {
                accumulate_rows(&mut output, product.col_start, col_product);
            }
        }
        output
    }

    /// `S_B = sum_{j in B} l_j x_j` for every node, by an upward pass over the arena.
    fn cluster_sums(&self, input: MatRef<'_, f64>) -> Mat<f64> {
        let order = self.bvh.edge_order();
        let mut sums = Mat::<f64>::zeros(self.bvh.num_nodes(), input.ncols());

        for (index, node) in self.bvh.nodes().iter().enumerate().rev() {
            if node.is_leaf() {
                for p in node.edge_range.clone() {
                    let length = self.network.edge(order[p]).length;
                    for j in 0..input.ncols() {
                        sums[(index, j)] += length * input[(p, j)];
                    }
                }
            } else {
                for &child in &node.children {
                    for j in 0..input.ncols() {
                        sums[(index, j)] += sums[(child, j)];
                    }
                }
            }
        }
        sums
    }

    fn block_product(
        &self,
        pair: &ClusterPair,
        block: &BlockData,
        input: MatRef<'_, f64>,
        cluster_sums: &Mat<f64>,
    ) -> BlockProduct {
        let rows = &self.bvh.node(pair.row_node).edge_range;
        let cols = &self.bvh.node(pair.col_node).edge_range;
        let off_diagonal = pair.row_node != pair.col_node;

        let x_rows = input.subrows(rows.start, rows.len());
        let x_cols = input.subrows(cols.start, cols.len());

        let (row_product, col_product) = match block {
            BlockData::Dense(dense) => (
                dense.as_ref() * x_cols,
                off_diagonal.then(|| dense.as_ref().transpose() * x_rows),
            ),
            BlockData::LowRank { u, v } => {
                let coefficients = v.as_ref().transpose() * x_cols;
                (
                    u.as_ref() * coefficients.as_ref(),
                    off_diagonal.then(|| {
                        let coefficients = u.as_ref().transpose() * x_rows;
                        v.as_ref() * coefficients.as_ref()
                    }),
                )
            }
            BlockData::Aggregate { weight } => {
                let order = self.bvh.edge_order();
                let spread = |range: &std::ops::Range<usize>, node: usize| {
                    Mat::from_fn(range.len(), input.ncols(), |i, j| {
                        self.network.edge(order[range.start + i]).length
                            * weight
                            * cluster_sums[(node, j)]
                    })
                };
                (
                    spread(rows, pair.col_node),
                    off_diagonal.then(|| spread(cols, pair.row_node)),
                )
            }
        };

        BlockProduct {
            row_start: rows.start,
            row_product,
            col_start: cols.start,
            col_product,
        }
    }
}

fn accumulate_rows(output: &mut Mat<f64>, start: usize, product: &Mat<f64>) {
    for i in 0..product.nrows() {
        for j in 0..product.ncols() {
            output[(start + i, j)] += product[(i, j)];
        }
    }
}

/// Brute-force `m x m` metric `A = diag(W 1) - W` with
/// `W_ij = l_i l_j w(i, j)` for `i != j`.
pub fn assemble_dense_metric<K: MetricKernel>(
    network: &CurveNetwork,
    kernel: &K,
    min_distance: f64,
    degeneracy_policy: DegeneracyPolicy,
) -> Result<Mat<f64>> {
    let m = network.num_edges();
    let samples: Vec<ElementSample> = network.edges().iter().map(ElementSample::from_edge).collect();

    let rows = (0..m)
        .into_par_iter()
        .map(|i| -> Result<Vec<f64>> {
            let mut row = vec![0.0; m];
            for j in 0..m {
                if i == j {
                    continue;
                }
                let distance = geometry::distance(&samples[i].position, &samples[j].position);
                degeneracy_policy.check(distance, min_distance, i, j)?;
                row[j] = -kernel.entry(&samples[i], &samples[j]);
            }
            row[i] = -row.iter().sum::<f64>();
            Ok(row)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    Ok(Mat::from_fn(m, m, |i, j| rows[i][j]))
}

/// [`assemble_dense_metric`] with the default fractional Sobolev kernel.
pub fn assemble_sobolev_metric(
    network: &CurveNetwork,
    tpe_params: &TpeParams,
    min_distance: f64,
    degeneracy_policy: DegeneracyPolicy,
) -> Result<Mat<f64>> {
    tpe_params.validate()?;
    let kernel = crate::kernels::FractionalSobolevKernel::new(tpe_params, min_distance);
    assemble_dense_metric(network, &kernel, min_distance, degeneracy_policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BlockClusterParams, BlockCompression},
        test_curves::CurveTestShapes,
    };
    use equator::assert;
    use faer::utils::approx::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn tree_params(separation_factor: f64, compression: BlockCompression) -> BlockClusterParams {
        BlockClusterParams {
            separation_factor,
            leaf_capacity: 1,
            compression,
            ..BlockClusterParams::default()
        }
    }

    fn dense(network: &CurveNetwork) -> Mat<f64> {
        assemble_sobolev_metric(network, &TpeParams::default(), 1e-10, DegeneracyPolicy::Report)
            .unwrap()
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

    /// Columns `A e_j` obtained through `multiply_vector`.
    fn columns_from_basis(tree: &BlockClusterTree) -> Mat<f64> {
        let m = tree.num_edges();
        let mut columns = Mat::zeros(m, m);
        let mut e = vec![0.0; m];
        let mut y = vec![0.0; m];
        for j in 0..m {
            e.iter_mut().for_each(|value| *value = 0.0);
            e[j] = 1.0;
            tree.multiply_vector(&e, &mut y).unwrap();
            for i in 0..m {
                columns[(i, j)] = y[i];
            }
        }
        columns
    }

    #[test]
    fn dense_metric_is_a_laplacian() {
        let network = CurveTestShapes::trefoil(16).unwrap();
        let a = dense(&network);

        for i in 0..16 {
            let row_sum: f64 = (0..16).map(|j| a[(i, j)]).sum();
            assert!(row_sum.abs() < 1e-12 * a[(i, i)]);
            assert!(a[(i, i)] > 0.0);
            for j in 0..16 {
                assert!((a[(i, j)] - a[(j, i)]).abs() < 1e-14 * a[(i, i)]);
            }
        }
    }

    #[test]
    fn basis_vectors_reconstruct_dense_columns() {
        let network = CurveTestShapes::regular_polygon(16, 1.0).unwrap();
        let tree = BlockClusterTree::new(
            &network,
            TpeParams::default(),
            tree_params(1e6, BlockCompression::Aggregate),
        )
        .unwrap();
        assert!(tree.num_admissible() == 0);

        let reference = dense(&network);
        let columns = columns_from_basis(&tree);

        let approx_eq = CwiseMat(ApproxEq::eps() * 128.0 * 16.0);
        assert!(&columns ~ &reference);
    }

    #[test]
    fn aggregate_blocks_approximate_dense_columns() {
        for network in [
            CurveTestShapes::regular_polygon(16, 1.0).unwrap(),
            CurveTestShapes::trefoil(16).unwrap(),
        ] {
            let reference = dense(&network);

            let coarse = BlockClusterTree::new(
                &network,
                TpeParams::default(),
                tree_params(1.0, BlockCompression::Aggregate),
            )
            .unwrap();
            assert!(coarse.num_admissible() > 0);
            assert!(relative_frobenius(&columns_from_basis(&coarse), &reference) < 5e-2);
        }
    }

    #[test]
    fn aggregate_blocks_meet_default_tolerance_on_larger_curves() {
        for network in [
            CurveTestShapes::trefoil(128).unwrap(),
            CurveTestShapes::helix(150, 4.0, 0.5).unwrap(),
            CurveTestShapes::helix(150, 2.0, 1.0).unwrap(),
            CurveTestShapes::random_closed_curve(200, 17).unwrap(),
        ] {
            let tree =
                BlockClusterTree::new(&network, TpeParams::default(), BlockClusterParams::default())
                    .unwrap();
            assert!(tree.num_admissible() > 0);
            assert!(relative_frobenius(&columns_from_basis(&tree), &dense(&network)) < 1e-2);
        }
    }

    #[test]
    fn aca_blocks_approximate_dense_columns() {
        let network = CurveTestShapes::trefoil(64).unwrap();
        let reference = dense(&network);

        let tree = BlockClusterTree::new(
            &network,
            TpeParams::default(),
            tree_params(1.0, BlockCompression::Aca { epsilon: 1e-8 }),
        )
        .unwrap();
        assert!(tree.num_admissible() > 0);
        assert!(relative_frobenius(&columns_from_basis(&tree), &reference) < 1e-5);
    }

    #[test]
    fn multiply_is_linear_and_handles_many_columns() {
        let network = CurveTestShapes::random_closed_curve(80, 4).unwrap();
        let tree =
            BlockClusterTree::new(&network, TpeParams::default(), BlockClusterParams::default())
                .unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let x = Mat::from_fn(80, 3, |_, _| rng.random_range(-1.0..1.0));
        let y = tree.multiply(x.as_ref()).unwrap();

        let combined = Mat::from_fn(80, 1, |i, _| 2.0 * x[(i, 0)] - 0.5 * x[(i, 2)]);
        let y_combined = tree.multiply(combined.as_ref()).unwrap();
        let expected = Mat::from_fn(80, 1, |i, _| 2.0 * y[(i, 0)] - 0.5 * y[(i, 2)]);

        let scale = (0..80).map(|i| y_combined[(i, 0)].abs()).fold(0.0, f64::max);
        for i in 0..80 {
            assert!((y_combined[(i, 0)] - expected[(i, 0)]).abs() < 1e-10 * scale);
        }

        // Each column matches the single-vector product.
        let mut single = vec![0.0; 80];
        let column: Vec<f64> = (0..80).map(|i| x[(i, 1)]).collect();
        tree.multiply_vector(&column, &mut single).unwrap();
        for i in 0..80 {
            assert!((single[i] - y[(i, 1)]).abs() < 1e-10 * scale);
        }
    }

    #[test]
    fn constants_are_in_the_kernel() {
        let network = CurveTestShapes::trefoil(48).unwrap();
        let tree =
            BlockClusterTree::new(&network, TpeParams::default(), BlockClusterParams::default())
                .unwrap();

        let ones = vec![1.0; 48];
        let mut y = vec![f64::NAN; 48];
        tree.multiply_vector(&ones, &mut y).unwrap();

        let e0 = Mat::from_fn(48, 1, |i, _| if i == 0 { 1.0 } else { 0.0 });
        let degree_scale = tree.multiply(e0.as_ref()).unwrap()[(0, 0)];
        for value in y {
            assert!(value.abs() < 1e-10 * degree_scale);
        }
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let network = CurveTestShapes::trefoil(16).unwrap();
        let tree =
            BlockClusterTree::new(&network, TpeParams::default(), BlockClusterParams::default())
                .unwrap();

        let mut output = vec![0.0; 16];
        assert!(matches!(
            tree.multiply_vector(&[1.0; 15], &mut output),
            Err(TpeError::InvalidArgument { .. })
        ));
        let mut short = vec![0.0; 15];
        assert!(tree.multiply_vector(&[1.0; 16], &mut short).is_err());
        assert!(tree.multiply(Mat::<f64>::zeros(17, 2).as_ref()).is_err());
    }

    #[test]
    fn repeated_products_are_identical() {
        let network = CurveTestShapes::helix(60, 3.0, 0.4).unwrap();
        let tree =
            BlockClusterTree::new(&network, TpeParams::default(), BlockClusterParams::default())
                .unwrap();

        let x = Mat::from_fn(60, 2, |i, j| ((i * 7 + j * 3) % 11) as f64 - 5.0);
        let first = tree.multiply(x.as_ref()).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let second = pool.install(|| tree.multiply(x.as_ref()).unwrap());

        assert!(first == second);
    }
}
