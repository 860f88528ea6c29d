/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements Adaptive Cross Approximation (ACA) for compressing far-field metric blocks.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;

/// Adaptive Cross Approximation (ACA) with partial pivoting
///
/// # Arguments
/// * `num_rows` - Number of rows in the target block
/// * `num_columns` - Number of columns in the target block
/// * `entry` - Closure returning the block entry at (row, column)
/// * `epsilon` - Desired accuracy (Frobenius norm relative tolerance)
///
/// # Returns
/// A tuple of low-rank factors `(U, V)` such that A ≈ U * V^T. The rank is
/// zero for a block whose rows are all zero.
pub fn aca_partial_pivoting<F>(
    num_rows: usize,
    num_columns: usize,
    entry: F,
    epsilon: f64,
) -> (Mat<f64>, Mat<f64>)
where
    F: Fn(usize, usize) -> f64,
{
    let mut unused_rows = vec![true; num_rows];
    let mut unused_columns = vec![true; num_columns];

    let max_rank = num_rows.min(num_columns);
    let tolerance = epsilon * epsilon;

    // A ≈ ∑ u_k v_k^T
    let mut u = Mat::<f64>::zeros(num_rows, max_rank);
    let mut v = Mat::<f64>::zeros(num_columns, max_rank);

    // Running estimate of ||A_k||_F^2
    let mut approximation_norm = 0.0;

    let mut i = 0;
    let mut k = 0;

    while k < max_rank {
        unused_rows[i] = false;

        // Residual of row i
        let mut row: Vec<f64> = (0..num_columns)
            .map(|c| entry(i, c) - (0..k).map(|q| u[(i, q)] * v[(c, q)]).sum::<f64>())
            .collect();

        let Some(j) = argmax_masked(&row, &unused_columns) else {
            break;
        };

        // Normalise so that v_k[j] = 1
        let pivot = row[j];
        row.iter_mut().for_each(|value| *value /= pivot);
        unused_columns[j] = false;

        // Residual of column j
        let column: Vec<f64> = (0..num_rows)
            .map(|r| entry(r, j) - (0..k).map(|q| u[(r, q)] * v[(j, q)]).sum::<f64>())
            .collect();

        // 2 * sum_{q<k} <u_q, u_k> <v_q, v_k>
        let cross_terms: f64 = (0..k)
            .map(|q| {
                let uu: f64 = column.iter().enumerate().map(|(r, &x)| u[(r, q)] * x).sum();
                let vv: f64 = row.iter().enumerate().map(|(c, &x)| v[(c, q)] * x).sum();
                uu * vv
            })
            .sum();

        let norm_u_v_2 = column.iter().map(|x| x * x).sum::<f64>() * row.iter().map(|x| x * x).sum::<f64>();
        approximation_norm += norm_u_v_2 + 2.0 * cross_terms;

        for (r, &value) in column.iter().enumerate() {
            u[(r, k)] = value;
        }
        for (c, &value) in row.iter().enumerate() {
            v[(c, k)] = value;
        }
        k += 1;

        // ||u_k|| ||v_k|| <= epsilon ||A_k||_F
        if norm_u_v_2 <= tolerance * approximation_norm {
            break;
        }

        match argmax_masked(&column, &unused_rows) {
            Some(next_row) => i = next_row,
            None => break,
        }
    }

    (u.subcols(0, k).to_owned(), v.subcols(0, k).to_owned())
}

/// Index of the entry of largest magnitude among the unused entries, or
/// `None` if every unused entry is zero.
fn argmax_masked(data: &[f64], unused: &[bool]) -> Option<usize> {
    let mut max_index = None;
    let mut max_value = 0.0;

    for (idx, &value) in data.iter().enumerate() {
        if unused[idx] && value.abs() > max_value {
            max_value = value.abs();
            max_index = Some(idx);
        }
    }

    max_index
}
