/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides parametric test curves for validating energies, gradients and metric products.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Closed and open polygonal test curves.
//!
//! All constructors are deterministic; the random shapes take an explicit seed.
use std::f64::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{curve_network::CurveNetwork, error::Result, geometry::Vec3};

/// Struct that implements various curve shapes for testing and benchmarking.
pub struct CurveTestShapes;

impl CurveTestShapes {
    /// Regular planar `n`-gon in the `xy` plane with every edge of length
    /// `edge_length`, centered at the origin.
    pub fn regular_polygon(n: usize, edge_length: f64) -> Result<CurveNetwork> {
        let radius = edge_length / (2.0 * (PI / n as f64).sin());
        let positions: Vec<Vec3> = (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                [radius * t.cos(), radius * t.sin(), 0.0]
            })
            .collect();

        CurveNetwork::closed_polyline(&positions)
    }

    /// Regular `n`-gon with every vertex shifted within the plane by up to
    /// `amplitude` along each axis.
    pub fn perturbed_polygon(
        n: usize,
        edge_length: f64,
        amplitude: f64,
        seed: u64,
    ) -> Result<CurveNetwork> {
        let mut rng = StdRng::seed_from_u64(seed);
        let regular = Self::regular_polygon(n, edge_length)?;

        let positions: Vec<Vec3> = regular
            .vertices()
            .iter()
            .map(|v| {
                [
                    v.position[0] + rng.random_range(-amplitude..=amplitude),
                    v.position[1] + rng.random_range(-amplitude..=amplitude),
                    0.0,
                ]
            })
            .collect();

        CurveNetwork::closed_polyline(&positions)
    }

    /// Trefoil knot `(sin t + 2 sin 2t, cos t - 2 cos 2t, -sin 3t)` sampled at
    /// `n` equally spaced parameters.
    pub fn trefoil(n: usize) -> Result<CurveNetwork> {
        let positions: Vec<Vec3> = (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                [
                    t.sin() + 2.0 * (2.0 * t).sin(),
                    t.cos() - 2.0 * (2.0 * t).cos(),
                    -(3.0 * t).sin(),
                ]
            })
            .collect();

        CurveNetwork::closed_polyline(&positions)
    }

    /// Open helix of unit radius with `n` edges, `turns` revolutions and a
    /// rise of `pitch` per revolution.
    pub fn helix(n: usize, turns: f64, pitch: f64) -> Result<CurveNetwork> {
        let positions: Vec<Vec3> = (0..=n)
            .map(|i| {
                let s = turns * i as f64 / n as f64;
                let t = 2.0 * PI * s;
                [t.cos(), t.sin(), pitch * s]
            })
            .collect();

        CurveNetwork::open_polyline(&positions)
    }

    /// Smooth random closed curve from a low-order Fourier series with
    /// seeded random coefficients.
    pub fn random_closed_curve(n: usize, seed: u64) -> Result<CurveNetwork> {
        const NUM_MODES: usize = 4;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut coefficients = [[[0.0; 2]; 3]; NUM_MODES];
        for (mode, per_axis) in coefficients.iter_mut().enumerate() {
            let decay = 1.0 / (mode + 1) as f64;
            for pair in per_axis.iter_mut() {
                pair[0] = decay * rng.random_range(-1.0..1.0);
                pair[1] = decay * rng.random_range(-1.0..1.0);
            }
        }

        let positions: Vec<Vec3> = (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                let mut p = [t.cos(), t.sin(), 0.0];
                for (mode, per_axis) in coefficients.iter().enumerate() {
                    let k = (mode + 1) as f64;
                    for axis in 0..3 {
                        p[axis] += per_axis[axis][0] * (k * t).cos() + per_axis[axis][1] * (k * t).sin();
                    }
                }
                p
            })
            .collect();

        CurveNetwork::closed_polyline(&positions)
    }
}
