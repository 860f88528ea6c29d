/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the tangent-point energy kernel with its derivatives and the fractional
// Sobolev metric kernel.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    config::TpeParams,
    geometry::{self, Vec3},
    traits::{ElementSample, MetricKernel},
};

/// Value of the tangent-point kernel and its partial derivatives with respect
/// to the displacement `d = p - q` and the tangent `T`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelDerivatives {
    pub value: f64,
    pub d_displacement: Vec3,
    pub d_tangent: Vec3,
}

/// Tangent-point kernel
/// `k(p, q, T) = |T x (p - q)|^alpha / |p - q|^(alpha + beta)`.
///
/// Distances are floored at `min_distance`. Below the floor the distance
/// term is constant and contributes nothing to the derivative. Whether such
/// a pair is an error is decided by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentPointKernel {
    alpha: f64,
    beta: f64,
    min_distance: f64,
}

impl TangentPointKernel {
    pub fn new(params: &TpeParams, min_distance: f64) -> Self {
        Self {
            alpha: params.alpha,
            beta: params.beta,
            min_distance,
        }
    }

    pub fn value(&self, p: &Vec3, q: &Vec3, tangent: &Vec3) -> f64 {
        let d = geometry::sub(p, q);
        let r = geometry::norm(&d).max(self.min_distance);
        let s = geometry::norm(&geometry::cross(tangent, &d));

        s.powf(self.alpha) * r.powf(-(self.alpha + self.beta))
    }

    pub fn value_and_derivatives(&self, p: &Vec3, q: &Vec3, tangent: &Vec3) -> KernelDerivatives {
        let d = geometry::sub(p, q);
        let r2 = geometry::norm_squared(&d);
        let raw_r = r2.sqrt();
        let clamped = raw_r < self.min_distance;
        let r = raw_r.max(self.min_distance);

        let s = geometry::norm(&geometry::cross(tangent, &d));
        let inv_r_pow = r.powf(-(self.alpha + self.beta));
        let value = s.powf(self.alpha) * inv_r_pow;

        let t_dot_d = geometry::dot(tangent, &d);
        let t2 = geometry::norm_squared(tangent);

        // d|T x d|^2 / dd = 2 (|T|^2 d - (T.d) T), d|T x d|^2 / dT = 2 (|d|^2 T - (T.d) d)
        let (mut d_displacement, d_tangent) = if s > 0.0 {
            let coefficient = self.alpha * s.powf(self.alpha - 2.0) * inv_r_pow;
            (
                geometry::scale(&geometry::axpy(&geometry::scale(&d, t2), -t_dot_d, tangent), coefficient),
                geometry::scale(&geometry::axpy(&geometry::scale(tangent, r2), -t_dot_d, &d), coefficient),
            )
        } else {
            ([0.0; 3], [0.0; 3])
        };

        if !clamped {
            let radial = -(self.alpha + self.beta) * value / r2;
            d_displacement = geometry::axpy(&d_displacement, radial, &d);
        }

        KernelDerivatives {
            value,
            d_displacement,
            d_tangent,
        }
    }

    /// Energy contribution `l_I l_J k(m_I, m_J, T_I)` of one ordered pair.
    #[inline(always)]
    pub fn pair_energy(&self, query: &ElementSample, other: &ElementSample) -> f64 {
        query.length * other.length * self.value(&query.position, &other.position, &query.tangent)
    }

    /// Derivative of `l_I l_J (k(m_I, m_J, T_I) + k(m_J, m_I, T_J))` with
    /// respect to the `prev` and `next` vertices of the query edge `I`.
    ///
    /// `other` is held constant, so for a cluster this is the first-order
    /// far-field gradient.
    pub fn pair_gradient(&self, query: &ElementSample, other: &ElementSample) -> (Vec3, Vec3) {
        let t = &query.tangent;
        let half_length = 0.5 * query.length;

        let outgoing = self.value_and_derivatives(&query.position, &other.position, t);
        let projected = geometry::reject(&outgoing.d_tangent, t);

        let incoming = self.value_and_derivatives(&other.position, &query.position, &other.tangent);

        let along = outgoing.value + incoming.value;
        let through_midpoint = geometry::axpy(
            &geometry::scale(&outgoing.d_displacement, half_length),
            -half_length,
            &incoming.d_displacement,
        );

        let next = geometry::add(
            &geometry::axpy(&through_midpoint, along, t),
            &projected,
        );
        let prev = geometry::sub(
            &geometry::axpy(&through_midpoint, -along, t),
            &projected,
        );

        (
            geometry::scale(&prev, other.length),
            geometry::scale(&next, other.length),
        )
    }
}

/// Fractional Sobolev metric weight
/// `w = (1 + (|T_I x d|^2 + |T_J x d|^2) / (2 |d|^2)) / |d|^(2 sigma + 1)`
/// with `sigma = (beta - 1) / alpha - 1` and `d = x_I - x_J`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractionalSobolevKernel {
    exponent: f64,
    min_distance: f64,
}

impl FractionalSobolevKernel {
    pub fn new(params: &TpeParams, min_distance: f64) -> Self {
        Self {
            exponent: 2.0 * params.metric_sigma() + 1.0,
            min_distance,
        }
    }
}

impl MetricKernel for FractionalSobolevKernel {
    fn weight(&self, target: &ElementSample, source: &ElementSample) -> f64 {
        let d = geometry::sub(&target.position, &source.position);
        let r2 = geometry::norm_squared(&d);
        let r = r2.sqrt().max(self.min_distance);

        let alignment = match r2 > 0.0 {
            true => {
                0.5 * (geometry::norm_squared(&geometry::cross(&target.tangent, &d))
                    + geometry::norm_squared(&geometry::cross(&source.tangent, &d)))
                    / r2
            }
            false => 0.0,
        };

        (1.0 + alignment) / r.powf(self.exponent)
    }
}
