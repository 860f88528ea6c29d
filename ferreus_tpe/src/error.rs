/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the error type shared by curve, tree, evaluator and metric operations.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use thiserror::Error;

/// Errors that can occur while building or evaluating curve energies and metrics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TpeError {
    /// The caller supplied malformed input: bad edge indices, mismatched vector
    /// lengths, out-of-range kernel exponents, or an empty network where a
    /// non-empty tree is required.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Two elements are closer than the configured minimum distance, so the
    /// near-field kernel would be ill-conditioned.
    #[error(
        "numerical degeneracy: elements {first} and {second} are {distance:e} apart"
    )]
    NumericalDegeneracy {
        distance: f64,
        first: usize,
        second: usize,
    },
}

impl TpeError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        TpeError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TpeError>;
