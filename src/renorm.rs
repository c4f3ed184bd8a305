//! Projection of trial states back onto the constraint manifold
//!
//! A micromagnetic state stores one vector per grid node. The physical
//! constraint is a fixed norm per node, so every point the line search
//! proposes is renormalized before the energy is evaluated.

use crate::common::*;

/// Projects a state onto the constraint manifold in place.
///
/// Implementations must be idempotent: renormalizing an already renormalized
/// state leaves it unchanged up to rounding.
pub trait Renormalize {
    /// Project `x` in place.
    fn renormalize(&mut self, x: &mut [f64]);

    /// Check that a state of length `n` can be handled.
    fn validate(&self, _n: usize) -> Result<()> {
        Ok(())
    }
}

impl<F> Renormalize for F
where
    F: FnMut(&mut [f64]),
{
    fn renormalize(&mut self, x: &mut [f64]) {
        self(x)
    }
}

/// Scales every node vector of `dim` components to unit length.
///
/// Nodes with a vanishing vector are left untouched since they have no
/// direction to keep.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnitNorm {
    dim: usize,
}

impl UnitNorm {
    /// Create a projector for nodes of `dim` components.
    ///
    /// A zero `dim` is rejected by `validate` and leaves states untouched.
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Number of components per node.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Default for UnitNorm {
    /// Three-component magnetization vectors.
    fn default() -> Self {
        Self::new(3)
    }
}

impl Renormalize for UnitNorm {
    fn renormalize(&mut self, x: &mut [f64]) {
        if self.dim == 0 {
            return;
        }
        for node in x.chunks_exact_mut(self.dim) {
            let norm = node.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                node.iter_mut().for_each(|v| *v /= norm);
            }
        }
    }

    fn validate(&self, n: usize) -> Result<()> {
        ensure!(self.dim > 0, "node dimension must be positive");
        ensure!(
            n % self.dim == 0,
            "state length {} is not a multiple of the node dimension {}",
            n,
            self.dim
        );
        Ok(())
    }
}
