//! Limited-memory history of displacement and gradient-change pairs
//!
//! The pairs live in a ring buffer of fixed capacity `m`. Admitting a pair
//! into a full buffer overwrites the oldest one, so no vector is ever shifted.

use crate::common::*;
use crate::math::*;

/// Fixed-capacity ring buffer of (s, y) pairs with the inverse Hessian
/// diagonal estimate `H0k`.
#[derive(Debug, Clone)]
pub struct History {
    /// displacements s = x_{k+1} - x_k
    s: Vec<Vec<f64>>,

    /// gradient changes y = g_{k+1} - g_k
    y: Vec<Vec<f64>>,

    /// rho = 1 / (s . y) of each slot
    rho: Vec<f64>,

    /// two-loop recursion workspace
    alpha: Vec<f64>,

    /// slot receiving the next pair
    end: usize,

    /// number of stored pairs
    len: usize,

    /// scalar estimate of the inverse Hessian diagonal
    h0k: f64,
}

impl History {
    /// Create an empty history for vectors of length `n` holding at most `m`
    /// pairs.
    pub fn new(n: usize, m: usize) -> Result<Self> {
        ensure!(m > 0, "history capacity must be positive");
        Ok(Self {
            s: vec![vec![0.0; n]; m],
            y: vec![vec![0.0; n]; m],
            rho: vec![0.0; m],
            alpha: vec![0.0; m],
            end: 0,
            len: 0,
            h0k: 1.0,
        })
    }

    /// Maximum number of pairs.
    pub fn capacity(&self) -> usize {
        self.rho.len()
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current inverse Hessian diagonal estimate.
    pub fn h0k(&self) -> f64 {
        self.h0k
    }

    /// Test the curvature condition |s.y| > sqrt(eps) ||y|| ||s||.
    pub fn curvature_condition(s: &[f64], y: &[f64]) -> bool {
        s.vecdot(y).abs() > f64::EPSILON.sqrt() * y.vec2norm() * s.vec2norm()
    }

    /// Admit a new pair, evicting the oldest one when full.
    ///
    /// Pairs failing the curvature condition are discarded and `H0k` is left
    /// unchanged. Returns whether the pair was admitted.
    pub fn admit(&mut self, s: &[f64], y: &[f64]) -> bool {
        if !Self::curvature_condition(s, y) {
            return false;
        }

        let ys = y.vecdot(s);
        let yy = y.vecdot(y);
        let m = self.capacity();
        self.s[self.end].veccpy(s);
        self.y[self.end].veccpy(y);
        self.rho[self.end] = ys.recip();
        self.end = (self.end + 1) % m;
        self.len = (self.len + 1).min(m);
        self.h0k = ys / yy;

        true
    }

    /// Forget all pairs. A positive `H0k` is kept as the scaling of the next
    /// directions, a nonpositive one falls back to the identity.
    pub fn clear(&mut self) {
        self.len = 0;
        self.end = 0;
        if self.h0k <= 0.0 {
            self.h0k = 1.0;
        }
    }

    /// Slot index of the i-th oldest stored pair.
    fn slot(&self, i: usize) -> usize {
        let m = self.capacity();
        (self.end + m - self.len + i) % m
    }

    /// Iterate over the stored pairs from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (&[f64], &[f64])> + '_ {
        (0..self.len).map(move |i| {
            let j = self.slot(i);
            (self.s[j].as_slice(), self.y[j].as_slice())
        })
    }

    /// Apply the implicit inverse Hessian approximation to `q` in place
    /// (L-BFGS two-loop recursion).
    pub fn apply(&mut self, q: &mut [f64]) {
        // newest to oldest
        for i in (0..self.len).rev() {
            let j = self.slot(i);
            self.alpha[j] = self.rho[j] * self.s[j].vecdot(q);
            q.vecadd(&self.y[j], -self.alpha[j]);
        }

        q.vecscale(self.h0k);

        // oldest to newest
        for i in 0..self.len {
            let j = self.slot(i);
            let beta = self.rho[j] * self.y[j].vecdot(q);
            q.vecadd(&self.s[j], self.alpha[j] - beta);
        }
    }
}
