//! Energy relaxation of micromagnetic states with a limited-memory BFGS
//! minimizer.
//!
//! The field configuration is a flat buffer (three components per grid node
//! for a magnetization). The caller supplies a closure returning the energy
//! and writing its gradient, and optionally a [`Renormalize`] projection such
//! as [`UnitNorm`] that keeps every node vector at unit length. The minimizer
//! combines the L-BFGS two-loop recursion with a safeguarded More-Thuente line
//! search whose trial points are renormalized before evaluation.
//!
//! # Example
//! ```
//! use magrelax::{lbfgs, UnitNorm};
//!
//! // a single spin in a field along z: E = -m.h
//! let h = [0.0, 0.0, 1.0];
//! let evaluate = |m: &[f64], gx: &mut [f64]| -> anyhow::Result<f64> {
//!     let mh: f64 = m.iter().zip(&h).map(|(a, b)| a * b).sum();
//!     // tangential part of the gradient -h
//!     for i in 0..3 {
//!         gx[i] = -h[i] + mh * m[i];
//!     }
//!     Ok(-mh)
//! };
//!
//! let mut m = [1.0, 0.0, 0.2];
//! let report = lbfgs()
//!     .with_max_iterations(100)
//!     .minimize_renormalized(&mut m, evaluate, UnitNorm::new(3), |_| false)
//!     .expect("relaxation");
//!
//! assert!(report.converged);
//! assert!(m[2] > 0.999);
//! ```

mod common;
mod core;

pub mod history;
pub mod lbfgs;
pub mod line;
pub mod math;
pub mod renorm;

pub use crate::core::{Problem, Progress, Report};
pub use crate::lbfgs::{gradient_vanishes, is_converged, Lbfgs};
pub use crate::line::{LineSearch, Termination};
pub use crate::renorm::{Renormalize, UnitNorm};

/// Create an L-BFGS minimizer with default parameters.
pub fn lbfgs() -> Lbfgs {
    Lbfgs::default()
}
