//! Limited-memory BFGS relaxation with renormalization
//!
//! Each iteration computes a quasi-Newton direction from the stored history,
//! falls back to steepest descent when that direction does not descend, runs
//! the More-Thuente line search (which renormalizes every trial point), checks
//! convergence and finally admits the new (s, y) pair into the history.

use crate::common::*;
use crate::core::*;
use crate::history::History;
use crate::line::LineSearch;
use crate::math::*;
use crate::renorm::Renormalize;

/// L-BFGS relaxation parameters.
#[derive(Debug, Copy, Clone)]
pub struct Lbfgs {
    /// The number of corrections to approximate the inverse hessian matrix.
    ///
    /// The L-BFGS routine stores the computation results of previous `m`
    /// iterations to approximate the inverse hessian matrix of the current
    /// iteration. This parameter controls the size of the limited memories
    /// (corrections). The default value is 5.
    pub m: usize,

    /// The maximum number of iterations.
    ///
    /// The relaxation terminates without convergence when the iteration count
    /// exceeds this parameter. The default value is 229.
    pub max_iterations: usize,

    /// Convergence tolerance.
    ///
    /// Scales the energy change (`tol`), the displacement (`sqrt(tol)`) and the
    /// gradient (`tol^(1/3)`) thresholds of the convergence test. It is also
    /// the relative energy slack of the approximate Wolfe test. The default
    /// value is 1e-6.
    pub tol: f64,

    /// The quasi-Newton direction q must satisfy -g.q <= -descent_threshold,
    /// otherwise the history is dropped for steepest descent. The default
    /// value is 1e-15.
    pub descent_threshold: f64,

    /// Line search parameters.
    pub linesearch: LineSearch,
}

impl Default for Lbfgs {
    fn default() -> Self {
        Lbfgs {
            m: 5,
            max_iterations: 229,
            tol: 1e-6,
            descent_threshold: 1e-15,
            linesearch: LineSearch::default(),
        }
    }
}

impl Lbfgs {
    /// Set the number of stored corrections.
    pub fn with_history_size(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, niter: usize) -> Self {
        self.max_iterations = niter;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the maximum number of evaluations per line search.
    pub fn with_max_evaluations(mut self, nfev: usize) -> Self {
        self.linesearch.max_evaluations = nfev;
        self
    }

    /// Set the first trial step of every line search.
    pub fn with_initial_step(mut self, stp: f64) -> Self {
        self.linesearch.initial_step = stp;
        self
    }

    /// Replace all line search parameters.
    pub fn with_linesearch(mut self, linesearch: LineSearch) -> Self {
        self.linesearch = linesearch;
        self
    }

    fn validate(&self, n: usize) -> Result<()> {
        ensure!(n > 0, "Invalid number of variables specified.");
        ensure!(self.m > 0, "history size must be positive");
        ensure!(self.max_iterations > 0, "max_iterations must be positive");
        ensure!(self.tol > 0.0, "Invalid parameter tol specified: {}", self.tol);
        ensure!(
            self.descent_threshold >= 0.0,
            "Invalid parameter descent_threshold specified: {}",
            self.descent_threshold
        );
        self.linesearch.validate()
    }

    /// Relax `x` without constraints.
    ///
    /// # Arguments
    ///
    /// * x: the initial field configuration. On output it holds the last
    ///   iterate.
    /// * eval_fn: writes the gradient at x into its second argument and returns
    ///   the energy.
    /// * prgr_fn: called after every iteration; returning true stops the run.
    pub fn minimize<E, G>(self, x: &mut [f64], eval_fn: E, prgr_fn: G) -> Result<Report>
    where
        E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
        G: FnMut(&Progress) -> bool,
    {
        self.validate(x.len())?;
        let prb = Problem::new(x, eval_fn, None);
        Minimizer::new(self, prb)?.run(prgr_fn)
    }

    /// Relax `x` on the manifold defined by `renorm`.
    ///
    /// The starting point and every line search trial are renormalized before
    /// evaluation, so the energy is only evaluated on feasible states.
    pub fn minimize_renormalized<E, R, G>(
        self,
        x: &mut [f64],
        eval_fn: E,
        mut renorm: R,
        prgr_fn: G,
    ) -> Result<Report>
    where
        E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
        R: Renormalize,
        G: FnMut(&Progress) -> bool,
    {
        self.validate(x.len())?;
        renorm.validate(x.len())?;
        let prb = Problem::new(x, eval_fn, Some(&mut renorm));
        Minimizer::new(self, prb)?.run(prgr_fn)
    }
}

/// The gradient is zero to machine precision.
pub fn gradient_vanishes(f: f64, g: &[f64]) -> bool {
    g.vecinfnorm() < f64::EPSILON * (1.0 + f.abs())
}

/// Convergence test after an iteration.
///
/// Converged if the gradient vanishes, or if the energy change, the
/// displacement and the gradient are all small at once:
///
/// - |df| < tol (1 + |f|)
/// - ||dx||_inf < sqrt(tol) (1 + ||x||_inf)
/// - ||g||_inf < tol^(1/3) (1 + |f|)
///
/// `rate` is the accepted line search step and is only reported.
pub fn is_converged(f: f64, df: f64, x: &[f64], dx: &[f64], g: &[f64], rate: f64, tol: f64) -> bool {
    let xnorm = x.vecinfnorm();
    let gnorm = g.vecinfnorm();
    let dxnorm = dx.vecinfnorm();
    let scale = 1.0 + f.abs();

    debug!(
        "f: {:e}, df: {:e} < {:e}, dx: {:e} < {:e}, |g|: {:e} < {:e}, rate: {:e}",
        f,
        df.abs(),
        tol * scale,
        dxnorm,
        tol.sqrt() * (1.0 + xnorm),
        gnorm,
        tol.cbrt() * scale,
        rate
    );

    if gradient_vanishes(f, g) {
        return true;
    }

    df.abs() < tol * scale && dxnorm < tol.sqrt() * (1.0 + xnorm) && gnorm < tol.cbrt() * scale
}

/// State of one relaxation run.
pub(crate) struct Minimizer<'a, E>
where
    E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
{
    param: Lbfgs,
    prb: Problem<'a, E>,
    history: History,
}

impl<'a, E> Minimizer<'a, E>
where
    E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
{
    pub(crate) fn new(param: Lbfgs, prb: Problem<'a, E>) -> Result<Self> {
        let n = prb.x.len();
        Ok(Self {
            history: History::new(n, param.m)?,
            param,
            prb,
        })
    }

    /// Compute the search direction d = -H g into the problem.
    ///
    /// Returns true if the history had to be dropped because H g was not a
    /// descent direction.
    fn update_search_direction(&mut self) -> bool {
        let q = &mut self.prb.d;
        let g = &self.prb.gx;
        q.veccpy(g);
        self.history.apply(q);

        let descent = -g.vecdot(q);
        let reset = descent > -self.param.descent_threshold;
        if reset {
            warn!(
                "Had to fix descent direction (descent = {:e}, |g| = {:e}, |q| = {:e}).",
                descent,
                g.vecinfnorm(),
                q.vecinfnorm()
            );
            q.veccpy(g);
            self.history.clear();
        }
        q.vecscale(-1.0);

        reset
    }

    pub(crate) fn run<G>(mut self, mut prgr_fn: G) -> Result<Report>
    where
        G: FnMut(&Progress) -> bool,
    {
        let tol = self.param.tol;

        // Evaluate the energy and its gradient at a feasible start.
        debug!(
            "relaxing {} variables, m = {}, tol = {:e}, renormalized: {}",
            self.prb.x.len(),
            self.param.m,
            tol,
            self.prb.constrained()
        );
        self.prb.renormalize();
        self.prb.evaluate()?;
        if gradient_vanishes(self.prb.fx, &self.prb.gx) {
            info!("The initial point is already a minimizer.");
            let mut report = Report::new(&self.prb, 0);
            report.converged = true;
            return Ok(report);
        }

        let n = self.prb.gx.len();
        let mut s = vec![0.0; n];
        let mut y = vec![0.0; n];
        let mut nresets = 0;
        let mut nskipped = 0;
        let mut converged = false;
        let mut canceled = false;
        let mut niter = 0;
        while niter < self.param.max_iterations {
            niter += 1;
            let f0 = self.prb.fx;
            self.prb.save_state();

            if self.update_search_direction() {
                nresets += 1;
            }

            let ls = self.param.linesearch.find(&mut self.prb, tol)?;

            self.prb.displacement(&mut s);
            self.prb.gradient_change(&mut y);
            let fx = self.prb.fx;
            converged = is_converged(fx, f0 - fx, self.prb.position(), &s, &self.prb.gx, ls.step, tol);

            if !converged && !self.history.admit(&s, &y) {
                nskipped += 1;
                warn!("Skip history update to avoid a singular hessian approximation!");
            }

            let prgr = Progress::new(&self.prb, niter, ls.nfev, ls.step, ls.termination);
            let cancel = prgr_fn(&prgr);
            if converged {
                info!("Convergence reached after {} iterations.", niter);
                break;
            }
            if cancel {
                info!("The minimization process has been canceled.");
                canceled = true;
                break;
            }
        }

        if !converged && !canceled {
            warn!("L-BFGS not converged after max_iterations ({}) iterations!", niter);
        }

        let mut report = Report::new(&self.prb, niter);
        report.converged = converged;
        report.canceled = canceled;
        report.nresets = nresets;
        report.nskipped = nskipped;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renorm::UnitNorm;
    use approx::assert_relative_eq;

    fn quadratic(x: &[f64], gx: &mut [f64]) -> Result<f64> {
        gx[0] = 2.0 * x[0];
        gx[1] = 8.0 * x[1];
        Ok(x[0] * x[0] + 4.0 * x[1] * x[1])
    }

    #[test]
    fn test_convergence_check() {
        let x = [1.0, 1.0];
        let dx = [1e-5, 0.0];

        // vanishing gradient wins regardless of the other figures
        assert!(is_converged(1.0, 1.0, &x, &[1.0, 1.0], &[0.0, 1e-17], 1.0, 1e-6));

        // all three small at once
        assert!(is_converged(1.0, 1e-7, &x, &dx, &[1e-3, 0.0], 1.0, 1e-6));

        // any one of them too large
        assert!(!is_converged(1.0, 1e-5, &x, &dx, &[1e-3, 0.0], 1.0, 1e-6));
        assert!(!is_converged(1.0, 1e-7, &x, &[3e-3, 0.0], &[1e-3, 0.0], 1.0, 1e-6));
        assert!(!is_converged(1.0, 1e-7, &x, &dx, &[3e-2, 0.0], 1.0, 1e-6));
    }

    #[test]
    fn test_search_direction_descends() {
        let mut x = [1.0, 1.0];
        let prb = Problem::new(&mut x, quadratic, None);
        let mut minimizer = Minimizer::new(Lbfgs::default(), prb).unwrap();
        minimizer.prb.evaluate().unwrap();
        assert!(minimizer.history.admit(&[1.0, 0.0], &[2.0, 0.0]));
        assert!(minimizer.history.admit(&[0.0, 1.0], &[0.0, 8.0]));

        // exact inverse Hessian: d = -A^-1 g = -x
        assert!(!minimizer.update_search_direction());
        assert_relative_eq!(minimizer.prb.d[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(minimizer.prb.d[1], -1.0, epsilon = 1e-12);
        assert_eq!(minimizer.history.len(), 2);
    }

    #[test]
    fn test_corrupted_history_resets() {
        let mut x = [1.0, 1.0];
        let prb = Problem::new(&mut x, quadratic, None);
        let mut minimizer = Minimizer::new(Lbfgs::default(), prb).unwrap();

        // negative curvature pair passes |s.y| test and flips H0k
        assert!(minimizer.history.admit(&[1.0, 0.0], &[-1.0, 0.0]));
        assert_eq!(minimizer.history.h0k(), -1.0);

        minimizer.prb.evaluate().unwrap();
        assert!(minimizer.update_search_direction());
        assert!(minimizer.history.is_empty());
        assert_eq!(minimizer.prb.d, vec![-2.0, -8.0]);
    }

    #[test]
    fn test_corrupted_history_recovers() {
        let mut x = [1.0, 1.0];
        let prb = Problem::new(&mut x, quadratic, None);
        let mut minimizer = Minimizer::new(Lbfgs::default(), prb).unwrap();
        assert!(minimizer.history.admit(&[1.0, 0.0], &[-1.0, 0.0]));

        let report = minimizer.run(|_| false).unwrap();
        assert!(report.converged);
        assert!(report.nresets >= 1);
        assert!(report.fx < 1e-6);
        assert!(x[0].abs() < 1e-3 && x[1].abs() < 1e-3);
    }

    #[test]
    fn test_cancel_between_iterations() {
        let mut x = [1.0, 1.0];
        let mut calls = 0;
        let report = Lbfgs::default()
            .minimize(&mut x, quadratic, |prgr| {
                calls += 1;
                assert_eq!(prgr.niter, calls);
                true
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(report.niter, 1);
        assert!(report.canceled);
        assert!(!report.converged);
    }

    #[test]
    fn test_invalid_parameters() {
        let mut x = [1.0, 1.0];
        assert!(Lbfgs::default().with_history_size(0).minimize(&mut x, quadratic, |_| false).is_err());
        assert!(Lbfgs::default().with_tolerance(0.0).minimize(&mut x, quadratic, |_| false).is_err());
        assert!(Lbfgs::default().with_max_evaluations(0).minimize(&mut x, quadratic, |_| false).is_err());
        assert!(Lbfgs::default().with_initial_step(-1.0).minimize(&mut x, quadratic, |_| false).is_err());
        let mut empty: [f64; 0] = [];
        assert!(Lbfgs::default().minimize(&mut empty, quadratic, |_| false).is_err());
        let zero_dim = Lbfgs::default().minimize_renormalized(&mut x, quadratic, UnitNorm::new(0), |_| false);
        assert!(zero_dim.is_err());
        // nothing was evaluated
        assert_eq!(x, [1.0, 1.0]);
    }
}
