//! core data structures for the relaxation

use crate::common::*;
use crate::line::Termination;
use crate::math::*;
use crate::renorm::Renormalize;

/// Represents a relaxation problem.
///
/// `Problem` holds the field configuration `x`, its gradient `gx` and its
/// energy `fx`, together with the evaluator and the optional renormalizer.
pub struct Problem<'a, E>
where
    E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
{
    /// x is an array of length n. on input it must contain the base point for
    /// the line search.
    pub(crate) x: &'a mut [f64],

    /// `fx` is a variable. It must contain the energy at x.
    pub(crate) fx: f64,

    /// `gx` is an array of length n. It must contain the gradient of the
    /// energy at x.
    pub(crate) gx: Vec<f64>,

    /// Cached position vector of previous step.
    pub(crate) xp: Vec<f64>,

    /// Cached gradient vector of previous step.
    pub(crate) gp: Vec<f64>,

    /// Search direction
    pub(crate) d: Vec<f64>,

    /// Store callback function for evaluating energy and gradient.
    eval_fn: E,

    /// Projection applied to every trial point before evaluation.
    renorm: Option<&'a mut dyn Renormalize>,

    /// Evaluated or not
    evaluated: bool,

    /// The number of evaluation.
    neval: usize,
}

impl<'a, E> Problem<'a, E>
where
    E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
{
    /// Initialize problem with array length n
    pub fn new(x: &'a mut [f64], eval: E, renorm: Option<&'a mut dyn Renormalize>) -> Self {
        let n = x.len();
        Problem {
            fx: 0.0,
            gx: vec![0.0; n],
            xp: vec![0.0; n],
            gp: vec![0.0; n],
            d: vec![0.0; n],
            evaluated: false,
            neval: 0,
            x,
            eval_fn: eval,
            renorm,
        }
    }

    /// Compute the initial gradient in the search direction.
    pub fn dginit(&self) -> f64 {
        let dginit = self.gx.vecdot(&self.d);
        if dginit >= 0.0 {
            warn!(
                "The current search direction increases the energy. dginit = {:-0.4e}",
                dginit
            );
        }

        dginit
    }

    /// Set the search direction to steepest descent.
    pub fn update_search_direction(&mut self) {
        self.d.vecncpy(&self.gx);
    }

    /// Return a reference to current search direction vector
    pub fn search_direction(&self) -> &[f64] {
        &self.d
    }

    /// Return a mutable reference to current search direction vector
    pub fn search_direction_mut(&mut self) -> &mut [f64] {
        &mut self.d
    }

    /// Compute the gradient in the search direction without sign checking.
    pub fn dg_unchecked(&self) -> f64 {
        self.gx.vecdot(&self.d)
    }

    /// Evaluate energy and gradient at the current point.
    pub fn evaluate(&mut self) -> Result<()> {
        self.fx = (self.eval_fn)(&*self.x, &mut self.gx)?;
        self.neval += 1;
        ensure!(
            self.fx.is_finite(),
            "energy evaluation returned a non-finite value ({}) after {} evaluations",
            self.fx,
            self.neval
        );
        self.evaluated = true;

        Ok(())
    }

    /// Project the current point onto the constraint manifold, if any.
    pub fn renormalize(&mut self) {
        if let Some(renorm) = self.renorm.as_mut() {
            renorm.renormalize(&mut *self.x);
        }
    }

    /// Test if a renormalizer is attached.
    pub fn constrained(&self) -> bool {
        self.renorm.is_some()
    }

    /// Return total number of evaluations.
    pub fn number_of_evaluation(&self) -> usize {
        self.neval
    }

    /// Test if `Problem` has been evaluated or not
    pub fn evaluated(&self) -> bool {
        self.evaluated
    }

    /// Current energy.
    pub fn energy(&self) -> f64 {
        self.fx
    }

    /// Current point.
    pub fn position(&self) -> &[f64] {
        &*self.x
    }

    /// Gradient at the current point.
    pub fn gradient(&self) -> &[f64] {
        &self.gx
    }

    /// Take a line step along search direction.
    ///
    /// Compute the current value of x: x <- xp + step * d, then renormalize.
    pub fn take_line_step(&mut self, step: f64) {
        self.x.veccpy(&self.xp);
        self.x.vecadd(&self.d, step);
        self.renormalize();
    }

    /// Return gradient vector norm: ||gx||_inf
    pub fn gnorm(&self) -> f64 {
        self.gx.vecinfnorm()
    }

    /// Return position vector norm: ||x||_inf
    pub fn xnorm(&self) -> f64 {
        self.x.vecinfnorm()
    }

    /// Store the current position and gradient vectors.
    pub fn save_state(&mut self) {
        self.xp.veccpy(&*self.x);
        self.gp.veccpy(&self.gx);
    }

    /// Displacement since the saved state: s = x - xp
    pub fn displacement(&self, s: &mut [f64]) {
        s.vecdiff(&*self.x, &self.xp);
    }

    /// Gradient change since the saved state: y = gx - gp
    pub fn gradient_change(&self, y: &mut [f64]) {
        y.vecdiff(&self.gx, &self.gp);
    }
}

/// Store optimization progress data, for progress monitor
#[derive(Debug, Clone)]
pub struct Progress<'a> {
    /// The current values of variables
    pub x: &'a [f64],

    /// The current gradient values of variables.
    pub gx: &'a [f64],

    /// The current energy.
    pub fx: f64,

    /// The infinity norm of the variables
    pub xnorm: f64,

    /// The infinity norm of the gradients.
    pub gnorm: f64,

    /// The line-search step used for this iteration.
    pub step: f64,

    /// How the line search of this iteration terminated.
    pub termination: Termination,

    /// The iteration count.
    pub niter: usize,

    /// The total number of evaluations.
    pub neval: usize,

    /// The number of function evaluation calls in line search procedure
    pub ncall: usize,
}

impl<'a> Progress<'a> {
    pub(crate) fn new<E>(
        prb: &'a Problem<E>,
        niter: usize,
        ncall: usize,
        step: f64,
        termination: Termination,
    ) -> Self
    where
        E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
    {
        Progress {
            x: &*prb.x,
            gx: &prb.gx,
            fx: prb.fx,
            xnorm: prb.xnorm(),
            gnorm: prb.gnorm(),
            neval: prb.number_of_evaluation(),
            ncall,
            step,
            termination,
            niter,
        }
    }
}

#[derive(Debug, Clone)]
/// Represents the final optimization outcome
pub struct Report {
    /// The final energy.
    pub fx: f64,

    /// The infinity norm of the variables
    pub xnorm: f64,

    /// The infinity norm of the gradients.
    pub gnorm: f64,

    /// The total number of evaluations.
    pub neval: usize,

    /// The number of completed iterations.
    pub niter: usize,

    /// The convergence check succeeded.
    pub converged: bool,

    /// The progress monitor stopped the run.
    pub canceled: bool,

    /// How many times the history was dropped for steepest descent.
    pub nresets: usize,

    /// How many history updates failed the curvature condition.
    pub nskipped: usize,
}

impl Report {
    pub(crate) fn new<E>(prb: &Problem<E>, niter: usize) -> Self
    where
        E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
    {
        Self {
            fx: prb.fx,
            xnorm: prb.xnorm(),
            gnorm: prb.gnorm(),
            neval: prb.number_of_evaluation(),
            niter,
            converged: false,
            canceled: false,
            nresets: 0,
            nskipped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renorm::UnitNorm;

    #[test]
    fn test_line_step_is_renormalized() {
        let mut x = [1.0, 0.0, 0.0];
        let mut unit = UnitNorm::default();
        let mut prb = Problem::new(
            &mut x,
            |x: &[f64], gx: &mut [f64]| {
                gx.copy_from_slice(&[0.0, 0.0, -1.0]);
                Ok(-x[2])
            },
            Some(&mut unit),
        );
        assert!(prb.constrained());
        assert!(!prb.evaluated());
        prb.evaluate().unwrap();
        assert!(prb.evaluated());
        prb.save_state();
        prb.update_search_direction();
        assert_eq!(prb.search_direction(), &[0.0, 0.0, 1.0]);

        prb.take_line_step(1.0);
        let r = 0.5f64.sqrt();
        assert!((prb.position()[0] - r).abs() < 1e-15);
        assert!((prb.position()[2] - r).abs() < 1e-15);

        let mut s = [0.0; 3];
        prb.displacement(&mut s);
        assert!((s[0] - (r - 1.0)).abs() < 1e-15);
        assert_eq!(prb.number_of_evaluation(), 1);
    }
}
