// Copyright (c) 1990, Jorge Nocedal
// Copyright (c) 2007-2010 Naoaki Okazaki
// Copyright (c) 2018-2022 Wenping Guo
// All rights reserved.

//! # Find a satisfactory step length along predefined search direction
//!
//! Safeguarded More-Thuente search: the trial steps are produced by cubic
//! and quadratic interpolation inside a shrinking interval of uncertainty,
//! and every trial point is renormalized before it is evaluated.
//!
//! # Example
//! ```
//! use magrelax::line::LineSearch;
//! use magrelax::Problem;
//!
//! // f(x) = x0^2 + 4 x1^2
//! let evaluate = |x: &[f64], gx: &mut [f64]| -> anyhow::Result<f64> {
//!     gx[0] = 2.0 * x[0];
//!     gx[1] = 8.0 * x[1];
//!     Ok(x[0] * x[0] + 4.0 * x[1] * x[1])
//! };
//!
//! let mut x = [1.0, 1.0];
//! let mut prb = Problem::new(&mut x, evaluate, None);
//! prb.evaluate().expect("evaluate");
//! prb.save_state();
//! // steepest descent direction
//! prb.update_search_direction();
//!
//! let ls = LineSearch::default();
//! let outcome = ls.find(&mut prb, 1e-6).expect("line search");
//! assert!(outcome.termination.accepted());
//! assert!(prb.energy() < 5.0);
//! ```

use crate::common::*;
use crate::core::Problem;

/// Parameters of the More-Thuente line search.
#[derive(Debug, Copy, Clone)]
pub struct LineSearch {
    /// A parameter to control the accuracy of the line search routine.
    ///
    /// The default value is 1e-4. This parameter should be greater
    /// than zero and smaller than 0.5.
    pub ftol: f64,

    /// A parameter to control the accuracy of the line search routine.
    ///
    /// The default value is 0.9. If the function and gradient evaluations are
    /// inexpensive with respect to the cost of the iteration it may be
    /// advantageous to set this parameter to a small value. A typical small
    /// value is 0.1. This parameter should be greater than the ftol parameter
    /// and smaller than 1.0.
    pub gtol: f64,

    /// xtol is a nonnegative input variable. termination occurs when the
    /// relative width of the interval of uncertainty is at most xtol.
    pub xtol: f64,

    /// The minimum step of the line search routine.
    ///
    /// The default value is 1e-15. This value need not be modified unless
    /// the problem is extremely badly scaled.
    pub min_step: f64,

    /// The maximum step of the line search.
    ///
    /// The default value is 1e+15.
    pub max_step: f64,

    /// The maximum number of energy and gradient evaluations per line search.
    ///
    /// The default value is 30.
    pub max_evaluations: usize,

    /// Extrapolation factor for the upper end of the search interval while no
    /// minimizer has been bracketed.
    pub xtrapf: f64,

    /// The first trial step.
    pub initial_step: f64,
}

impl Default for LineSearch {
    fn default() -> Self {
        LineSearch {
            ftol: 1e-4,
            gtol: 0.9,
            xtol: 1e-15,
            min_step: 1e-15,
            max_step: 1e15,
            max_evaluations: 30,
            xtrapf: 4.0,
            initial_step: 1.0,
        }
    }
}

/// Why the line search stopped.
///
/// The numbered codes follow the MINPACK convention.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Sufficient decrease and strong curvature conditions hold (code 1).
    StrongWolfe,

    /// The approximate Wolfe conditions hold (code 1).
    ApproximateWolfe,

    /// Relative width of the interval of uncertainty is at most xtol (code 2).
    IntervalTooNarrow,

    /// The evaluation budget is exhausted (code 3).
    MaxEvaluations,

    /// The step is at the lower bound and the conditions fail (code 4).
    MinStep,

    /// The step is at the upper bound and still decreasing (code 5).
    MaxStep,

    /// Rounding errors prevent further progress, or the interpolation became
    /// infeasible (code 6).
    RoundingError,
}

impl Termination {
    /// MINPACK info code.
    pub fn code(&self) -> i32 {
        match self {
            Termination::StrongWolfe | Termination::ApproximateWolfe => 1,
            Termination::IntervalTooNarrow => 2,
            Termination::MaxEvaluations => 3,
            Termination::MinStep => 4,
            Termination::MaxStep => 5,
            Termination::RoundingError => 6,
        }
    }

    /// The returned step satisfies the acceptance conditions.
    pub fn accepted(&self) -> bool {
        self.code() == 1
    }
}

/// Result of one line search. The accepted point, its energy and gradient
/// are left in the `Problem`.
#[derive(Debug, Copy, Clone)]
pub struct LineSearchOutcome {
    /// Accepted step length, forced to 1.0 when the budget ran out.
    pub step: f64,

    /// Number of evaluations spent.
    pub nfev: usize,

    pub termination: Termination,
}

/// Step, function value and directional derivative at one point of the
/// search.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Endpoint {
    pub step: f64,
    pub f: f64,
    pub dg: f64,
}

impl Endpoint {
    pub fn new(step: f64, f: f64, dg: f64) -> Self {
        Self { step, f, dg }
    }

    /// Values of the modified function psi(t) = f(t) - f(0) - t*dgtest, up to
    /// the constant f(0).
    fn shifted(&self, dgtest: f64) -> Self {
        Self {
            step: self.step,
            f: self.f - self.step * dgtest,
            dg: self.dg - dgtest,
        }
    }

    fn unshifted(&self, dgtest: f64) -> Self {
        Self {
            step: self.step,
            f: self.f + self.step * dgtest,
            dg: self.dg + dgtest,
        }
    }
}

/// The interval of uncertainty.
///
/// `x` is the best step obtained so far, `y` the other endpoint. Only lives
/// for one line search.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bracket {
    pub x: Endpoint,
    pub y: Endpoint,
    /// A minimizer lies between `x` and `y`.
    pub brackt: bool,
}

impl Bracket {
    /// Both endpoints start at step zero with the initial values.
    pub fn new(finit: f64, dginit: f64) -> Self {
        let origin = Endpoint::new(0.0, finit, dginit);
        Self {
            x: origin,
            y: origin,
            brackt: false,
        }
    }

    /// Bounds for the next trial step.
    fn bounds(&self, stp: f64, xtrapf: f64) -> (f64, f64) {
        if self.brackt {
            (
                self.x.step.min(self.y.step),
                self.x.step.max(self.y.step),
            )
        } else {
            (self.x.step, stp + xtrapf * (stp - self.x.step))
        }
    }

    fn width(&self) -> f64 {
        (self.y.step - self.x.step).abs()
    }

    fn shifted(&self, dgtest: f64) -> Self {
        Self {
            x: self.x.shifted(dgtest),
            y: self.y.shifted(dgtest),
            brackt: self.brackt,
        }
    }

    fn unshifted(&self, dgtest: f64) -> Self {
        Self {
            x: self.x.unshifted(dgtest),
            y: self.y.unshifted(dgtest),
            brackt: self.brackt,
        }
    }
}

impl LineSearch {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            self.ftol > 0.0 && self.ftol < self.gtol && self.gtol < 1.0,
            "line search requires 0 < ftol < gtol < 1 (ftol = {}, gtol = {})",
            self.ftol,
            self.gtol
        );
        ensure!(
            self.min_step > 0.0 && self.min_step <= self.max_step,
            "invalid step bounds [{}, {}]",
            self.min_step,
            self.max_step
        );
        ensure!(self.xtol >= 0.0, "xtol must be nonnegative");
        ensure!(self.max_evaluations > 0, "max_evaluations must be positive");
        ensure!(self.xtrapf > 1.0, "xtrapf must be larger than 1");
        ensure!(
            self.initial_step > 0.0,
            "A logic error (nonpositive initial step: {}) occurred.",
            self.initial_step
        );

        Ok(())
    }

    /// Search along the direction stored in `prb`, starting from the saved
    /// state `prb.xp` with energy `prb.fx` and gradient `prb.gx`.
    ///
    /// # Arguments
    ///
    /// * prb: on input holds the base point (saved with `save_state`) and the
    ///   search direction. On output it contains x, f and g at the accepted step.
    /// * tol: relative energy tolerance of the approximate Wolfe test.
    ///
    /// # Return
    ///
    /// * the accepted step, the number of evaluations and the termination code.
    ///   A direction that does not descend is an error.
    ///
    pub fn find<E>(&self, prb: &mut Problem<E>, tol: f64) -> Result<LineSearchOutcome>
    where
        E: FnMut(&[f64], &mut [f64]) -> Result<f64>,
    {
        self.validate()?;
        ensure!(prb.evaluated(), "line search started from an unevaluated point");

        let dginit = prb.dginit();
        ensure!(
            dginit < 0.0,
            "Search direction is not a descent direction (dginit = {:e}).",
            dginit
        );

        let finit = prb.fx;
        let dgtest = self.ftol * dginit;
        // f <= ftest2 and dg <= ft * dginit: approximate Wolfe conditions
        let ftest2 = finit + tol * finit.abs();
        let ft = 2.0 * self.ftol - 1.0;

        let mut width = self.max_step - self.min_step;
        let mut prev_width = 2.0 * width;
        let mut bracket = Bracket::new(finit, dginit);
        let mut stage1 = true;
        let mut feasible = true;
        let mut stp = self.initial_step;
        let mut nfev = 0;

        loop {
            // Set the minimum and maximum steps to correspond to the
            // present interval of uncertainty.
            let (stmin, stmax) = bracket.bounds(stp, self.xtrapf);

            // Clip the step in the range of [stpmin, stpmax].
            stp = stp.max(self.min_step).min(self.max_step);

            // If an unusual termination is to occur then let
            // stp be the lowest point obtained so far.
            let brackt = bracket.brackt;
            if (brackt && (stp <= stmin || stp >= stmax))
                || nfev + 1 >= self.max_evaluations
                || !feasible
                || (brackt && stmax - stmin <= self.xtol * stmax)
            {
                stp = bracket.x.step;
            }

            prb.take_line_step(stp);
            prb.evaluate()?;
            nfev += 1;

            let f = prb.fx;
            let dg = prb.dg_unchecked();
            let ftest1 = finit + stp * dgtest;
            trace!("line search trial {}: stp = {:e}, f = {:e}, dg = {:e}", nfev, stp, f, dg);

            // Test for convergence, highest priority first.
            let termination = if f <= ftest1 && dg.abs() <= self.gtol * -dginit {
                Some(Termination::StrongWolfe)
            } else if !stage1 && f <= ftest2 && ft * dginit >= dg && dg.abs() <= self.gtol * -dginit {
                Some(Termination::ApproximateWolfe)
            } else if brackt && stmax - stmin <= self.xtol * stmax {
                Some(Termination::IntervalTooNarrow)
            } else if nfev >= self.max_evaluations {
                Some(Termination::MaxEvaluations)
            } else if stp == self.min_step && (f > ftest1 || dg >= dgtest) {
                Some(Termination::MinStep)
            } else if stp == self.max_step && f <= ftest1 && dg <= dgtest {
                Some(Termination::MaxStep)
            } else if (brackt && (stp <= stmin || stp >= stmax)) || !feasible {
                Some(Termination::RoundingError)
            } else {
                None
            };

            if let Some(termination) = termination {
                if termination == Termination::MaxEvaluations {
                    warn!("The line-search routine reaches the maximum number of evaluations.");
                    stp = 1.0;
                } else if !termination.accepted() {
                    debug!("line search stopped with code {}", termination.code());
                }
                return Ok(LineSearchOutcome {
                    step: stp,
                    nfev,
                    termination,
                });
            }

            // In the first stage we seek a step for which the modified
            // function has a nonpositive value and nonnegative derivative.
            if stage1 && f <= ftest1 && dg >= self.ftol.min(self.gtol) * dginit {
                stage1 = false;
            }

            // A modified function is used to predict the step only if
            // we have not obtained a step for which the modified
            // function has a nonpositive function value and nonnegative
            // derivative, and if a lower function value has been
            // obtained but the decrease is not sufficient.
            let trial = Endpoint::new(stp, f, dg);
            let next = if stage1 && f <= bracket.x.f && f > ftest1 {
                let mut modified = bracket.shifted(dgtest);
                let next = mcstep::update_trial_interval(
                    &mut modified,
                    trial.shifted(dgtest),
                    stmin,
                    stmax,
                )?;
                bracket = modified.unshifted(dgtest);
                next
            } else {
                mcstep::update_trial_interval(&mut bracket, trial, stmin, stmax)?
            };
            stp = next.step;
            feasible = next.feasible;

            // Force a sufficient decrease in the interval of uncertainty.
            if bracket.brackt {
                if bracket.width() >= 0.66 * prev_width {
                    stp = bracket.x.step + 0.5 * (bracket.y.step - bracket.x.step);
                }
                prev_width = width;
                width = bracket.width();
            }
        }
    }
}

/// Represents the MCSTEP subroutine by J. Nocedal, which is a variant
/// of More' and Thuente's routine.
///
/// The purpose of mcstep is to compute a safeguarded step for a linesearch and
/// to update an interval of uncertainty for a minimizer of the function. It is
/// pure: the bracket and the trial values are threaded through explicitly.
///
/// Documentation is adopted from the MINPACK Fortran codes.
pub mod mcstep {
    use super::{Bracket, Endpoint};
    use crate::common::*;

    /// Which of the four MCSTEP cases produced the new step.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum StepCase {
        /// Higher function value. The minimum is bracketed.
        HigherValue,
        /// Lower function value and derivatives of opposite sign. The minimum
        /// is bracketed.
        OppositeSlopes,
        /// Lower function value, same sign, decreasing derivative magnitude.
        DecreasingSlope,
        /// Lower function value, same sign, derivative magnitude does not
        /// decrease.
        SteepSlope,
    }

    impl StepCase {
        /// MINPACK info code of the case.
        pub fn code(&self) -> i32 {
            match self {
                StepCase::HigherValue => 1,
                StepCase::OppositeSlopes => 2,
                StepCase::DecreasingSlope => 3,
                StepCase::SteepSlope => 4,
            }
        }
    }

    /// The new trial step.
    #[derive(Debug, Copy, Clone, PartialEq)]
    pub struct TrialStep {
        pub step: f64,
        pub case: StepCase,
        /// false if the interpolation produced no finite step; `step` is then
        /// the unchanged input trial.
        pub feasible: bool,
    }

    ///
    /// Update a safeguarded trial value and interval for line search.
    ///
    /// If the bracket is set to true, the minimizer has been bracketed in an
    /// interval of uncertainty with endpoints between x and y.
    ///
    /// # Arguments
    ///
    /// * bracket.x: the step, the function, and the derivative at the best step
    ///   obtained so far. The derivative must be negative in the direction of
    ///   the step, that is, dx and t-x must have opposite signs. On output it is
    ///   updated appropriately.
    ///
    /// * bracket.y: the step, the function, and the derivative at the other
    ///   endpoint of the interval of uncertainty. On output it is updated
    ///   appropriately.
    ///
    /// * trial: the step, the function, and the derivative at the current step.
    ///   If bracket is set true then on input t must be between x and y.
    ///
    /// * tmin, tmax: lower and upper bounds for the step.
    ///
    /// * `bracket.brackt`: Specifies if a minimizer has been bracketed. If the
    ///   minimizer is bracketed then on output `brackt` is set true.
    ///
    /// # Return
    /// - the new trial step and the case used. Inconsistent input is an error.
    ///
    pub fn update_trial_interval(
        bracket: &mut Bracket,
        trial: Endpoint,
        tmin: f64,
        tmax: f64,
    ) -> Result<TrialStep> {
        let Endpoint { step: x, f: fx, dg: dx } = bracket.x;
        let Endpoint { step: y, f: fy, dg: dy } = bracket.y;
        let Endpoint { step: t, f: ft, dg: dt } = trial;

        // Check the input parameters for errors.
        if bracket.brackt && (t <= x.min(y) || x.max(y) <= t) {
            // The trival value t is out of the interval.
            bail!("The line-search step went out of the interval of uncertainty.");
        }
        if 0.0 <= dx * (t - x) {
            // The function must decrease from x.
            bail!("The current search direction increases the objective function value.");
        }
        if tmax < tmin {
            bail!("A logic error occurred; alternatively, the interval of uncertainty became too small.");
        }

        // fsigndiff
        let dsign = dt * dx.signum() < 0.0;

        // Trial value selection.
        let (newt, case, bound) = if fx < ft {
            // Case 1: a higher function value.
            // The minimum is brackt. If the cubic minimizer is closer
            // to x than the quadratic one, the cubic one is taken, else
            // the average of the minimizers is taken.
            bracket.brackt = true;
            let mc = cubic_minimizer(x, fx, dx, t, ft, dt);
            let mq = quard_minimizer(x, fx, dx, t, ft);
            let newt = if (mc - x).abs() < (mq - x).abs() {
                mc
            } else {
                mc + 0.5 * (mq - mc)
            };

            (newt, StepCase::HigherValue, true)
        } else if dsign {
            // Case 2: a lower function value and derivatives of
            // opposite sign. The minimum is brackt. If the cubic
            // minimizer is farther from t than the quadratic (secant) one,
            // the cubic one is taken, else the quadratic one is taken.
            bracket.brackt = true;
            let mc = cubic_minimizer(t, ft, dt, x, fx, dx);
            let mq = quard_minimizer2(x, dx, t, dt);
            let newt = if (mc - t).abs() > (mq - t).abs() { mc } else { mq };

            (newt, StepCase::OppositeSlopes, false)
        } else if dt.abs() < dx.abs() {
            // Case 3: a lower function value, derivatives of the
            // same sign, and the magnitude of the derivative decreases.
            // The cubic minimizer is only used if the cubic tends to
            // infinity in the direction of the minimizer or if the minimum
            // of the cubic is beyond t. Otherwise the cubic minimizer is
            // defined to be either tmin or tmax. The quadratic (secant)
            // minimizer is also computed and if the minimum is brackt
            // then the the minimizer closest to t is taken, else the one
            // farthest away is taken.
            let mc = cubic_minimizer2(x, fx, dx, t, ft, dt, tmin, tmax);
            let mq = quard_minimizer2(x, dx, t, dt);
            let newt = if bracket.brackt {
                if (t - mc).abs() < (t - mq).abs() {
                    mc
                } else {
                    mq
                }
            } else if (t - mc).abs() > (t - mq).abs() {
                mc
            } else {
                mq
            };

            (newt, StepCase::DecreasingSlope, true)
        } else {
            // Case 4: a lower function value, derivatives of the
            // same sign, and the magnitude of the derivative does
            // not decrease. If the minimum is not brackt, the step
            // is either tmin or tmax, else the cubic minimizer is taken.
            let newt = if bracket.brackt {
                cubic_minimizer(t, ft, dt, y, fy, dy)
            } else if x < t {
                tmax
            } else {
                tmin
            };

            (newt, StepCase::SteepSlope, false)
        };

        // Update the interval of uncertainty. This update does not
        // depend on the new step or the case analysis above.
        // - Case a: if f(x) < f(t),
        //    x <- x, y <- t.
        // - Case b: if f(t) <= f(x) && f'(t)*f'(x) > 0,
        //   x <- t, y <- y.
        // - Case c: if f(t) <= f(x) && f'(t)*f'(x) < 0,
        //   x <- t, y <- x.
        if fx < ft {
            bracket.y = trial;
        } else {
            if dsign {
                bracket.y = bracket.x;
            }
            bracket.x = trial;
        }

        if !newt.is_finite() {
            debug!("cubic/quadratic interpolation failed in case {}", case.code());
            return Ok(TrialStep {
                step: t,
                case,
                feasible: false,
            });
        }

        // Clip the new trial value in [tmin, tmax].
        let mut newt = newt.min(tmax).max(tmin);

        // Redefine the new trial value if it is close to the upper bound of the
        // interval.
        if bracket.brackt && bound {
            let (x, y) = (bracket.x.step, bracket.y.step);
            let mq = x + 0.66 * (y - x);
            if x < y {
                newt = newt.min(mq);
            } else {
                newt = newt.max(mq);
            }
        }

        Ok(TrialStep {
            step: newt,
            case,
            feasible: true,
        })
    }

    /// gamma = s * sqrt(max(0, (theta/s)^2 - (du/s)*(dv/s))), s = max(|theta|, |du|, |dv|)
    #[inline]
    fn scaled_gamma(theta: f64, du: f64, dv: f64) -> f64 {
        let s = theta.abs().max(du.abs()).max(dv.abs());
        let a = theta / s;
        s * (a * a - du / s * (dv / s)).max(0.0).sqrt()
    }

    /// Find a minimizer of an interpolated cubic function.
    ///
    /// # Arguments
    ///  * `u` : The value of one point, u.
    ///  * `fu`: The value of f(u).
    ///  * `du`: The value of f'(u).
    ///  * `v` : The value of another point, v.
    ///  * `fv`: The value of f(v).
    ///  * `dv`:  The value of f'(v).
    #[inline]
    fn cubic_minimizer(u: f64, fu: f64, du: f64, v: f64, fv: f64, dv: f64) -> f64 {
        let d = v - u;
        let theta = (fu - fv) * 3.0 / d + du + dv;
        let mut gamma = scaled_gamma(theta, du, dv);
        if v < u {
            gamma = -gamma
        }
        let p = gamma - du + theta;
        let q = gamma - du + gamma + dv;
        let r = p / q;
        u + r * d
    }

    /// Find a minimizer of an interpolated cubic function, falling back to
    /// the bounds when the cubic does not turn.
    ///
    /// # Arguments
    ///  * u   :   The value of one point, u.
    ///  * fu  :   The value of f(u).
    ///  * du  :   The value of f'(u).
    ///  * v   :   The value of another point, v.
    ///  * fv  :   The value of f(v).
    ///  * dv  :   The value of f'(v).
    ///  * xmin:   The minimum value.
    ///  * xmax:   The maximum value.
    #[inline]
    #[allow(clippy::too_many_arguments)]
    fn cubic_minimizer2(
        u: f64,
        fu: f64,
        du: f64,
        v: f64,
        fv: f64,
        dv: f64,
        xmin: f64,
        xmax: f64,
    ) -> f64 {
        // STP - STX
        let d = v - u;
        let theta = (fu - fv) * 3.0 / d + du + dv;
        let mut gamma = scaled_gamma(theta, du, dv);
        // STX < STP
        if u < v {
            gamma = -gamma
        }
        let p = gamma - dv + theta;
        let q = gamma - dv + gamma + du;
        let r = p / q;
        if r < 0.0 && gamma != 0.0 {
            v - r * d
        } else if v > u {
            xmax
        } else {
            xmin
        }
    }

    /// Find a minimizer of an interpolated quadratic function.
    ///
    /// # Arguments
    /// * u  : The value of one point, u.
    /// * fu : The value of f(u).
    /// * du : The value of f'(u).
    /// * v  : The value of another point, v.
    /// * fv : The value of f(v).
    #[inline]
    fn quard_minimizer(u: f64, fu: f64, du: f64, v: f64, fv: f64) -> f64 {
        let a = v - u;
        u + du / ((fu - fv) / a + du) / 2.0 * a
    }

    /// Find a minimizer of an interpolated quadratic function.
    ///
    /// # Arguments
    /// * `u`  :    The value of one point, u.
    /// * `du` :    The value of f'(u).
    /// * `v`  :    The value of another point, v.
    /// * `dv` :    The value of f'(v).
    #[inline]
    fn quard_minimizer2(u: f64, du: f64, v: f64, dv: f64) -> f64 {
        let a = u - v;
        v + dv / (dv - du) * a
    }
}
