// Property checks for the step interpolator, the line search, the history
// buffer and the renormalization

use magrelax::history::History;
use magrelax::line::mcstep::{update_trial_interval, StepCase};
use magrelax::line::{Bracket, Endpoint, LineSearch, Termination};
use magrelax::{Problem, Renormalize, UnitNorm};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn prop_trial_step_within_bounds(
        stx in 0.0f64..1.0,
        delta in 1e-3f64..2.0,
        delta_y in 1e-3f64..2.0,
        fx in -10.0f64..10.0,
        dx in -10.0f64..-1e-3,
        fp in -10.0f64..10.0,
        dp in -10.0f64..10.0,
        fy in -10.0f64..10.0,
        dy in -10.0f64..10.0,
        shape in 0u8..3,
    ) {
        let stp = stx + delta;
        let x = Endpoint::new(stx, fx, dx);
        // brackets as the line search builds them: the other endpoint is
        // either higher than x or slopes upward
        let sty = stp + delta_y;
        let (y, tmin, tmax, brackt) = match shape {
            0 => (x, stx, stp + 4.0 * (stp - stx), false),
            1 => (Endpoint::new(sty, fx + fy.abs() + 1e-6, dy), stx, sty, true),
            _ => (Endpoint::new(sty, fy, dy.abs() + 1e-6), stx, sty, true),
        };
        let before = Bracket { x, y, brackt };
        let trial = Endpoint::new(stp, fp, dp);

        let mut bracket = before;
        let next = update_trial_interval(&mut bracket, trial, tmin, tmax).unwrap();

        // pure and deterministic
        let mut again = before;
        let next2 = update_trial_interval(&mut again, trial, tmin, tmax).unwrap();
        prop_assert_eq!(next, next2);
        prop_assert_eq!(bracket, again);

        if next.feasible {
            prop_assert!(tmin <= next.step && next.step <= tmax);
        }

        // a bracketed step stays inside the updated interval
        if bracket.brackt {
            let lo = bracket.x.step.min(bracket.y.step);
            let hi = bracket.x.step.max(bracket.y.step);
            let eps = 1e-12 * (1.0 + hi.abs());
            prop_assert!(
                lo - eps <= next.step && next.step <= hi + eps,
                "step {} outside [{}, {}] in case {:?}",
                next.step,
                lo,
                hi,
                next.case
            );
        }

        // the best point never gets worse, a bracket is never lost
        prop_assert!(bracket.x.f <= before.x.f);
        if before.brackt {
            prop_assert!(bracket.brackt);
        }
        if fp > fx {
            prop_assert_eq!(next.case, StepCase::HigherValue);
            prop_assert!(bracket.brackt);
            prop_assert_eq!(bracket.x, before.x);
            prop_assert_eq!(bracket.y, trial);
        } else {
            prop_assert_eq!(bracket.x, trial);
        }
    }

    #[test]
    fn prop_line_search_respects_budget(
        a in 0.1f64..100.0,
        b in 0.1f64..100.0,
        x0 in -10.0f64..10.0,
        x1 in -10.0f64..10.0,
        maxfev in 1usize..10,
    ) {
        prop_assume!(x0.abs() + x1.abs() > 1e-3);

        let mut calls = 0;
        let mut x = [x0, x1];
        let mut prb = Problem::new(
            &mut x,
            |x: &[f64], gx: &mut [f64]| {
                calls += 1;
                gx[0] = a * x[0];
                gx[1] = b * x[1];
                Ok(0.5 * (a * x[0] * x[0] + b * x[1] * x[1]))
            },
            None,
        );
        prb.evaluate().unwrap();
        prb.save_state();
        prb.update_search_direction();
        let finit = prb.energy();
        let dginit = prb.dginit();

        let ls = LineSearch {
            max_evaluations: maxfev,
            ..LineSearch::default()
        };
        let outcome = ls.find(&mut prb, 1e-6).unwrap();
        let f = prb.energy();
        let dg = prb.dg_unchecked();
        drop(prb);

        prop_assert!(outcome.nfev >= 1 && outcome.nfev <= maxfev);
        prop_assert_eq!(calls, outcome.nfev + 1);
        match outcome.termination {
            Termination::StrongWolfe => {
                prop_assert!(f <= finit + outcome.step * ls.ftol * dginit);
                prop_assert!(dg.abs() <= ls.gtol * -dginit);
            }
            Termination::MaxEvaluations => {
                prop_assert_eq!(outcome.step, 1.0);
                prop_assert!(f <= finit);
            }
            _ => {}
        }
    }

    #[test]
    fn prop_history_keeps_latest(m in 1usize..6, k in 1usize..20) {
        let mut hist = History::new(2, m).unwrap();
        for i in 0..k {
            let v = (i + 1) as f64;
            prop_assert!(hist.admit(&[v, 1.0], &[v, 2.0]));
        }

        let kept: Vec<f64> = hist.iter().map(|(s, _)| s[0]).collect();
        let expected: Vec<f64> = (k.saturating_sub(m)..k).map(|i| (i + 1) as f64).collect();
        prop_assert_eq!(hist.len(), k.min(m));
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn prop_unit_norm_idempotent(x in proptest::collection::vec(-10.0f64..10.0, 3..=30)) {
        let n = x.len() / 3 * 3;
        let mut once = x[..n].to_vec();
        UnitNorm::new(3).renormalize(&mut once);
        let mut twice = once.clone();
        UnitNorm::new(3).renormalize(&mut twice);

        for (a, b) in once.iter().zip(&twice) {
            prop_assert!((a - b).abs() < 1e-15);
        }
        for node in once.chunks(3) {
            let norm = node.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                prop_assert!((norm - 1.0).abs() < 1e-14);
            }
        }
    }
}
