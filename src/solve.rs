//! Inverse kinematics: the step that points the laser at a sky direction.
//!
//! The forward model has no closed-form inverse once stretch and tilt are
//! fitted, so the two rotation angles are found numerically with the same
//! restart search the calibration uses.

use std::f64::consts::{PI, TAU};
use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use log::warn;
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calib::{CalibrationModel, default_threshold, sidereal_hours};
use crate::coord::{Equatorial, Step};
use crate::optimize::{NelderMead, Restarts};

/// Restart budget and success threshold for a solve.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    pub max_restarts: usize,
    pub threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self { max_restarts: 50, threshold: default_threshold() }
    }
}

/// Best step found for a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    pub step: Step,
    /// The residual met the threshold. An unconverged step should not be
    /// sent to the device.
    pub converged: bool,
    pub residual: f64,
}

/// Solves steps against a calibration model.
#[derive(Debug, Clone, Default)]
pub struct Solver {
    config: SolverConfig,
    simplex: NelderMead,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config, simplex: NelderMead::default() }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn solve(&self, model: &CalibrationModel, target: &Equatorial, at: DateTime<Utc>) -> Solution {
        self.solve_with_rng(model, target, at, &mut rand::rng())
    }

    pub fn solve_with_rng<R: Rng + ?Sized>(
        &self,
        model: &CalibrationModel,
        target: &Equatorial,
        at: DateTime<Utc>,
        rng: &mut R,
    ) -> Solution {
        let goal = target.shifted(-sidereal_hours(model.t0, at)).to_vector();
        let fix_stretch = model.fix_stretch.value;
        let mob_stretch = model.mob_stretch.value;

        let objective = |s: &[f64]| {
            let (a, b) = (s[0], s[1]);
            let penalty = out_of(a, TAU) + out_of(b, PI);
            let laser = model.axes.laser_at(a * fix_stretch, b * mob_stretch);
            (1.0 - laser.dot(&*goal)).max(0.0).sqrt() + penalty
        };

        let restarts = Restarts {
            max_restarts: self.config.max_restarts,
            threshold: self.config.threshold,
            simplex: self.simplex.clone(),
        };
        let search = restarts.search(
            rng,
            |r| vec![r.random_range(0.0..TAU), r.random_range(0.0..PI)],
            objective,
            |_, _| ControlFlow::Continue(()),
        );

        let (a, b) = match search.best.x.as_slice() {
            [a, b] => (*a, *b),
            _ => (0.0, 0.0),
        };
        if !search.converged {
            warn!(
                "no step found for ra {:.3}h dec {:.2} after {} restarts (residual {:.3e})",
                target.ra(),
                target.dec(),
                search.restarts,
                search.best.value
            );
        }
        Solution {
            step: Step::from_rads(a, b, model.geometry),
            converged: search.converged,
            residual: search.best.value,
        }
    }
}

/// Distance of `x` outside `[0, max]`.
fn out_of(x: f64, max: f64) -> f64 {
    if x < 0.0 {
        -x
    } else if x > max {
        x - max
    } else {
        0.0
    }
}

/// Step pointing at `target` at time `at`, with the default solver.
pub fn step_from_equatorial(model: &CalibrationModel, target: &Equatorial, at: DateTime<Utc>) -> Solution {
    Solver::default().solve(model, target, at)
}
