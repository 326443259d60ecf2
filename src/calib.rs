//! Calibration of the gimbal against known stars.
//!
//! The forward model maps a [`Step`] to a sky direction by rotating the
//! laser axis about the mobile axis, then the result about the fixed axis.
//! Both rotation angles are scaled by a per-axis stretch factor. Fitting
//! finds the axes (and the stretch and tilt corrections) that best explain a
//! set of observed `(Step, Equatorial)` pairs.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use nalgebra::Vector3;
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::{Equatorial, Step, StepGeometry, UnitVector, angle_between, rotate};
use crate::optimize::{NelderMead, Restarts};

/// Length of a sidereal day in milliseconds.
pub const SIDEREAL_DAY_MS: f64 = 86_164_090.5;

/// Largest allowed tilt correction.
pub const MAX_TILT: f64 = 5.0 * PI / 180.0;

/// Objective value below which a fit or solve counts as converged. Equals
/// the value of a residual of pi/1024 radians (about 0.18 degrees).
pub fn default_threshold() -> f64 {
    (1.0 - (PI / 1024.0).cos()).sqrt()
}

/// Sidereal hours elapsed from `from` to `to` (negative if `to` is earlier).
pub fn sidereal_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 * 24.0 / SIDEREAL_DAY_MS
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A bounded model parameter that can be fitted or held fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitParam {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// Fit this parameter. When false, `value` is used as is.
    pub optimize: bool,
}

impl FitParam {
    pub const fn new(value: f64, min: f64, max: f64) -> Self {
        Self { value, min, max, optimize: true }
    }

    /// A parameter held at `value`.
    pub const fn frozen(value: f64) -> Self {
        Self { value, min: value, max: value, optimize: false }
    }

    /// Distance of `candidate` outside `[min, max]`, 0 inside.
    fn violation(&self, candidate: f64) -> f64 {
        if candidate < self.min {
            self.min - candidate
        } else if candidate > self.max {
            candidate - self.max
        } else {
            0.0
        }
    }

    /// The effective value for `candidate`, adding any bound violation to
    /// `penalty`. Frozen parameters ignore the candidate.
    fn resolve(&self, candidate: f64, penalty: &mut f64) -> f64 {
        if self.optimize {
            *penalty += self.violation(candidate);
            candidate
        } else {
            self.value
        }
    }

    /// A random start inside the bounds, or `value` when the bounds do not
    /// span a finite interval.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max > self.min && (self.max - self.min).is_finite() {
            rng.random_range(self.min..self.max)
        } else {
            self.value
        }
    }
}

/// Fixed axis, mobile axis, and laser direction at zero rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Axes {
    pub fix: UnitVector,
    pub mob: UnitVector,
    pub laser: UnitVector,
}

impl Axes {
    /// Laser direction after turning the mobile axis by `mob_angle`, then
    /// the fixed axis by `fix_angle`.
    pub fn laser_at(&self, fix_angle: f64, mob_angle: f64) -> UnitVector {
        let l = rotate(self.laser, &self.mob, mob_angle);
        rotate(l, &self.fix, fix_angle)
    }
}

impl Default for Axes {
    fn default() -> Self {
        Self { fix: Vector3::x_axis(), mob: Vector3::y_axis(), laser: Vector3::x_axis() }
    }
}

/// Residual statistics of a fit over its calibration stars, in degrees.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitStats {
    /// Mean angular deviation.
    pub dev: f64,
    pub min: f64,
    pub max: f64,
    pub min_star: Option<String>,
    pub max_star: Option<String>,
}

/// The fitted forward model of one gimbal.
///
/// Plain data: a calibration replaces the whole model, it never patches an
/// existing one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationModel {
    pub axes: Axes,
    pub fix_stretch: FitParam,
    pub mob_stretch: FitParam,
    pub mob_tilt: FitParam,
    pub laser_tilt: FitParam,
    /// Epoch at which the axes are expressed. Right ascensions are rotated
    /// by the sidereal time elapsed since.
    pub t0: DateTime<Utc>,
    pub stats: FitStats,
    pub geometry: StepGeometry,
}

impl CalibrationModel {
    /// An uncalibrated model with default axes and parameter bounds.
    pub fn new(geometry: StepGeometry) -> Self {
        Self {
            axes: Axes::default(),
            fix_stretch: FitParam::new(1.0, 0.8, 1.2),
            mob_stretch: FitParam::new(1.0, 0.8, 1.2),
            mob_tilt: FitParam::new(0.0, -MAX_TILT, MAX_TILT),
            laser_tilt: FitParam::new(0.0, -MAX_TILT, MAX_TILT),
            t0: DateTime::UNIX_EPOCH,
            stats: FitStats::default(),
            geometry,
        }
    }

    /// Laser direction for `step`, in the frame of `t0`.
    pub fn laser_for(&self, step: &Step) -> UnitVector {
        self.axes.laser_at(
            step.fix_to_rad() * self.fix_stretch.value,
            step.mob_to_rad() * self.mob_stretch.value,
        )
    }

    /// Sky direction the laser points at for `step` at time `at`.
    pub fn equatorial_from_step(&self, step: &Step, at: DateTime<Utc>) -> Equatorial {
        Equatorial::from_vector(&self.laser_for(step)).shifted(sidereal_hours(self.t0, at))
    }
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self::new(StepGeometry::default())
    }
}

// ---------------------------------------------------------------------------
// Calibration stars
// ---------------------------------------------------------------------------

/// One observation: the gimbal was at `step` while pointing at `target`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationStar {
    label: String,
    time: DateTime<Utc>,
    step: Step,
    target: Equatorial,
}

impl CalibrationStar {
    pub fn new(label: impl Into<String>, time: DateTime<Utc>, step: Step, target: Equatorial) -> Self {
        Self { label: label.into(), time, step, target }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn target(&self) -> Equatorial {
        self.target
    }
}

impl fmt::Display for CalibrationStar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ra {:.3}h, dec {:.2}) at step ({}, {})",
            self.label,
            self.target.ra(),
            self.target.dec(),
            self.step.fix(),
            self.step.mob()
        )
    }
}

// ---------------------------------------------------------------------------
// Fitting
// ---------------------------------------------------------------------------

/// Errors from [`Calibrator::fit`].
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration needs at least 2 stars, got {got}")]
    InsufficientData { got: usize },
}

/// Restart budget and success threshold for a calibration fit.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    pub max_restarts: usize,
    pub threshold: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self { max_restarts: 500, threshold: default_threshold() }
    }
}

/// Result of a fit. A fit that ran out of restarts still carries the best
/// model found, with `converged == false`.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub model: CalibrationModel,
    pub converged: bool,
    /// Restart hook stopped the fit early.
    pub cancelled: bool,
    pub restarts: usize,
    /// Best objective value.
    pub residual: f64,
}

/// Star observations rotated back to the epoch of the first star.
struct FitProblem<'a> {
    template: &'a CalibrationModel,
    observations: Vec<(f64, f64, UnitVector)>,
}

/// Axes and shape values produced by one parameter vector.
struct Candidate {
    axes: Axes,
    fix_stretch: f64,
    mob_stretch: f64,
    laser_tilt: f64,
    mob_tilt: f64,
    penalty: f64,
}

impl FitProblem<'_> {
    const DIM: usize = 8;

    fn build(&self, p: &[f64]) -> Candidate {
        let t = self.template;
        let mut penalty = 0.0;
        let fix_stretch = t.fix_stretch.resolve(p[0], &mut penalty);
        let mob_stretch = t.mob_stretch.resolve(p[1], &mut penalty);
        let laser_tilt = t.laser_tilt.resolve(p[2], &mut penalty);
        let mob_tilt = t.mob_tilt.resolve(p[3], &mut penalty);

        let axes = shaped_axes(laser_tilt, mob_tilt, [p[4], p[5], p[6], p[7]]);

        Candidate {
            axes,
            fix_stretch,
            mob_stretch,
            laser_tilt,
            mob_tilt,
            penalty,
        }
    }

    fn objective(&self, p: &[f64]) -> f64 {
        let c = self.build(p);
        let dots: f64 = self
            .observations
            .iter()
            .map(|(fix_rad, mob_rad, target)| {
                c.axes.laser_at(fix_rad * c.fix_stretch, mob_rad * c.mob_stretch).dot(&**target)
            })
            .sum();
        let mean = dots / self.observations.len() as f64;
        (1.0 - mean).max(0.0).sqrt() + c.penalty
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let t = self.template;
        vec![
            t.fix_stretch.sample(rng),
            t.mob_stretch.sample(rng),
            t.laser_tilt.sample(rng),
            t.mob_tilt.sample(rng),
            rng.random_range(0.0..TAU),
            rng.random_range(0.0..TAU),
            rng.random_range(0.0..PI),
            rng.random_range(0.0..TAU),
        ]
    }
}

/// Axes for the given tilts and orientation angles.
///
/// Starting from fix = X, mob = Y, laser = X: the laser is tilted about Z,
/// turned about the mobile axis by `a[0]`, then mob and laser are tilted
/// about Z together. The mobile assembly is turned about the fixed axis by
/// `a[1]`, and the whole gimbal is oriented by `a[2]` about Y and `a[3]`
/// about Z.
pub(crate) fn shaped_axes(laser_tilt: f64, mob_tilt: f64, a: [f64; 4]) -> Axes {
    let y = Vector3::y_axis();
    let z = Vector3::z_axis();
    let mut fix = Vector3::x_axis();
    let mut mob = Vector3::y_axis();
    let mut laser = Vector3::x_axis();

    laser = rotate(laser, &z, laser_tilt);
    laser = rotate(laser, &mob, a[0]);
    mob = rotate(mob, &z, mob_tilt);
    laser = rotate(laser, &z, mob_tilt);

    mob = rotate(mob, &fix, a[1]);
    mob = rotate(mob, &y, a[2]);
    mob = rotate(mob, &z, a[3]);
    laser = rotate(laser, &fix, a[1]);
    laser = rotate(laser, &y, a[2]);
    laser = rotate(laser, &z, a[3]);
    fix = rotate(fix, &y, a[2]);
    fix = rotate(fix, &z, a[3]);

    Axes { fix, mob, laser }
}

type RestartHook = Box<dyn FnMut(usize, f64) -> ControlFlow<()>>;

/// Fits a [`CalibrationModel`] to calibration stars.
///
/// The template model supplies the step geometry and the parameter bounds
/// and freeze flags; its axes are ignored.
pub struct Calibrator {
    template: CalibrationModel,
    config: FitConfig,
    simplex: NelderMead,
    on_restart: Option<RestartHook>,
}

impl Calibrator {
    pub fn new(template: CalibrationModel) -> Self {
        Self::with_config(template, FitConfig::default())
    }

    pub fn with_config(template: CalibrationModel, config: FitConfig) -> Self {
        Self { template, config, simplex: NelderMead::default(), on_restart: None }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn template(&self) -> &CalibrationModel {
        &self.template
    }

    /// Register a callback run after every restart with the restart count
    /// and the best objective value so far. Returning `Break` stops the fit
    /// and returns the best model found.
    pub fn set_on_restart(&mut self, f: impl FnMut(usize, f64) -> ControlFlow<()> + 'static) {
        self.on_restart = Some(Box::new(f));
    }

    pub fn fit(&mut self, stars: &[CalibrationStar]) -> Result<Calibration, CalibrationError> {
        self.fit_with_rng(stars, &mut rand::rng())
    }

    /// [`fit`](Self::fit) drawing restart points from `rng`.
    pub fn fit_with_rng<R: Rng + ?Sized>(
        &mut self,
        stars: &[CalibrationStar],
        rng: &mut R,
    ) -> Result<Calibration, CalibrationError> {
        let [first, _, ..] = stars else {
            return Err(CalibrationError::InsufficientData { got: stars.len() });
        };
        let t0 = first.time;

        let observations = stars
            .iter()
            .map(|s| {
                let target = s.target.shifted(-sidereal_hours(t0, s.time)).to_vector();
                (s.step.fix_to_rad(), s.step.mob_to_rad(), target)
            })
            .collect();
        let problem = FitProblem { template: &self.template, observations };

        let restarts = Restarts {
            max_restarts: self.config.max_restarts,
            threshold: self.config.threshold,
            simplex: self.simplex.clone(),
        };
        let hook = &mut self.on_restart;
        let search = restarts.search(
            rng,
            |r| problem.sample(r),
            |p| problem.objective(p),
            |i, best| match hook.as_mut() {
                Some(cb) => cb(i, best),
                None => ControlFlow::Continue(()),
            },
        );

        let p = &search.best.x;
        let mut model = self.template.clone();
        if p.len() == FitProblem::DIM {
            let c = problem.build(p);
            model.axes = c.axes;
            model.fix_stretch.value = c.fix_stretch;
            model.mob_stretch.value = c.mob_stretch;
            model.laser_tilt.value = c.laser_tilt;
            model.mob_tilt.value = c.mob_tilt;
        }
        model.t0 = t0;
        model.stats = fit_stats(&model, stars);

        if search.converged {
            info!(
                "calibrated on {} stars after {} restarts: mean {:.3} deg, max {:.3} deg",
                stars.len(),
                search.restarts,
                model.stats.dev,
                model.stats.max
            );
        } else if search.cancelled {
            info!("calibration stopped after {} restarts (residual {:.3e})", search.restarts, search.best.value);
        } else {
            warn!(
                "calibration did not converge after {} restarts (residual {:.3e}, threshold {:.3e})",
                search.restarts, search.best.value, self.config.threshold
            );
        }

        Ok(Calibration {
            model,
            converged: search.converged,
            cancelled: search.cancelled,
            restarts: search.restarts,
            residual: search.best.value,
        })
    }
}

impl fmt::Debug for Calibrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calibrator")
            .field("template", &self.template)
            .field("config", &self.config)
            .field("on_restart", &self.on_restart.is_some())
            .finish()
    }
}

/// Angular deviation of each star from where `model` says its step points.
fn fit_stats(model: &CalibrationModel, stars: &[CalibrationStar]) -> FitStats {
    let mut stats = FitStats { min: f64::INFINITY, ..FitStats::default() };
    for s in stars {
        let predicted = model.equatorial_from_step(&s.step, s.time).to_vector();
        let ang = angle_between(&predicted, &s.target.to_vector()).to_degrees();
        debug!("{s}: deviation {ang:.3} deg");
        if ang < stats.min {
            stats.min = ang;
            stats.min_star = Some(s.label.clone());
        }
        if ang > stats.max {
            stats.max = ang;
            stats.max_star = Some(s.label.clone());
        }
        stats.dev += ang / stars.len() as f64;
    }
    if stats.min_star.is_none() {
        stats.min = 0.0;
    }
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
