//! Direction value types: spherical, equatorial, and stepper-step.
//!
//! Every representation is canonical at all times. Constructors and setters
//! wrap their inputs into range instead of rejecting them, so no value of
//! these types is ever out of its domain.
//!
//! Rectangular convention shared by all representations:
//!
//! ```text
//! x = sin(theta) * sin(phi)
//! y = cos(theta)            (polar axis, celestial north)
//! z = sin(theta) * cos(phi) (phi = 0, ra = 0h)
//! ```

use std::f64::consts::{PI, TAU};

use nalgebra::{Unit, UnitQuaternion, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A normalized rectangular direction.
pub type UnitVector = Unit<Vector3<f64>>;

/// Reduce `value` into `[0, period)`. Non-finite input maps to 0.
pub fn wrap(value: f64, period: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let r = value.rem_euclid(period);
    // rem_euclid rounds tiny negatives up to exactly `period`.
    if r >= period { 0.0 } else { r }
}

/// Angle in radians between two directions, accurate near 0 and pi.
pub fn angle_between(a: &UnitVector, b: &UnitVector) -> f64 {
    a.cross(&**b).norm().atan2(a.dot(&**b))
}

/// Rotate `v` right-handedly about `axis` by `angle` radians.
pub fn rotate(v: UnitVector, axis: &UnitVector, angle: f64) -> UnitVector {
    UnitQuaternion::from_axis_angle(axis, angle) * v
}

// ---------------------------------------------------------------------------
// Spherical
// ---------------------------------------------------------------------------

/// Unit vector in spherical coordinates: azimuth `phi` in `[0, 2pi)`, polar
/// angle `theta` in `[0, pi]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "(f64, f64)", into = "(f64, f64)"))]
pub struct Spherical {
    phi: f64,
    theta: f64,
}

impl Spherical {
    pub fn new(phi: f64, theta: f64) -> Self {
        let mut s = Self { phi, theta };
        s.canonicalize();
        s
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn set_phi(&mut self, phi: f64) {
        self.phi = phi;
        self.canonicalize();
    }

    pub fn set_theta(&mut self, theta: f64) {
        self.theta = theta;
        self.canonicalize();
    }

    /// Wrap both angles modulo 2pi, then reflect a polar angle past pi back
    /// over the pole.
    fn canonicalize(&mut self) {
        if !self.phi.is_finite() || !self.theta.is_finite() {
            self.phi = 0.0;
            self.theta = 0.0;
            return;
        }
        self.phi = wrap(self.phi, TAU);
        self.theta = wrap(self.theta, TAU);
        if self.theta > PI {
            self.theta = TAU - self.theta;
            self.phi = wrap(self.phi + PI, TAU);
        }
    }

    pub fn to_vector(&self) -> UnitVector {
        let (st, ct) = self.theta.sin_cos();
        let (sp, cp) = self.phi.sin_cos();
        Unit::new_normalize(Vector3::new(st * sp, ct, st * cp))
    }

    /// Build from any non-zero vector. Zero or non-finite vectors map to the
    /// pole (0, 0).
    pub fn from_vector(v: &Vector3<f64>) -> Self {
        let n = v.norm();
        if n == 0.0 || !n.is_finite() {
            return Self::default();
        }
        let theta = (v.y / n).clamp(-1.0, 1.0).acos();
        let phi = v.x.atan2(v.z);
        Self::new(phi, theta)
    }
}

impl Default for Spherical {
    fn default() -> Self {
        Self { phi: 0.0, theta: 0.0 }
    }
}

impl From<(f64, f64)> for Spherical {
    fn from((phi, theta): (f64, f64)) -> Self {
        Self::new(phi, theta)
    }
}

impl From<Spherical> for (f64, f64) {
    fn from(s: Spherical) -> Self {
        (s.phi, s.theta)
    }
}

// ---------------------------------------------------------------------------
// Equatorial
// ---------------------------------------------------------------------------

/// Celestial direction: right ascension in hours `[0, 24)`, declination in
/// degrees `[-90, 90]`.
///
/// Maps to [`Spherical`] with `phi = ra * pi / 12` and
/// `theta = (90 - dec) * pi / 180`, so a declination past a pole flips the
/// right ascension by 12 hours.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "(f64, f64)", into = "(f64, f64)"))]
pub struct Equatorial {
    ra: f64,
    dec: f64,
}

impl Equatorial {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self::from_spherical(&Self::raw_spherical(ra, dec))
    }

    /// Catalog form: right ascension in degrees (typically -180 to 180).
    pub fn from_degree_pair(ra_deg: f64, dec_deg: f64) -> Self {
        Self::new(ra_deg / 15.0, dec_deg)
    }

    pub fn ra(&self) -> f64 {
        self.ra
    }

    pub fn dec(&self) -> f64 {
        self.dec
    }

    pub fn set_ra(&mut self, ra: f64) {
        *self = Self::new(ra, self.dec);
    }

    pub fn set_dec(&mut self, dec: f64) {
        *self = Self::new(self.ra, dec);
    }

    /// The same declination with right ascension moved by `hours`.
    pub fn shifted(&self, hours: f64) -> Self {
        Self::new(self.ra + hours, self.dec)
    }

    pub fn to_spherical(&self) -> Spherical {
        Self::raw_spherical(self.ra, self.dec)
    }

    pub fn from_spherical(s: &Spherical) -> Self {
        let mut ra = s.phi() * 12.0 / PI;
        if ra >= 24.0 {
            ra = 0.0;
        }
        Self { ra, dec: 90.0 - s.theta().to_degrees() }
    }

    pub fn to_vector(&self) -> UnitVector {
        self.to_spherical().to_vector()
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::from_spherical(&Spherical::from_vector(v))
    }

    fn raw_spherical(ra: f64, dec: f64) -> Spherical {
        Spherical::new(ra * PI / 12.0, (90.0 - dec).to_radians())
    }
}

impl Default for Equatorial {
    fn default() -> Self {
        Self { ra: 0.0, dec: 0.0 }
    }
}

impl From<(f64, f64)> for Equatorial {
    fn from((ra, dec): (f64, f64)) -> Self {
        Self::new(ra, dec)
    }
}

impl From<Equatorial> for (f64, f64) {
    fn from(e: Equatorial) -> Self {
        (e.ra, e.dec)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Mechanical constants of a stepper gimbal.
///
/// `steps_per_rev` is at least 1 and `step_at_zenith` below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "GeometryRepr", into = "GeometryRepr"))]
pub struct StepGeometry {
    steps_per_rev: u32,
    step_at_zenith: u32,
}

impl StepGeometry {
    pub const fn new(steps_per_rev: u32, step_at_zenith: u32) -> Self {
        let steps_per_rev = if steps_per_rev == 0 { 1 } else { steps_per_rev };
        Self { steps_per_rev, step_at_zenith: step_at_zenith % steps_per_rev }
    }

    /// Steps for a full revolution of either axis.
    pub const fn steps_per_rev(&self) -> u32 {
        self.steps_per_rev
    }

    /// Mobile-axis step at which the laser points to the zenith.
    pub const fn step_at_zenith(&self) -> u32 {
        self.step_at_zenith
    }

    /// Construct a [`Step`] with this geometry.
    pub fn step(self, fix: i64, mob: i64) -> Step {
        Step::with_geometry(fix, mob, self)
    }

    /// Steps in a quarter turn (truncated).
    pub fn quarter_turn(&self) -> i64 {
        i64::from(self.steps_per_rev / 4)
    }

    /// Radians per step.
    pub fn step_angle(&self) -> f64 {
        TAU / f64::from(self.steps_per_rev)
    }

    fn wrap(&self, value: i64) -> u32 {
        // Always < steps_per_rev, so the cast is lossless.
        value.rem_euclid(i64::from(self.steps_per_rev)) as u32
    }

    fn round_steps(&self, rad: f64) -> i64 {
        if !rad.is_finite() {
            return 0;
        }
        (rad / self.step_angle()).round() as i64
    }
}

impl Default for StepGeometry {
    /// 28BYJ-48 class steppers: 2038 steps per turn, zenith at half a turn.
    fn default() -> Self {
        Self::new(2038, 1019)
    }
}

/// Stepper positions of the fixed and mobile axes, each in
/// `[0, steps_per_rev)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "StepRepr", into = "StepRepr"))]
pub struct Step {
    fix: u32,
    mob: u32,
    geometry: StepGeometry,
}

impl Step {
    /// Positions with the default geometry.
    pub fn new(fix: i64, mob: i64) -> Self {
        Self::with_geometry(fix, mob, StepGeometry::default())
    }

    pub fn with_geometry(fix: i64, mob: i64, geometry: StepGeometry) -> Self {
        Self { fix: geometry.wrap(fix), mob: geometry.wrap(mob), geometry }
    }

    /// Inverse of [`fix_to_rad`](Self::fix_to_rad) and
    /// [`mob_to_rad`](Self::mob_to_rad), rounded to the nearest step.
    pub fn from_rads(fix_rad: f64, mob_rad: f64, geometry: StepGeometry) -> Self {
        let fix = geometry.round_steps(fix_rad);
        let mob = geometry.round_steps(mob_rad) + i64::from(geometry.step_at_zenith)
            - geometry.quarter_turn();
        Self::with_geometry(fix, mob, geometry)
    }

    pub fn fix(&self) -> u32 {
        self.fix
    }

    pub fn mob(&self) -> u32 {
        self.mob
    }

    pub fn geometry(&self) -> StepGeometry {
        self.geometry
    }

    pub fn set_fix(&mut self, fix: i64) {
        self.fix = self.geometry.wrap(fix);
    }

    pub fn set_mob(&mut self, mob: i64) {
        self.mob = self.geometry.wrap(mob);
    }

    /// Fixed-axis rotation angle in radians.
    pub fn fix_to_rad(&self) -> f64 {
        f64::from(self.fix) * self.geometry.step_angle()
    }

    /// Mobile-axis rotation angle in radians, zero a quarter turn before the
    /// zenith position.
    pub fn mob_to_rad(&self) -> f64 {
        let offset = i64::from(self.mob) - i64::from(self.geometry.step_at_zenith)
            + self.geometry.quarter_turn();
        offset as f64 * self.geometry.step_angle()
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

#[cfg(feature = "serde")]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StepRepr {
    fix: i64,
    mob: i64,
    geometry: StepGeometry,
}

#[cfg(feature = "serde")]
impl From<StepRepr> for Step {
    fn from(r: StepRepr) -> Self {
        Self::with_geometry(r.fix, r.mob, r.geometry)
    }
}

#[cfg(feature = "serde")]
impl From<Step> for StepRepr {
    fn from(s: Step) -> Self {
        Self { fix: i64::from(s.fix), mob: i64::from(s.mob), geometry: s.geometry }
    }
}

#[cfg(feature = "serde")]
#[derive(Serialize, Deserialize)]
struct GeometryRepr {
    steps_per_rev: u32,
    step_at_zenith: u32,
}

#[cfg(feature = "serde")]
impl From<GeometryRepr> for StepGeometry {
    fn from(r: GeometryRepr) -> Self {
        Self::new(r.steps_per_rev, r.step_at_zenith)
    }
}

#[cfg(feature = "serde")]
impl From<StepGeometry> for GeometryRepr {
    fn from(g: StepGeometry) -> Self {
        Self { steps_per_rev: g.steps_per_rev, step_at_zenith: g.step_at_zenith }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SAMPLES: [f64; 11] = [-40.0, -7.5, -PI, -0.3, 0.0, 0.5, PI, 4.0, TAU, 9.9, 123.4];

    #[test]
    fn spherical_canonical_ranges() {
        for &phi in &SAMPLES {
            for &theta in &SAMPLES {
                let s = Spherical::new(phi, theta);
                assert!((0.0..TAU).contains(&s.phi()), "phi {} from ({phi}, {theta})", s.phi());
                assert!((0.0..=PI).contains(&s.theta()), "theta {} from ({phi}, {theta})", s.theta());
            }
        }
    }

    #[test]
    fn spherical_canonicalize_is_idempotent() {
        for &phi in &SAMPLES {
            for &theta in &SAMPLES {
                let once = Spherical::new(phi, theta);
                let twice = Spherical::new(once.phi(), once.theta());
                assert_eq!(once, twice);
            }
        }
    }

    #[test]
    fn spherical_canonical_form_is_same_direction() {
        // Reflection over the pole must not move the vector.
        let raw_phi = 1.0_f64;
        let raw_theta = 4.0_f64;
        let raw = Vector3::new(
            raw_theta.sin() * raw_phi.sin(),
            raw_theta.cos(),
            raw_theta.sin() * raw_phi.cos(),
        );
        let s = Spherical::new(raw_phi, raw_theta);
        assert_abs_diff_eq!(s.to_vector().into_inner(), raw, epsilon = 1e-12);
    }

    #[test]
    fn spherical_rectangular_round_trip() {
        for &phi in &SAMPLES {
            for &theta in &[0.2, 1.0, 1.5707, 2.5, 3.0] {
                let s = Spherical::new(phi, theta);
                let back = Spherical::from_vector(&s.to_vector());
                assert_abs_diff_eq!(back.phi(), s.phi(), epsilon = 1e-9);
                assert_abs_diff_eq!(back.theta(), s.theta(), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn spherical_setters_recanonicalize() {
        let mut s = Spherical::new(1.0, 1.0);
        s.set_phi(-PI / 2.0);
        assert_abs_diff_eq!(s.phi(), 1.5 * PI, epsilon = 1e-12);
        s.set_theta(1.5 * PI);
        assert_abs_diff_eq!(s.theta(), PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.phi(), PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_input_does_not_escape() {
        let s = Spherical::new(f64::NAN, 1.0);
        assert_eq!(s, Spherical::default());
        let e = Equatorial::new(f64::INFINITY, 10.0);
        assert!(e.ra().is_finite() && e.dec().is_finite());
        let z = Spherical::from_vector(&Vector3::zeros());
        assert_eq!(z, Spherical::default());
    }

    #[test]
    fn equatorial_wraps_right_ascension() {
        let e = Equatorial::new(-1.0, 10.0);
        assert_abs_diff_eq!(e.ra(), 23.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e.dec(), 10.0, epsilon = 1e-9);
        let e = Equatorial::new(49.5, -20.0);
        assert_abs_diff_eq!(e.ra(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn equatorial_declination_past_pole_flips_ra() {
        let e = Equatorial::new(3.0, 100.0);
        assert_abs_diff_eq!(e.dec(), 80.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e.ra(), 15.0, epsilon = 1e-9);

        let e = Equatorial::new(3.0, -100.0);
        assert_abs_diff_eq!(e.dec(), -80.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e.ra(), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn equatorial_canonicalize_is_idempotent() {
        for &ra in &[-30.0, -1.0, 0.0, 5.5, 23.99, 24.0, 70.0] {
            for &dec in &[-200.0, -90.0, -45.0, 0.0, 89.9, 90.0, 135.0] {
                let once = Equatorial::new(ra, dec);
                let twice = Equatorial::new(once.ra(), once.dec());
                assert_abs_diff_eq!(once.ra(), twice.ra(), epsilon = 1e-9);
                assert_abs_diff_eq!(once.dec(), twice.dec(), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn equatorial_rectangular_round_trip() {
        for &ra in &[0.0, 1.0, 6.0, 11.5, 18.25, 23.9] {
            for &dec in &[-80.0, -30.0, 0.0, 45.0, 89.0] {
                let e = Equatorial::new(ra, dec);
                let back = Equatorial::from_vector(&e.to_vector());
                assert_abs_diff_eq!(back.ra(), e.ra(), epsilon = 1e-9);
                assert_abs_diff_eq!(back.dec(), e.dec(), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn equatorial_axes() {
        // North pole is +y, (0h, 0) is +z, (6h, 0) is +x.
        assert_abs_diff_eq!(Equatorial::new(0.0, 90.0).to_vector().into_inner(), Vector3::y(), epsilon = 1e-12);
        assert_abs_diff_eq!(Equatorial::new(0.0, 0.0).to_vector().into_inner(), Vector3::z(), epsilon = 1e-12);
        assert_abs_diff_eq!(Equatorial::new(6.0, 0.0).to_vector().into_inner(), Vector3::x(), epsilon = 1e-12);
    }

    #[test]
    fn equatorial_setters() {
        let mut e = Equatorial::new(2.0, 10.0);
        e.set_ra(25.0);
        assert_abs_diff_eq!(e.ra(), 1.0, epsilon = 1e-9);
        e.set_dec(95.0);
        assert_abs_diff_eq!(e.dec(), 85.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e.ra(), 13.0, epsilon = 1e-9);
    }

    #[test]
    fn degree_pair_conversion() {
        let e = Equatorial::from_degree_pair(-90.0, 12.0);
        assert_abs_diff_eq!(e.ra(), 18.0, epsilon = 1e-9);
        let e = Equatorial::from_degree_pair(180.0, -5.0);
        assert_abs_diff_eq!(e.ra(), 12.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e.dec(), -5.0, epsilon = 1e-9);
    }

    #[test]
    fn shifted_moves_only_ra() {
        let e = Equatorial::new(23.5, -12.0).shifted(1.0);
        assert_abs_diff_eq!(e.ra(), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(e.dec(), -12.0, epsilon = 1e-9);
    }

    #[test]
    fn angle_between_orthogonal_and_parallel() {
        let a = Equatorial::new(0.0, 0.0).to_vector();
        let b = Equatorial::new(6.0, 0.0).to_vector();
        assert_abs_diff_eq!(angle_between(&a, &b), PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_between(&a, &a), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rotate_is_right_handed() {
        let v = rotate(Vector3::x_axis(), &Vector3::z_axis(), PI / 2.0);
        assert_abs_diff_eq!(v.into_inner(), Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn step_wraparound() {
        let g = StepGeometry::default();
        let max = i64::from(g.steps_per_rev);
        assert_eq!(Step::new(max + 5, 100), Step::new(5, 100));
        assert_eq!(Step::new(-1, -max - 2), Step::new(max - 1, max - 2));
        let mut s = Step::new(0, 0);
        s.set_fix(3 * max + 7);
        s.set_mob(-3);
        assert_eq!((s.fix(), s.mob()), (7, 2035));
    }

    #[test]
    fn step_angles() {
        let g = StepGeometry::new(2038, 1019);
        let s = g.step(509, 1019);
        assert_abs_diff_eq!(s.fix_to_rad(), 509.0 * TAU / 2038.0, epsilon = 1e-12);
        // Zenith is a quarter turn (509 steps) on the mob axis.
        assert_abs_diff_eq!(s.mob_to_rad(), 509.0 * TAU / 2038.0, epsilon = 1e-12);
    }

    #[test]
    fn step_rad_round_trip() {
        let g = StepGeometry::default();
        for fix in [0, 1, 500, 1019, 2037] {
            for mob in [0, 510, 1019, 1538, 2037] {
                let s = g.step(fix, mob);
                let back = Step::from_rads(s.fix_to_rad(), s.mob_to_rad(), g);
                assert_eq!(back, s);
            }
        }
    }

    #[test]
    fn step_from_rads_rounds_and_wraps() {
        let g = StepGeometry::new(400, 200);
        let s = Step::from_rads(-0.4 * g.step_angle(), 0.6 * g.step_angle(), g);
        assert_eq!(s.fix(), 0);
        // 1 + 200 - 100
        assert_eq!(s.mob(), 101);
        let s = Step::from_rads(f64::NAN, TAU + g.step_angle(), g);
        assert_eq!(s.fix(), 0);
        assert_eq!(s.mob(), 101);
    }

    #[test]
    fn degenerate_geometry_is_clamped() {
        let g = StepGeometry::new(0, 5);
        assert_eq!(g.steps_per_rev(), 1);
        assert_eq!(g.step_at_zenith(), 0);
        assert_eq!(g.step(12, -3), g.step(0, 0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialized_zero_revolution_geometry_is_clamped() {
        let g: StepGeometry = serde_json::from_str(r#"{"steps_per_rev":0,"step_at_zenith":7}"#).unwrap();
        assert_eq!((g.steps_per_rev(), g.step_at_zenith()), (1, 0));
        let s = Step::with_geometry(5, 5, g);
        assert_eq!((s.fix(), s.mob()), (0, 0));

        let s: Step =
            serde_json::from_str(r#"{"fix":5,"mob":-3,"geometry":{"steps_per_rev":0,"step_at_zenith":0}}"#).unwrap();
        assert_eq!((s.fix(), s.mob()), (0, 0));
        assert_eq!(s.geometry().steps_per_rev(), 1);
    }
}
