//! Laser trajectories: ordered segments of (direction, laser state, delay).
//!
//! Builders here are pure: they take sky coordinates and return a [`Path`].
//! Turning celestial coordinates into steps happens later, in the encoder.

use std::f64::consts::TAU;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coord::{Equatorial, Step, UnitVector, angle_between, rotate};
use crate::protocol::Playback;

/// Where a segment points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Coord {
    /// A sky direction, solved to steps at encode time.
    Celestial(Equatorial),
    /// A raw stepper position.
    Steps(Step),
}

impl From<Equatorial> for Coord {
    fn from(e: Equatorial) -> Self {
        Coord::Celestial(e)
    }
}

impl From<Step> for Coord {
    fn from(s: Step) -> Self {
        Coord::Steps(s)
    }
}

/// One waypoint. `delay` is the time between stepper steps while moving to
/// this waypoint, in units of 100 microseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    pub coord: Coord,
    pub laser: bool,
    pub delay: u32,
}

impl Segment {
    pub fn new(coord: impl Into<Coord>, laser: bool, delay: u32) -> Self {
        Self { coord: coord.into(), laser, delay }
    }
}

/// An append-only sequence of segments.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Path {
    segments: Vec<Segment>,
    duration: u64,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.duration += u64::from(segment.delay);
        self.segments.push(segment);
    }

    pub fn add_path(&mut self, other: Path) {
        self.duration += other.duration;
        self.segments.extend(other.segments);
    }

    pub fn size(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment delays.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        let mut path = Path::new();
        for s in iter {
            path.add_segment(s);
        }
        path
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

// ---------------------------------------------------------------------------
// Laser patterns
// ---------------------------------------------------------------------------

/// Repeating laser on/off pattern over segment indices: `on` segments lit,
/// then `off` segments dark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaserPattern {
    pub on: u32,
    pub off: u32,
}

impl LaserPattern {
    pub const SOLID: Self = Self { on: 1, off: 0 };
    pub const DARK: Self = Self { on: 0, off: 0 };

    pub const fn new(on: u32, off: u32) -> Self {
        Self { on, off }
    }

    /// Four-segment pattern lit for `percent` of the time, rounded to
    /// quarters.
    pub fn duty(percent: f64) -> Self {
        let on = if percent.is_finite() { (percent / 25.0).round().clamp(0.0, 4.0) as u32 } else { 0 };
        Self { on, off: 4 - on }
    }

    /// Laser state of segment `i`. A `[0, 0]` pattern is always off.
    pub fn is_on(&self, i: usize) -> bool {
        let period = u64::from(self.on) + u64::from(self.off);
        period > 0 && (i as u64 % period) < u64::from(self.on)
    }
}

impl Default for LaserPattern {
    fn default() -> Self {
        Self::SOLID
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A single waypoint with no delay.
pub fn point(coord: impl Into<Coord>, laser_on: bool) -> Path {
    [Segment::new(coord, laser_on, 0)].into_iter().collect()
}

/// Laser off, then on, at the same place. Played cyclically this blinks.
pub fn blink(coord: impl Into<Coord>, delay: u32) -> Path {
    let coord = coord.into();
    [Segment::new(coord, false, delay), Segment::new(coord, true, delay)].into_iter().collect()
}

/// Size of a circle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CircleRadius {
    /// Angular radius in radians.
    Aperture(f64),
    /// A point on the circle.
    Border(Equatorial),
}

/// Circle around `center`, discretized every `angle_increment` radians.
///
/// Starts at the border point (for an aperture, the point due north of the
/// center) and turns right-handedly about the center direction.
pub fn circle(
    center: &Equatorial,
    radius: CircleRadius,
    angle_increment: f64,
    pattern: LaserPattern,
    delay: u32,
) -> Path {
    let axis = center.to_vector();
    let border = match radius {
        CircleRadius::Aperture(ap) => Equatorial::new(center.ra(), center.dec() + ap.to_degrees()),
        CircleRadius::Border(b) => b,
    };
    let v0 = border.to_vector();
    let (n, inc) = match usable_increment(angle_increment) {
        Some(inc) => (((TAU / inc).round() as usize).max(1), inc),
        None => (1, 0.0),
    };
    (0..n)
        .map(|i| {
            let v = rotate(v0, &axis, i as f64 * inc);
            Segment::new(Equatorial::from_vector(&v), pattern.is_on(i), delay)
        })
        .collect()
}

/// Great-circle arc from `start` to `end` inclusive, in steps of about
/// `angle_increment` radians.
pub fn geodesic(
    start: &Equatorial,
    end: &Equatorial,
    angle_increment: f64,
    pattern: LaserPattern,
    delay: u32,
) -> Path {
    let v0 = start.to_vector();
    let v1 = end.to_vector();
    let angle = angle_between(&v0, &v1);
    let n = match usable_increment(angle_increment) {
        Some(inc) => ((angle / inc).round() as usize).max(1),
        None => 1,
    };
    let sub = angle / n as f64;
    let axis = rotation_axis(&v0, &v1);
    (0..=n)
        .map(|i| {
            let v = rotate(v0, &axis, i as f64 * sub);
            Segment::new(Equatorial::from_vector(&v), pattern.is_on(i), delay)
        })
        .collect()
}

/// Finest angular step a builder will discretize at. Far below the
/// resolution of any stepper the encoder can address.
pub const MIN_INCREMENT: f64 = TAU / 65_536.0;

/// Positive finite increments, raised to [`MIN_INCREMENT`].
fn usable_increment(inc: f64) -> Option<f64> {
    (inc.is_finite() && inc > 0.0).then_some(inc.max(MIN_INCREMENT))
}

/// Axis turning `v0` towards `v1`. For coincident or opposite vectors any
/// axis perpendicular to `v0` will do.
fn rotation_axis(v0: &UnitVector, v1: &UnitVector) -> UnitVector {
    const MIN_NORM: f64 = 1e-12;
    if let Some(axis) = UnitVector::try_new(v0.cross(&**v1), MIN_NORM) {
        return axis;
    }
    let helper = if v0.x.abs() < 0.9 { nalgebra::Vector3::x() } else { nalgebra::Vector3::y() };
    UnitVector::new_normalize(v0.cross(&helper))
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

/// Line part of a track style.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineStyle {
    /// Radians between waypoints.
    pub increment: f64,
    pub pattern: LaserPattern,
    pub delay: u32,
}

/// Circles drawn at track vertices or around a pointed target.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CircleStyle {
    /// Angular radius in radians.
    pub aperture: f64,
    /// Radians between waypoints.
    pub increment: f64,
    pub pattern: LaserPattern,
    pub delay: u32,
}

impl CircleStyle {
    pub fn build(&self, center: &Equatorial) -> Path {
        circle(center, CircleRadius::Aperture(self.aperture), self.increment, self.pattern, self.delay)
    }
}

/// How a catalog track is traced: lines between vertices, circles at
/// vertices, or both.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackStyle {
    pub line: Option<LineStyle>,
    pub circle: Option<CircleStyle>,
}

/// Path tracing catalog polylines given as `[ra_deg, dec_deg]` vertices
/// (ra in -180..=180 degrees).
///
/// Every vertex gets a circle when the style has one, followed by the line
/// to the next vertex. Right ascensions are moved back by `dt` sidereal
/// hours, so that a path encoded now lands where the sky will be `dt` hours
/// later.
pub fn track(polylines: &[Vec<[f64; 2]>], style: &TrackStyle, dt: f64) -> Path {
    let mut path = Path::new();
    for polyline in polylines {
        let vertices: Vec<Equatorial> = polyline
            .iter()
            .map(|&[ra, dec]| Equatorial::from_degree_pair(ra, dec).shifted(-dt))
            .collect();
        for (i, v) in vertices.iter().enumerate() {
            if let Some(c) = &style.circle {
                path.add_path(c.build(v));
            }
            if let Some(line) = &style.line {
                match vertices.get(i + 1) {
                    Some(next) => {
                        path.add_path(geodesic(v, next, line.increment, line.pattern, line.delay))
                    }
                    None if vertices.len() == 1 && style.circle.is_none() => {
                        path.add_segment(Segment::new(*v, true, line.delay))
                    }
                    None => {}
                }
            }
        }
    }
    path
}

// ---------------------------------------------------------------------------
// Pointer styles
// ---------------------------------------------------------------------------

/// How a single target is shown.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PointerStyle {
    /// Steady dot.
    Point,
    /// Dot blinking with `delay` between phases.
    BlinkingPoint { delay: u32 },
    /// Circle around the target, repeated.
    Circle(CircleStyle),
    /// Circle around the target, traced back and forth.
    AlternatingCircle(CircleStyle),
}

impl PointerStyle {
    /// Path and playback mode showing `target`.
    pub fn build(&self, target: impl Into<Coord>) -> (Path, Playback) {
        let target = target.into();
        match self {
            PointerStyle::Point => (point(target, true), Playback::Single),
            PointerStyle::BlinkingPoint { delay } => (blink(target, *delay), Playback::CyclicForward),
            PointerStyle::Circle(c) => (circled(target, c), Playback::CyclicForward),
            PointerStyle::AlternatingCircle(c) => (circled(target, c), Playback::CyclicAlternate),
        }
    }
}

/// Circles need a sky direction; a raw step target falls back to a point.
fn circled(target: Coord, style: &CircleStyle) -> Path {
    match target {
        Coord::Celestial(e) => style.build(&e),
        Coord::Steps(_) => point(target, true),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
