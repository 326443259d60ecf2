//! Operational routines built from session primitives.
//!
//! Free functions that combine a [`Session`] with the calibration model and
//! the encoder: capture a calibration star, show a target, send a track,
//! move to raw steps or the zenith, and read back where the laser points.

use chrono::{DateTime, Utc};
use log::info;

use crate::calib::{CalibrationModel, CalibrationStar};
use crate::coord::{Equatorial, Step};
use crate::encode::{EncodedPath, Encoder};
use crate::path::{self, Coord, Path, PointerStyle};
use crate::protocol::Playback;
use crate::session::{Session, SessionError, Transport};

/// Record the current stepper position as an observation of `target`.
///
/// The operator has aimed the laser at the star by hand (jogging); the
/// steps read now, paired with the catalog position, are one input to a
/// calibration fit.
pub fn capture_star<T: Transport>(
    session: &mut Session<T>,
    label: &str,
    target: Equatorial,
    at: DateTime<Utc>,
) -> Result<CalibrationStar, SessionError> {
    let step = session.read_actual_steps()?;
    let star = CalibrationStar::new(label, at, step, target);
    info!("captured {star}");
    Ok(star)
}

/// Show `target` in `style`.
pub fn point_at<T: Transport>(
    session: &mut Session<T>,
    encoder: &Encoder,
    model: &CalibrationModel,
    target: impl Into<Coord>,
    style: &PointerStyle,
    at: DateTime<Utc>,
) -> Result<EncodedPath, SessionError> {
    let (path, playback) = style.build(target);
    send_path(session, encoder, model, &path, playback, at)
}

/// Encode `path` for time `at` and run it.
pub fn send_path<T: Transport>(
    session: &mut Session<T>,
    encoder: &Encoder,
    model: &CalibrationModel,
    path: &Path,
    playback: Playback,
    at: DateTime<Utc>,
) -> Result<EncodedPath, SessionError> {
    let encoded = encoder.encode(path, model, at)?;
    session.go_path(&encoded, playback)?;
    Ok(encoded)
}

/// Move to raw stepper positions, laser on.
pub fn go_steps<T: Transport>(
    session: &mut Session<T>,
    encoder: &Encoder,
    step: Step,
) -> Result<(), SessionError> {
    // Raw steps never reach the solver; the model only has to exist.
    let model = CalibrationModel::new(session.profile().geometry);
    let encoded = encoder.encode(&path::point(step, true), &model, Utc::now())?;
    session.go_path(&encoded, Playback::Single)
}

/// Point straight up in the mount frame.
pub fn go_zenith<T: Transport>(session: &mut Session<T>, encoder: &Encoder) -> Result<(), SessionError> {
    let geometry = session.profile().geometry;
    let z = i64::from(geometry.step_at_zenith());
    go_steps(session, encoder, geometry.step(z, z))
}

/// Stepper position and the sky direction it points at.
pub fn read_direction<T: Transport>(
    session: &mut Session<T>,
    model: &CalibrationModel,
    at: DateTime<Utc>,
) -> Result<(Step, Equatorial), SessionError> {
    let step = session.read_actual_steps()?;
    Ok((step, model.equatorial_from_step(&step, at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::path::CircleStyle;
    use crate::path::LaserPattern;
    use crate::profile::DeviceProfile;
    use crate::protocol::ActualSteps;
    use crate::session::SessionState;
    use crate::test_util::{MockTransport, SAFE, epoch};

    fn setup(profile: DeviceProfile) -> (Session<MockTransport>, Encoder, CalibrationModel) {
        let encoder = Encoder::new(&profile).unwrap();
        let model = CalibrationModel { t0: epoch(), ..CalibrationModel::new(profile.geometry) };
        (Session::new(MockTransport::new(&SAFE), profile), encoder, model)
    }

    fn path_bytes(s: &Session<MockTransport>) -> Vec<u8> {
        s.transport()
            .writes
            .iter()
            .filter(|(e, _)| *e == Endpoint::Path)
            .flat_map(|(_, d)| d.iter().copied())
            .collect()
    }

    #[test]
    fn capture_reads_steps() {
        let (mut s, _, _) = setup(DeviceProfile::horus());
        s.transport_mut().steps = ActualSteps { fix: 700, mob: 900 }.encode();
        let star = capture_star(&mut s, "Vega", Equatorial::new(18.6, 38.8), epoch()).unwrap();
        assert_eq!(star.label(), "Vega");
        assert_eq!((star.step().fix(), star.step().mob()), (700, 900));
        assert_eq!(star.time(), epoch());
    }

    #[test]
    fn go_zenith_per_profile() {
        let (mut s, encoder, _) = setup(DeviceProfile::horus());
        go_zenith(&mut s, &encoder).unwrap();
        let bytes = path_bytes(&s);
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(word, 1 | (1019 << 10) | (1019 << 21));
        assert_eq!(s.state(), SessionState::Executing);

        let (mut s, encoder, _) = setup(DeviceProfile::star_projector());
        go_zenith(&mut s, &encoder).unwrap();
        let bytes = path_bytes(&s);
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(word, 1 | (510 << 10) | (510 << 21));
    }

    #[test]
    fn point_at_uses_style_playback() {
        let (mut s, encoder, model) = setup(DeviceProfile::horus());
        let target = model.equatorial_from_step(&model.geometry.step(1019, 850), epoch());
        let style = PointerStyle::AlternatingCircle(CircleStyle {
            aperture: 1.0_f64.to_radians(),
            increment: 30.0_f64.to_radians(),
            pattern: LaserPattern::SOLID,
            delay: 20,
        });
        let encoded = point_at(&mut s, &encoder, &model, target, &style, epoch()).unwrap();
        assert_eq!(encoded.segment_count(), 12);
        assert_eq!(path_bytes(&s).len(), 48);
        assert_eq!(s.transport().writes.last(), Some(&(Endpoint::Command, vec![4])));
    }

    #[test]
    fn read_direction_round_trip() {
        let (mut s, _, model) = setup(DeviceProfile::horus());
        s.transport_mut().steps = ActualSteps { fix: 300, mob: 1200 }.encode();
        let (step, eq) = read_direction(&mut s, &model, epoch()).unwrap();
        assert_eq!((step.fix(), step.mob()), (300, 1200));
        assert_eq!(eq, model.equatorial_from_step(&step, epoch()));
    }

    #[test]
    fn encode_errors_surface() {
        let (mut s, encoder, model) = setup(DeviceProfile::horus());
        let path = path::point(Step::new(1019, 800), true);
        let mut long = path.clone();
        long.add_segment(crate::path::Segment::new(Step::new(1019, 801), true, 4000));
        let err = send_path(&mut s, &encoder, &model, &long, Playback::Single, epoch()).unwrap_err();
        assert!(matches!(err, SessionError::Encode(_)));
        assert!(s.transport().writes.is_empty());
    }
}
