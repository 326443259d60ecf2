pub mod calib;
pub mod chunk;
pub mod codec;
pub mod coord;
pub mod encode;
pub mod endpoint;
pub mod error;
pub mod optimize;
pub mod path;
pub mod profile;
pub mod protocol;
pub mod seq;
pub mod session;
pub mod solve;

#[cfg(test)]
mod test_util;

pub use calib::{Calibration, CalibrationError, CalibrationModel, CalibrationStar, Calibrator, FitConfig};
pub use coord::{Equatorial, Spherical, Step, StepGeometry};
pub use encode::{EncodeError, EncodedPath, Encoder};
pub use endpoint::{Endpoint, EndpointIds};
pub use error::WireError;
pub use path::{Coord, Path, PointerStyle, Segment};
pub use profile::{DeviceProfile, HorizonCheck};
pub use protocol::{Command, DeviceStatus, Jog, JogDirection, Playback};
pub use session::{Notice, Session, SessionError, SessionState, Transport, TransportError};
pub use solve::{Solution, Solver, SolverConfig, step_from_equatorial};
