//! Command session with a pointer controller over an abstract link.
//!
//! The link is a [`Transport`]: write bytes to an endpoint, read bytes from
//! one. The session owns safety: every command and every path transmission
//! is preceded by a fresh status read, and refused unless the device reports
//! a safe height and level (or the operator has switched to unsafe mode).

use std::fmt;
use std::io;

use log::{debug, info, warn};
use thiserror::Error;

use crate::chunk::Chunker;
use crate::coord::Step;
use crate::encode::{EncodeError, EncodedPath};
use crate::endpoint::Endpoint;
use crate::error::WireError;
use crate::profile::DeviceProfile;
use crate::protocol::{ActualSteps, Command, DeviceStatus, Jog, Playback};

/// Link-level failure reported by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is down")]
    LinkDown,

    #[error("endpoint {0} not available")]
    NoEndpoint(Endpoint),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Byte-level access to the device endpoints.
///
/// Calls block until the write is acknowledged or the read returns.
pub trait Transport {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError>;
    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(endpoint, data)
    }

    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, TransportError> {
        (**self).read(endpoint)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(endpoint, data)
    }

    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, TransportError> {
        (**self).read(endpoint)
    }
}

/// Link state as seen by the session.
///
/// A session is created over a link the caller has already opened, so it
/// starts `Connected`. It becomes `Disconnected` only when the transport
/// fails, and [`Session::reconnect`] brings it back once the caller has
/// restored the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The transport failed; every operation but `reconnect` is refused.
    Disconnected,
    Connected,
    /// A path was started and the device has not reported idle since.
    Executing,
}

/// Events worth telling the operator about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The link failed; the session is disconnected.
    Disconnected,
    /// The device switched to unsafe mode.
    UnsafeModeEntered,
    /// The mount moved since calibration.
    Tilted,
    /// A path with segments below the horizon was sent.
    PathClipped,
}

/// Errors from session operations.
#[derive(Debug)]
pub enum SessionError {
    /// The link failed. The session is now disconnected.
    Transport(TransportError),
    /// A readback could not be decoded.
    Wire(WireError),
    /// A path could not be encoded for this device.
    Encode(EncodeError),
    /// The device refused commands in its current state.
    Unsafe(DeviceStatus),
    /// Nothing to send.
    EmptyPath,
    /// The device profile has no byte for this command.
    Unsupported(Command),
    /// Operation attempted while disconnected.
    NotConnected,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "transport error: {e}"),
            SessionError::Wire(e) => write!(f, "wire error: {e}"),
            SessionError::Encode(e) => write!(f, "encode error: {e}"),
            SessionError::Unsafe(status) => write!(f, "device not safe for commands: {status}"),
            SessionError::EmptyPath => write!(f, "encoded path is empty"),
            SessionError::Unsupported(cmd) => write!(f, "{cmd} not supported by this device"),
            SessionError::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Transport(e) => Some(e),
            SessionError::Wire(e) => Some(e),
            SessionError::Encode(e) => Some(e),
            SessionError::Unsafe(_)
            | SessionError::EmptyPath
            | SessionError::Unsupported(_)
            | SessionError::NotConnected => None,
        }
    }
}

impl From<WireError> for SessionError {
    fn from(e: WireError) -> Self {
        SessionError::Wire(e)
    }
}

impl From<EncodeError> for SessionError {
    fn from(e: EncodeError) -> Self {
        SessionError::Encode(e)
    }
}

/// A connected pointer controller.
///
/// Synchronous and single-flight: one request at a time through `&mut self`.
pub struct Session<T> {
    transport: T,
    profile: DeviceProfile,
    chunker: Chunker,
    state: SessionState,
    status: Option<DeviceStatus>,
    /// Called for every notice, right when it is raised.
    on_notice: Option<Box<dyn FnMut(Notice)>>,
    /// Called before every endpoint write.
    on_write: Option<Box<dyn FnMut(Endpoint, &[u8])>>,
}

impl<T: Transport> Session<T> {
    /// Wrap a link that is already up. No I/O happens until the first
    /// operation.
    pub fn new(transport: T, profile: DeviceProfile) -> Self {
        let chunker = Chunker::new(profile.max_chunk);
        Self {
            transport,
            profile,
            chunker,
            state: SessionState::Connected,
            status: None,
            on_notice: None,
            on_write: None,
        }
    }

    pub fn set_on_notice(&mut self, f: impl FnMut(Notice) + 'static) {
        self.on_notice = Some(Box::new(f));
    }

    pub fn set_on_write(&mut self, f: impl FnMut(Endpoint, &[u8]) + 'static) {
        self.on_write = Some(Box::new(f));
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Last status read, if any.
    pub fn status(&self) -> Option<DeviceStatus> {
        self.status
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Mark the link as restored and read the status once.
    pub fn reconnect(&mut self) -> Result<DeviceStatus, SessionError> {
        self.state = SessionState::Connected;
        self.status = None;
        self.refresh_status()
    }

    /// Read and decode the status, raising notices for changes.
    pub fn refresh_status(&mut self) -> Result<DeviceStatus, SessionError> {
        let raw = self.read(Endpoint::Status)?;
        let status = DeviceStatus::decode(&raw)?;
        let prev = self.status.replace(status).unwrap_or_default();

        if status.unsafe_mode && !prev.unsafe_mode {
            warn!("{}: unsafe mode entered", self.profile.name());
            self.notify(Notice::UnsafeModeEntered);
        }
        if status.tilted && !prev.tilted {
            warn!("{}: mount tilted, calibration may be stale", self.profile.name());
            self.notify(Notice::Tilted);
        }
        if self.state == SessionState::Executing && status.idle {
            self.state = SessionState::Connected;
        }
        Ok(status)
    }

    /// Store `path` on the device and start it.
    pub fn go_path(&mut self, path: &EncodedPath, playback: Playback) -> Result<(), SessionError> {
        let reset = self.command_bytes(Command::ResetPath)?;
        let exec = self.command_bytes(Command::Execute(playback))?;
        if path.is_empty() {
            return Err(SessionError::EmptyPath);
        }
        self.gate()?;

        if path.clipped() {
            warn!("sending path clipped at the horizon");
            self.notify(Notice::PathClipped);
        }
        self.write(Endpoint::Command, &reset)?;
        let bytes = path.to_bytes();
        let chunks = self.chunker.count(bytes.len());
        for (i, chunk) in self.chunker.split(&bytes).enumerate() {
            debug!("path chunk {}/{chunks}: {} bytes", i + 1, chunk.len());
            self.write(Endpoint::Path, chunk)?;
        }
        self.write(Endpoint::Command, &exec)?;
        self.state = SessionState::Executing;
        info!(
            "{}: {} segments sent in {chunks} chunks, {}",
            self.profile.name(),
            path.segment_count(),
            Command::Execute(playback)
        );
        Ok(())
    }

    pub fn switch_laser(&mut self) -> Result<(), SessionError> {
        self.send(Command::SwitchLaser)
    }

    /// Take the current position as the zenith reference.
    pub fn set_zenith(&mut self) -> Result<(), SessionError> {
        self.send(Command::SetZenith)
    }

    /// Current stepper positions.
    pub fn read_actual_steps(&mut self) -> Result<Step, SessionError> {
        if self.profile.request_steps {
            let request = self.command_bytes(Command::ReadActualSteps)?;
            self.write(Endpoint::Command, &request)?;
        }
        let raw = self.read(Endpoint::Steppers)?;
        let steps = ActualSteps::decode(&raw)?;
        Ok(steps.to_step(self.profile.geometry))
    }

    /// Move the steppers by hand.
    pub fn jog(&mut self, jog: Jog) -> Result<(), SessionError> {
        self.gate()?;
        self.write(Endpoint::Command, &jog.encode())
    }

    /// Send a one-byte command after the safety gate.
    pub fn send(&mut self, command: Command) -> Result<(), SessionError> {
        let bytes = self.command_bytes(command)?;
        self.gate()?;
        debug!("{}: {command}", self.profile.name());
        self.write(Endpoint::Command, &bytes)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn gate(&mut self) -> Result<(), SessionError> {
        let status = self.refresh_status()?;
        if status.commands_allowed() {
            Ok(())
        } else {
            warn!("{}: commands refused, {status}", self.profile.name());
            Err(SessionError::Unsafe(status))
        }
    }

    fn command_bytes(&self, command: Command) -> Result<Vec<u8>, SessionError> {
        self.profile.commands.encode(command).ok_or(SessionError::Unsupported(command))
    }

    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), SessionError> {
        self.ensure_connected()?;
        if let Some(cb) = self.on_write.as_mut() {
            cb(endpoint, data);
        }
        let result = self.transport.write(endpoint, data);
        result.map_err(|e| self.fail(e))
    }

    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, SessionError> {
        self.ensure_connected()?;
        let result = self.transport.read(endpoint);
        result.map_err(|e| self.fail(e))
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Disconnected => Err(SessionError::NotConnected),
            SessionState::Connected | SessionState::Executing => Ok(()),
        }
    }

    fn fail(&mut self, e: TransportError) -> SessionError {
        warn!("{}: link failed: {e}", self.profile.name());
        self.state = SessionState::Disconnected;
        self.notify(Notice::Disconnected);
        SessionError::Transport(e)
    }

    fn notify(&mut self, notice: Notice) {
        if let Some(cb) = self.on_notice.as_mut() {
            cb(notice);
        }
    }
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.profile.name())
            .field("state", &self.state)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::calib::CalibrationModel;
    use crate::encode::Encoder;
    use crate::path::{Path, Segment};
    use crate::protocol::JogDirection;
    use crate::test_util::{MockTransport, SAFE, epoch};

    const UNSAFE_HEIGHT: [u8; 6] = [1, 0, 0, 0, 1, 0];
    const UNSAFE_MODE: [u8; 6] = [1, 0, 1, 0, 0, 0];

    fn session(status: [u8; 6]) -> Session<MockTransport> {
        Session::new(MockTransport::new(&status), DeviceProfile::horus())
    }

    fn encoded(segments: usize) -> EncodedPath {
        let profile = DeviceProfile::horus();
        let path: Path = (0..segments)
            .map(|i| Segment::new(profile.geometry.step(1019, 700 + (i % 300) as i64), true, 1))
            .collect();
        let model = CalibrationModel::new(profile.geometry);
        Encoder::new(&profile).unwrap().encode(&path, &model, epoch()).unwrap()
    }

    fn record_notices<T: Transport>(s: &mut Session<T>) -> Rc<RefCell<Vec<Notice>>> {
        let notices = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&notices);
        s.set_on_notice(move |n| sink.borrow_mut().push(n));
        notices
    }

    #[test]
    fn go_path_write_order() {
        let mut s = session(SAFE);
        let path = encoded(300);
        s.go_path(&path, Playback::CyclicForward).unwrap();
        assert_eq!(s.state(), SessionState::Executing);

        let writes = &s.transport().writes;
        assert_eq!(writes.first(), Some(&(Endpoint::Command, vec![1])));
        assert_eq!(writes.last(), Some(&(Endpoint::Command, vec![3])));
        let chunks: Vec<&[u8]> =
            writes.iter().filter(|(e, _)| *e == Endpoint::Path).map(|(_, d)| d.as_slice()).collect();
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![512, 512, 176]);
        assert_eq!(chunks.concat(), path.to_bytes());
    }

    #[test]
    fn gate_blocks_until_unsafe_mode() {
        let mut s = session(UNSAFE_HEIGHT);
        let notices = record_notices(&mut s);
        let path = encoded(3);

        let err = s.go_path(&path, Playback::Single).unwrap_err();
        assert!(matches!(err, SessionError::Unsafe(st) if !st.safe_height));
        assert!(s.transport().writes.is_empty());
        assert!(matches!(s.switch_laser(), Err(SessionError::Unsafe(_))));
        assert!(matches!(s.jog(Jog::new(JogDirection::Forward, JogDirection::Hold, 4)), Err(SessionError::Unsafe(_))));
        assert!(s.transport().writes.is_empty());
        assert_eq!(s.state(), SessionState::Connected);

        s.transport_mut().status = UNSAFE_MODE.to_vec();
        s.go_path(&path, Playback::Single).unwrap();
        let writes = &s.transport().writes;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], (Endpoint::Command, vec![1]));
        assert_eq!(writes[1].0, Endpoint::Path);
        assert_eq!(writes[2], (Endpoint::Command, vec![2]));

        s.switch_laser().unwrap();
        assert_eq!(*notices.borrow(), vec![Notice::UnsafeModeEntered]);
    }

    #[test]
    fn empty_path_is_refused() {
        let mut s = session(SAFE);
        let profile = DeviceProfile::horus();
        let below: Path = [Segment::new(profile.geometry.step(0, 1019), true, 0)].into_iter().collect();
        let model = CalibrationModel::new(profile.geometry);
        let path = Encoder::new(&profile).unwrap().encode(&below, &model, epoch()).unwrap();
        assert!(matches!(s.go_path(&path, Playback::Single), Err(SessionError::EmptyPath)));
        assert_eq!(s.transport().reads, 0);
    }

    #[test]
    fn clipped_path_raises_notice() {
        let mut s = session(SAFE);
        let notices = record_notices(&mut s);
        let profile = DeviceProfile::horus();
        let path: Path = [(0, 1019), (1019, 800)]
            .iter()
            .map(|&(f, m)| Segment::new(profile.geometry.step(f, m), true, 5))
            .collect();
        let model = CalibrationModel::new(profile.geometry);
        let encoded = Encoder::new(&profile).unwrap().encode(&path, &model, epoch()).unwrap();
        s.go_path(&encoded, Playback::Single).unwrap();
        assert_eq!(*notices.borrow(), vec![Notice::PathClipped]);
    }

    #[test]
    fn unsupported_playback() {
        let mut s = Session::new(MockTransport::new(&SAFE), DeviceProfile::star_projector());
        let err = s.go_path(&encoded(1), Playback::CyclicAlternate).unwrap_err();
        assert!(matches!(err, SessionError::Unsupported(Command::Execute(Playback::CyclicAlternate))));
        assert_eq!(err.to_string(), "REVERSE_PATH not supported by this device");
        assert!(s.transport().writes.is_empty());
    }

    #[test]
    fn lifecycle_over_an_open_link() {
        let mut s = session(SAFE);
        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(s.transport().reads, 0);
        assert!(s.transport().writes.is_empty());

        s.go_path(&encoded(3), Playback::Single).unwrap();
        assert_eq!(s.state(), SessionState::Executing);
        s.refresh_status().unwrap();
        assert_eq!(s.state(), SessionState::Connected);

        s.transport_mut().fail_writes_after = Some(0);
        assert!(s.switch_laser().is_err());
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(matches!(s.refresh_status(), Err(SessionError::NotConnected)));

        s.transport_mut().fail_writes_after = None;
        s.reconnect().unwrap();
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn transport_failure_disconnects() {
        let mut s = session(SAFE);
        let notices = record_notices(&mut s);
        s.transport_mut().fail_writes_after = Some(1);
        let err = s.go_path(&encoded(5), Playback::Single).unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::LinkDown)));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(*notices.borrow(), vec![Notice::Disconnected]);

        assert!(matches!(s.set_zenith(), Err(SessionError::NotConnected)));
        s.transport_mut().fail_writes_after = None;
        s.reconnect().unwrap();
        s.set_zenith().unwrap();
        assert_eq!(s.transport().writes.last(), Some(&(Endpoint::Command, vec![6])));
    }

    #[test]
    fn executing_until_idle() {
        let mut s = session([0, 1, 0, 1, 1, 0]);
        s.go_path(&encoded(1), Playback::Single).unwrap();
        assert_eq!(s.state(), SessionState::Executing);
        s.refresh_status().unwrap();
        assert_eq!(s.state(), SessionState::Executing);
        s.transport_mut().status = SAFE.to_vec();
        s.refresh_status().unwrap();
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn tilt_notice_is_one_shot() {
        let mut s = session([1, 0, 0, 1, 1, 1]);
        let notices = record_notices(&mut s);
        s.refresh_status().unwrap();
        s.refresh_status().unwrap();
        assert_eq!(*notices.borrow(), vec![Notice::Tilted]);
        assert!(s.status().is_some_and(|st| st.tilted));
    }

    #[test]
    fn read_steps_per_profile() {
        let mut s = session(SAFE);
        s.transport_mut().steps = vec![0x01, 0xF4, 0x03, 0xFB];
        let step = s.read_actual_steps().unwrap();
        assert_eq!((step.fix(), step.mob()), (500, 1019));
        assert!(s.transport().writes.is_empty());

        let mut s = Session::new(MockTransport::new(&SAFE), DeviceProfile::star_projector());
        s.transport_mut().steps = vec![0x00, 0x64, 0x01, 0xFE];
        let step = s.read_actual_steps().unwrap();
        assert_eq!((step.fix(), step.mob()), (100, 510));
        assert_eq!(step.geometry().step_at_zenith(), 510);
        assert_eq!(s.transport().writes, vec![(Endpoint::Command, vec![6])]);
    }

    #[test]
    fn short_readback_is_wire_error() {
        let mut s = session(SAFE);
        s.transport_mut().steps = vec![0x01];
        assert!(matches!(s.read_actual_steps(), Err(SessionError::Wire(_))));
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn jog_writes_two_bytes() {
        let mut s = session(SAFE);
        s.jog(Jog::new(JogDirection::Backward, JogDirection::Forward, 20)).unwrap();
        assert_eq!(s.transport().writes, vec![(Endpoint::Command, vec![107, 147])]);
    }
}
