use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Logical endpoints on the pointer controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Endpoint {
    /// One-byte commands and two-byte jogs (write).
    Command,
    /// Encoded path chunks (write).
    Path,
    /// Actual stepper positions (read).
    Steppers,
    /// Safety status flags (read).
    Status,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [Endpoint::Command, Endpoint::Path, Endpoint::Steppers, Endpoint::Status];
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "COMMAND"),
            Self::Path => write!(f, "PATH"),
            Self::Steppers => write!(f, "STEPPERS"),
            Self::Status => write!(f, "STATUS"),
        }
    }
}

/// Advertised name, service, and characteristic identifiers of one device.
///
/// Two endpoints may share an identifier: devices without a separate command
/// characteristic take commands on the path characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EndpointIds {
    pub device_name: String,
    pub service: String,
    pub command: String,
    pub path: String,
    pub steppers: String,
    pub status: String,
}

impl EndpointIds {
    pub fn horus() -> Self {
        Self {
            device_name: "Horus".into(),
            service: "643790f9-355d-435b-b407-43ebf47a86b4".into(),
            command: "f7b0afdf-b51e-4ba7-9513-48fb15497f22".into(),
            path: "f467e4e9-e2bc-422f-b8a3-aaaf6f92b999".into(),
            steppers: "6f23d28a-a3cb-4c5f-9d08-63fda0806966".into(),
            status: "4af8de6b-1f13-4dfb-b08e-0a4a97a983d5".into(),
        }
    }

    pub fn star_projector() -> Self {
        let path = "6309b82c-ff09-4957-a51b-b63aefd95b39";
        Self {
            device_name: "StarProjector".into(),
            service: "b75dac84-0213-4580-9213-c17f932a719c".into(),
            command: path.into(),
            path: path.into(),
            steppers: "34331e8c-74bd-4219-aab0-5909aeea3c4e".into(),
            status: "46425bca-0669-4f53-81bb-2bf67a3a1141".into(),
        }
    }

    pub fn uuid(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Command => &self.command,
            Endpoint::Path => &self.path,
            Endpoint::Steppers => &self.steppers,
            Endpoint::Status => &self.status,
        }
    }

    /// Endpoint for a characteristic identifier. Where two endpoints share
    /// one, the path endpoint wins.
    pub fn endpoint(&self, uuid: &str) -> Option<Endpoint> {
        [Endpoint::Path, Endpoint::Command, Endpoint::Steppers, Endpoint::Status]
            .into_iter()
            .find(|&e| self.uuid(e).eq_ignore_ascii_case(uuid))
    }
}
