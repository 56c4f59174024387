//! Device lifecycle and state-change events.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel owned by
//! the protocol handler. Per-device event order matches wire arrival order.

use serde::Serialize;

/// Device category, as classified from `DRIVER_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceInterface {
    Mount,
    Camera,
    FilterWheel,
    Focuser,
    Gps,
    /// Capability interface: a device that can emit timed guide pulses.
    /// Attached on top of an existing category registration.
    GuideOutput,
}

/// Equatorial coordinates in hours (RA) and degrees (DEC).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EquatorialCoordinates {
    pub right_ascension: f64,
    pub declination: f64,
}

/// Geographic site coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GeographicCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

/// Everything the engine reports to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceEvent {
    /// A device was classified and registered under a category.
    Attached { device: String, interface: DeviceInterface },
    /// A device was removed, either by `delProperty` or handler close.
    Detached { device: String, interface: DeviceInterface },

    /// Connection handshake started.
    Connecting { device: String },
    Connected { device: String },
    Disconnected { device: String },
    /// The handshake ended with the `CONNECTION` vector in Alert.
    ConnectionFailed { device: String },

    /// A property vector was defined or updated.
    PropertyChanged { device: String, name: String },
    /// A single property vector was deleted by `delProperty`.
    PropertyDeleted { device: String, name: String },

    /// Free-text message from the server, routed to a device or broadcast.
    MessageReceived { device: String, message: String },

    MountSlewingChanged { device: String, slewing: bool },
    MountSlewFailed { device: String },
    MountTrackingChanged { device: String, tracking: bool },
    MountTrackModeChanged { device: String, mode: String },
    MountSlewRateChanged { device: String, rate: String },
    MountCoordinatesChanged { device: String, coordinates: EquatorialCoordinates },
    MountParkChanged { device: String, parked: bool },
    MountPierSideChanged { device: String, pier_side: String },

    GuidePulsingChanged { device: String, pulsing: bool },

    CameraExposureChanged { device: String, exposing: bool, remaining: f64 },
    CameraCoolerChanged { device: String, cooler_on: bool },
    CameraTemperatureChanged { device: String, temperature: f64 },

    FilterPositionChanged { device: String, position: u32 },
    FilterNamesChanged { device: String, names: Vec<String> },

    FocuserPositionChanged { device: String, position: f64 },
    FocuserMovingChanged { device: String, moving: bool },

    GeographicCoordinatesChanged { device: String, coordinates: GeographicCoordinates },
    TimeChanged { device: String, utc: String, offset: String },

    /// The transport closed abnormally (EOF or error). Never emitted for a
    /// graceful reader shutdown.
    ConnectionClosed,
}

impl DeviceEvent {
    /// The device this event concerns, when it concerns one.
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::Attached { device, .. }
            | Self::Detached { device, .. }
            | Self::Connecting { device }
            | Self::Connected { device }
            | Self::Disconnected { device }
            | Self::ConnectionFailed { device }
            | Self::PropertyChanged { device, .. }
            | Self::PropertyDeleted { device, .. }
            | Self::MessageReceived { device, .. }
            | Self::MountSlewingChanged { device, .. }
            | Self::MountSlewFailed { device }
            | Self::MountTrackingChanged { device, .. }
            | Self::MountTrackModeChanged { device, .. }
            | Self::MountSlewRateChanged { device, .. }
            | Self::MountCoordinatesChanged { device, .. }
            | Self::MountParkChanged { device, .. }
            | Self::MountPierSideChanged { device, .. }
            | Self::GuidePulsingChanged { device, .. }
            | Self::CameraExposureChanged { device, .. }
            | Self::CameraCoolerChanged { device, .. }
            | Self::CameraTemperatureChanged { device, .. }
            | Self::FilterPositionChanged { device, .. }
            | Self::FilterNamesChanged { device, .. }
            | Self::FocuserPositionChanged { device, .. }
            | Self::FocuserMovingChanged { device, .. }
            | Self::GeographicCoordinatesChanged { device, .. }
            | Self::TimeChanged { device, .. } => Some(device),
            Self::ConnectionClosed => None,
        }
    }
}
