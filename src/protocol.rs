//! INDI protocol message model.
//!
//! One type per wire message kind, exhaustively matched everywhere. Vector
//! messages come in three mutation kinds (`def*`, `set*`, `new*`) over the
//! switch/number/text/light value kinds; control messages cover property
//! deletion, free-text messages, `getProperties` and `enableBLOB`. BLOB
//! payloads are out of scope, but BLOB vector definitions are modeled so
//! they can be routed and acknowledged.

use serde::Serialize;

/// INDI protocol version announced in `getProperties`.
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Property vector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Idle" => Some(Self::Idle),
            "Ok" => Some(Self::Ok),
            "Busy" => Some(Self::Busy),
            "Alert" => Some(Self::Alert),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ok => "Ok",
            Self::Busy => "Busy",
            Self::Alert => "Alert",
        }
    }
}

/// Property vector permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertyPermission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl PropertyPermission {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ro" => Some(Self::ReadOnly),
            "wo" => Some(Self::WriteOnly),
            "rw" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::WriteOnly => "wo",
            Self::ReadWrite => "rw",
        }
    }
}

/// Selection rule for switch vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "OneOfMany" => Some(Self::OneOfMany),
            "AtMostOne" => Some(Self::AtMostOne),
            "AnyOfMany" => Some(Self::AnyOfMany),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneOfMany => "OneOfMany",
            Self::AtMostOne => "AtMostOne",
            Self::AnyOfMany => "AnyOfMany",
        }
    }
}

/// BLOB transfer policy requested via `enableBLOB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlobEnable {
    Never,
    Also,
    Only,
}

impl BlobEnable {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Never" => Some(Self::Never),
            "Also" => Some(Self::Also),
            "Only" => Some(Self::Only),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::Also => "Also",
            Self::Only => "Only",
        }
    }
}

// Element payloads. An element's name is unique within its vector.

#[derive(Debug, Clone, PartialEq)]
pub struct DefSwitch {
    pub name: String,
    pub label: String,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefNumber {
    pub name: String,
    pub label: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefText {
    pub name: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefLight {
    pub name: String,
    pub label: String,
    pub value: PropertyState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefBlob {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneSwitch {
    pub name: String,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneNumber {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneText {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneLight {
    pub name: String,
    pub value: PropertyState,
}

// Vector payloads.

#[derive(Debug, Clone, PartialEq)]
pub struct DefSwitchVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub rule: SwitchRule,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub elements: Vec<DefSwitch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefNumberVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub elements: Vec<DefNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefTextVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub elements: Vec<DefText>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefLightVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub timestamp: String,
    pub elements: Vec<DefLight>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefBlobVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub elements: Vec<DefBlob>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetSwitchVector {
    pub device: String,
    pub name: String,
    pub state: PropertyState,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub message: String,
    pub elements: Vec<OneSwitch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetNumberVector {
    pub device: String,
    pub name: String,
    pub state: PropertyState,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub message: String,
    pub elements: Vec<OneNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetTextVector {
    pub device: String,
    pub name: String,
    pub state: PropertyState,
    pub timeout: Option<f64>,
    pub timestamp: String,
    pub message: String,
    pub elements: Vec<OneText>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetLightVector {
    pub device: String,
    pub name: String,
    pub state: PropertyState,
    pub timestamp: String,
    pub message: String,
    pub elements: Vec<OneLight>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSwitchVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub elements: Vec<OneSwitch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNumberVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub elements: Vec<OneNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTextVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub elements: Vec<OneText>,
}

// Control messages.

/// `delProperty`. An empty `name` deletes the whole device.
#[derive(Debug, Clone, PartialEq)]
pub struct DelProperty {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub message: String,
}

/// Free-text `message` from a driver. An empty `device` is a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub device: String,
    pub timestamp: String,
    pub message: String,
}

/// `getProperties`. Empty `device`/`name` ask for everything.
#[derive(Debug, Clone, PartialEq)]
pub struct GetProperties {
    pub device: String,
    pub name: String,
    pub version: String,
}

/// `enableBLOB`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnableBlob {
    pub device: String,
    pub name: String,
    pub value: BlobEnable,
}

/// The closed set of INDI protocol messages.
#[derive(Debug, Clone, PartialEq)]
pub enum IndiMessage {
    DefSwitchVector(DefSwitchVector),
    DefNumberVector(DefNumberVector),
    DefTextVector(DefTextVector),
    DefLightVector(DefLightVector),
    DefBlobVector(DefBlobVector),
    SetSwitchVector(SetSwitchVector),
    SetNumberVector(SetNumberVector),
    SetTextVector(SetTextVector),
    SetLightVector(SetLightVector),
    NewSwitchVector(NewSwitchVector),
    NewNumberVector(NewNumberVector),
    NewTextVector(NewTextVector),
    DelProperty(DelProperty),
    Message(TextMessage),
    GetProperties(GetProperties),
    EnableBlob(EnableBlob),
}

impl IndiMessage {
    /// Target device name. Empty for broadcast messages.
    pub fn device(&self) -> &str {
        match self {
            Self::DefSwitchVector(m) => &m.device,
            Self::DefNumberVector(m) => &m.device,
            Self::DefTextVector(m) => &m.device,
            Self::DefLightVector(m) => &m.device,
            Self::DefBlobVector(m) => &m.device,
            Self::SetSwitchVector(m) => &m.device,
            Self::SetNumberVector(m) => &m.device,
            Self::SetTextVector(m) => &m.device,
            Self::SetLightVector(m) => &m.device,
            Self::NewSwitchVector(m) => &m.device,
            Self::NewNumberVector(m) => &m.device,
            Self::NewTextVector(m) => &m.device,
            Self::DelProperty(m) => &m.device,
            Self::Message(m) => &m.device,
            Self::GetProperties(m) => &m.device,
            Self::EnableBlob(m) => &m.device,
        }
    }

    /// Vector name, when the message addresses a property vector.
    pub fn vector_name(&self) -> Option<&str> {
        match self {
            Self::DefSwitchVector(m) => Some(&m.name),
            Self::DefNumberVector(m) => Some(&m.name),
            Self::DefTextVector(m) => Some(&m.name),
            Self::DefLightVector(m) => Some(&m.name),
            Self::DefBlobVector(m) => Some(&m.name),
            Self::SetSwitchVector(m) => Some(&m.name),
            Self::SetNumberVector(m) => Some(&m.name),
            Self::SetTextVector(m) => Some(&m.name),
            Self::SetLightVector(m) => Some(&m.name),
            Self::NewSwitchVector(m) => Some(&m.name),
            Self::NewNumberVector(m) => Some(&m.name),
            Self::NewTextVector(m) => Some(&m.name),
            _ => None,
        }
    }

    /// Vector state, when the message carries one.
    pub fn state(&self) -> Option<PropertyState> {
        match self {
            Self::DefSwitchVector(m) => Some(m.state),
            Self::DefNumberVector(m) => Some(m.state),
            Self::DefTextVector(m) => Some(m.state),
            Self::DefLightVector(m) => Some(m.state),
            Self::DefBlobVector(m) => Some(m.state),
            Self::SetSwitchVector(m) => Some(m.state),
            Self::SetNumberVector(m) => Some(m.state),
            Self::SetTextVector(m) => Some(m.state),
            Self::SetLightVector(m) => Some(m.state),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state() == Some(PropertyState::Busy)
    }

    /// True for vector definition messages.
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            Self::DefSwitchVector(_)
                | Self::DefNumberVector(_)
                | Self::DefTextVector(_)
                | Self::DefLightVector(_)
                | Self::DefBlobVector(_)
        )
    }

    /// Switch element name/value pairs, for any switch vector kind.
    pub fn switch_elements(&self) -> Option<Vec<(&str, bool)>> {
        match self {
            Self::DefSwitchVector(m) => {
                Some(m.elements.iter().map(|e| (e.name.as_str(), e.value)).collect())
            }
            Self::SetSwitchVector(m) => {
                Some(m.elements.iter().map(|e| (e.name.as_str(), e.value)).collect())
            }
            Self::NewSwitchVector(m) => {
                Some(m.elements.iter().map(|e| (e.name.as_str(), e.value)).collect())
            }
            _ => None,
        }
    }

    /// Number element name/value pairs, for any number vector kind.
    pub fn number_elements(&self) -> Option<Vec<(&str, f64)>> {
        match self {
            Self::DefNumberVector(m) => {
                Some(m.elements.iter().map(|e| (e.name.as_str(), e.value)).collect())
            }
            Self::SetNumberVector(m) => {
                Some(m.elements.iter().map(|e| (e.name.as_str(), e.value)).collect())
            }
            Self::NewNumberVector(m) => {
                Some(m.elements.iter().map(|e| (e.name.as_str(), e.value)).collect())
            }
            _ => None,
        }
    }

    /// Text element name/value pairs, for any text vector kind.
    pub fn text_elements(&self) -> Option<Vec<(&str, &str)>> {
        match self {
            Self::DefTextVector(m) => Some(
                m.elements.iter().map(|e| (e.name.as_str(), e.value.as_str())).collect(),
            ),
            Self::SetTextVector(m) => Some(
                m.elements.iter().map(|e| (e.name.as_str(), e.value.as_str())).collect(),
            ),
            Self::NewTextVector(m) => Some(
                m.elements.iter().map(|e| (e.name.as_str(), e.value.as_str())).collect(),
            ),
            _ => None,
        }
    }

    /// Value of the named switch element, if present.
    pub fn find_switch(&self, name: &str) -> Option<bool> {
        self.switch_elements()?.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    /// Value of the named number element, if present.
    pub fn find_number(&self, name: &str) -> Option<f64> {
        self.number_elements()?.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    /// Value of the named text element, if present.
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.text_elements()?
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| (*v).to_string())
    }

    /// Name of the first switch element that is On.
    pub fn first_on_switch(&self) -> Option<&str> {
        match self {
            Self::DefSwitchVector(m) => {
                m.elements.iter().find(|e| e.value).map(|e| e.name.as_str())
            }
            Self::SetSwitchVector(m) => {
                m.elements.iter().find(|e| e.value).map(|e| e.name.as_str())
            }
            Self::NewSwitchVector(m) => {
                m.elements.iter().find(|e| e.value).map(|e| e.name.as_str())
            }
            _ => None,
        }
    }
}

/// Standard INDI property and element names.
pub mod standard_properties {
    /// Connection control switch.
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Transport selection and serial parameters.
    pub const CONNECTION_MODE: &str = "CONNECTION_MODE";
    pub const CONNECTION_SERIAL: &str = "CONNECTION_SERIAL";
    pub const DEVICE_PORT: &str = "DEVICE_PORT";
    pub const DEVICE_PORT_VALUE: &str = "PORT";
    pub const DEVICE_BAUD_RATE: &str = "DEVICE_BAUD_RATE";

    /// Driver identity announcement.
    pub const DRIVER_INFO: &str = "DRIVER_INFO";
    pub const DRIVER_EXEC: &str = "DRIVER_EXEC";

    // Mount properties
    pub const EQUATORIAL_EOD_COORD: &str = "EQUATORIAL_EOD_COORD";
    pub const ON_COORD_SET: &str = "ON_COORD_SET";
    pub const TELESCOPE_TRACK_STATE: &str = "TELESCOPE_TRACK_STATE";
    pub const TELESCOPE_TRACK_MODE: &str = "TELESCOPE_TRACK_MODE";
    pub const TELESCOPE_PARK: &str = "TELESCOPE_PARK";
    pub const TELESCOPE_ABORT_MOTION: &str = "TELESCOPE_ABORT_MOTION";
    pub const TELESCOPE_MOTION_NS: &str = "TELESCOPE_MOTION_NS";
    pub const TELESCOPE_MOTION_WE: &str = "TELESCOPE_MOTION_WE";
    pub const TELESCOPE_SLEW_RATE: &str = "TELESCOPE_SLEW_RATE";
    pub const TELESCOPE_PIER_SIDE: &str = "TELESCOPE_PIER_SIDE";
    pub const TELESCOPE_TIMED_GUIDE_NS: &str = "TELESCOPE_TIMED_GUIDE_NS";
    pub const TELESCOPE_TIMED_GUIDE_WE: &str = "TELESCOPE_TIMED_GUIDE_WE";

    // Camera properties
    pub const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
    pub const CCD_EXPOSURE_VALUE: &str = "CCD_EXPOSURE_VALUE";
    pub const CCD_ABORT_EXPOSURE: &str = "CCD_ABORT_EXPOSURE";
    pub const CCD_TEMPERATURE: &str = "CCD_TEMPERATURE";
    pub const CCD_COOLER: &str = "CCD_COOLER";

    // Focuser properties
    pub const ABS_FOCUS_POSITION: &str = "ABS_FOCUS_POSITION";
    pub const FOCUS_ABSOLUTE_POSITION: &str = "FOCUS_ABSOLUTE_POSITION";
    pub const FOCUS_ABORT_MOTION: &str = "FOCUS_ABORT_MOTION";

    // Filter wheel properties
    pub const FILTER_SLOT: &str = "FILTER_SLOT";
    pub const FILTER_SLOT_VALUE: &str = "FILTER_SLOT_VALUE";
    pub const FILTER_NAME: &str = "FILTER_NAME";

    // Location and time
    pub const GEOGRAPHIC_COORD: &str = "GEOGRAPHIC_COORD";
    pub const TIME_UTC: &str = "TIME_UTC";
}

/// Common coordinate elements.
pub mod coord_elements {
    pub const RA: &str = "RA";
    pub const DEC: &str = "DEC";
    pub const LAT: &str = "LAT";
    pub const LONG: &str = "LONG";
    pub const ELEV: &str = "ELEV";
}
