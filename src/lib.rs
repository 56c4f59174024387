//! INDI Protocol Client Engine
//!
//! Client-side engine for the INDI astronomical instrument-control
//! protocol: a typed message model, the XML wire codec, the protocol
//! reader/writer tasks, and a device registry that classifies devices
//! from their `DRIVER_INFO` announcements.
//!
//! ## Features
//!
//! - Closed `IndiMessage` model covering definitions, updates, requests
//!   and control messages
//! - Streaming XML codec that isolates malformed messages and keeps
//!   decoding
//! - Reordering queue for messages that arrive before their device's
//!   identity is known, with bounded retry
//! - Device abstraction with a connect/disconnect state machine and
//!   serial transport validation
//! - Full mount support (slew, sync, goto, park, track modes, pulse
//!   guiding) plus camera, filter wheel, focuser and GPS devices
//! - Event fan-out to any number of listeners
//!
//! The engine is transport-agnostic: hand [`ProtocolReader`] and
//! [`spawn_writer`] the two halves of any async byte stream.

mod camera;
mod codec;
mod device;
mod drivers;
mod error;
mod events;
mod filterwheel;
mod focuser;
mod gps;
mod handler;
mod mount;
mod protocol;
mod reader;

pub use camera::CameraDevice;
pub use codec::{decode_str, encode, MessageBuilder, MessageStream};
pub use device::{
    Device, DeviceCore, GuideOutput, MessageSender, PropertyItem, PropertyValue, PropertyVector,
    SerialSettings, SUPPORTED_BAUD_RATES,
};
pub use drivers::DriverTable;
pub use error::{IndiError, IndiResult};
pub use events::{DeviceEvent, DeviceInterface, EquatorialCoordinates, GeographicCoordinates};
pub use filterwheel::FilterWheelDevice;
pub use focuser::FocuserDevice;
pub use gps::GpsDevice;
pub use handler::{ProtocolHandler, MESSAGE_RETRY_LIMIT};
pub use mount::{MountDevice, PierSide};
pub use protocol::*;
pub use reader::{spawn_writer, ProtocolReader};

/// Default INDI server port
pub const INDI_DEFAULT_PORT: u16 = 7624;
