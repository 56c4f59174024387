//! Mount device: reduces telescope vectors into state and encodes the
//! mount command set.
//!
//! Vector semantics follow the upstream telescope driver interface:
//! `EQUATORIAL_EOD_COORD` Busy means slewing and Alert means the slew
//! failed; `ON_COORD_SET` advertises sync/goto support; the timed-guide
//! vectors advertise pulse guiding.

use crate::device::{Device, DeviceCore, GuideOutput, MessageSender};
use crate::events::{DeviceEvent, EquatorialCoordinates, GeographicCoordinates};
use crate::protocol::{coord_elements, standard_properties as props, IndiMessage, PropertyState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

pub const TRACK_ON: &str = "TRACK_ON";
pub const TRACK_OFF: &str = "TRACK_OFF";
pub const COORD_SYNC: &str = "SYNC";
pub const COORD_SLEW: &str = "SLEW";
pub const COORD_TRACK: &str = "TRACK";
pub const PARK: &str = "PARK";
pub const UNPARK: &str = "UNPARK";
pub const ABORT: &str = "ABORT";
pub const MOTION_NORTH: &str = "MOTION_NORTH";
pub const MOTION_SOUTH: &str = "MOTION_SOUTH";
pub const MOTION_WEST: &str = "MOTION_WEST";
pub const MOTION_EAST: &str = "MOTION_EAST";
pub const TIMED_GUIDE_N: &str = "TIMED_GUIDE_N";
pub const TIMED_GUIDE_S: &str = "TIMED_GUIDE_S";
pub const TIMED_GUIDE_W: &str = "TIMED_GUIDE_W";
pub const TIMED_GUIDE_E: &str = "TIMED_GUIDE_E";
pub const UTC: &str = "UTC";
pub const OFFSET: &str = "OFFSET";

/// Pier side, from `TELESCOPE_PIER_SIDE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PierSide {
    #[default]
    Neither,
    East,
    West,
}

impl PierSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neither => "NEITHER",
            Self::East => "EAST",
            Self::West => "WEST",
        }
    }
}

#[derive(Debug, Default)]
struct MountState {
    track_modes: Vec<String>,
    track_mode: String,
    slew_rates: Vec<String>,
    slew_rate: String,
    pier_side: PierSide,
    coordinates: EquatorialCoordinates,
    site: GeographicCoordinates,
    utc: String,
    utc_offset: String,
}

/// A registered mount.
#[derive(Debug)]
pub struct MountDevice {
    core: DeviceCore,
    slewing: AtomicBool,
    tracking: AtomicBool,
    parking: AtomicBool,
    parked: AtomicBool,
    can_abort: AtomicBool,
    can_sync: AtomicBool,
    can_goto: AtomicBool,
    can_park: AtomicBool,
    can_pulse_guide: AtomicBool,
    pulse_guiding: AtomicBool,
    state: Mutex<MountState>,
}

impl MountDevice {
    pub fn new(name: String, sender: MessageSender) -> Self {
        Self {
            core: DeviceCore::new(name, sender),
            slewing: AtomicBool::new(false),
            tracking: AtomicBool::new(false),
            parking: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            can_abort: AtomicBool::new(false),
            can_sync: AtomicBool::new(false),
            can_goto: AtomicBool::new(false),
            can_park: AtomicBool::new(false),
            can_pulse_guide: AtomicBool::new(false),
            pulse_guiding: AtomicBool::new(false),
            state: Mutex::new(MountState::default()),
        }
    }

    pub fn is_slewing(&self) -> bool {
        self.slewing.load(Ordering::SeqCst)
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    pub fn is_parking(&self) -> bool {
        self.parking.load(Ordering::SeqCst)
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn can_abort(&self) -> bool {
        self.can_abort.load(Ordering::SeqCst)
    }

    pub fn can_sync(&self) -> bool {
        self.can_sync.load(Ordering::SeqCst)
    }

    pub fn can_goto(&self) -> bool {
        self.can_goto.load(Ordering::SeqCst)
    }

    pub fn can_park(&self) -> bool {
        self.can_park.load(Ordering::SeqCst)
    }

    pub fn track_modes(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).track_modes.clone()
    }

    pub fn track_mode(&self) -> String {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).track_mode.clone()
    }

    pub fn slew_rates(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slew_rates.clone()
    }

    pub fn slew_rate(&self) -> String {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).slew_rate.clone()
    }

    pub fn pier_side(&self) -> PierSide {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pier_side
    }

    /// Current equatorial coordinates (RA hours, DEC degrees).
    pub fn coordinates(&self) -> EquatorialCoordinates {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).coordinates
    }

    pub fn site_coordinates(&self) -> GeographicCoordinates {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).site
    }

    fn fire(&self, event: DeviceEvent) {
        self.core.sender().fire(event);
    }

    fn device(&self) -> String {
        self.core.name().to_string()
    }

    // Commands.

    /// Turn sidereal tracking on or off. No-op when already there.
    pub fn tracking(&self, enable: bool) {
        if self.is_tracking() != enable {
            let element = if enable { TRACK_ON } else { TRACK_OFF };
            self.core.sender().send_new_switch(
                self.core.name(),
                props::TELESCOPE_TRACK_STATE,
                &[(element, true)],
            );
        }
    }

    /// Sync the mount's model to the given coordinates without moving.
    pub fn sync(&self, right_ascension: f64, declination: f64) {
        if self.can_sync() {
            self.send_coordinates(COORD_SYNC, right_ascension, declination);
        }
    }

    /// Slew and stop at the target.
    pub fn slew_to(&self, right_ascension: f64, declination: f64) {
        self.send_coordinates(COORD_SLEW, right_ascension, declination);
    }

    /// Slew and keep tracking the target.
    pub fn goto(&self, right_ascension: f64, declination: f64) {
        if self.can_goto() {
            self.send_coordinates(COORD_TRACK, right_ascension, declination);
        }
    }

    fn send_coordinates(&self, action: &str, right_ascension: f64, declination: f64) {
        let sender = self.core.sender();
        sender.send_new_switch(self.core.name(), props::ON_COORD_SET, &[(action, true)]);
        sender.send_new_number(
            self.core.name(),
            props::EQUATORIAL_EOD_COORD,
            &[(coord_elements::RA, right_ascension), (coord_elements::DEC, declination)],
        );
    }

    pub fn park(&self) {
        if self.can_park() {
            self.core
                .sender()
                .send_new_switch(self.core.name(), props::TELESCOPE_PARK, &[(PARK, true)]);
        }
    }

    pub fn unpark(&self) {
        if self.can_park() {
            self.core
                .sender()
                .send_new_switch(self.core.name(), props::TELESCOPE_PARK, &[(UNPARK, true)]);
        }
    }

    pub fn abort_motion(&self) {
        if self.can_abort() {
            self.core.sender().send_new_switch(
                self.core.name(),
                props::TELESCOPE_ABORT_MOTION,
                &[(ABORT, true)],
            );
        }
    }

    /// Select a track mode ("SIDEREAL", "LUNAR", ...). The wire element
    /// carries the TRACK_ prefix.
    pub fn set_track_mode(&self, mode: &str) {
        self.core.sender().send_new_switch(
            self.core.name(),
            props::TELESCOPE_TRACK_MODE,
            &[(&format!("TRACK_{mode}"), true)],
        );
    }

    /// Select a slew rate by element name. Unknown rates are dropped.
    pub fn set_slew_rate(&self, rate: &str) {
        let known = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slew_rates
            .iter()
            .any(|r| r == rate);
        if known {
            self.core.sender().send_new_switch(
                self.core.name(),
                props::TELESCOPE_SLEW_RATE,
                &[(rate, true)],
            );
        }
    }

    pub fn move_north(&self, enabled: bool) {
        self.send_motion(props::TELESCOPE_MOTION_NS, MOTION_NORTH, MOTION_SOUTH, enabled);
    }

    pub fn move_south(&self, enabled: bool) {
        self.send_motion(props::TELESCOPE_MOTION_NS, MOTION_SOUTH, MOTION_NORTH, enabled);
    }

    pub fn move_west(&self, enabled: bool) {
        self.send_motion(props::TELESCOPE_MOTION_WE, MOTION_WEST, MOTION_EAST, enabled);
    }

    pub fn move_east(&self, enabled: bool) {
        self.send_motion(props::TELESCOPE_MOTION_WE, MOTION_EAST, MOTION_WEST, enabled);
    }

    fn send_motion(&self, vector: &str, direction: &str, opposite: &str, enabled: bool) {
        let sender = self.core.sender();
        if enabled {
            sender.send_new_switch(
                self.core.name(),
                vector,
                &[(direction, true), (opposite, false)],
            );
        } else {
            sender.send_new_switch(self.core.name(), vector, &[(direction, false)]);
        }
    }

    /// Set the site coordinates on the mount.
    pub fn set_site_coordinates(&self, latitude: f64, longitude: f64, elevation: f64) {
        self.core.sender().send_new_number(
            self.core.name(),
            props::GEOGRAPHIC_COORD,
            &[
                (coord_elements::LAT, latitude),
                (coord_elements::LONG, longitude),
                (coord_elements::ELEV, elevation),
            ],
        );
    }

    /// Set the mount's UTC time and offset (offset as "+HH:MM").
    pub fn set_time(&self, utc: &str, offset: &str) {
        self.core.sender().send_new_text(
            self.core.name(),
            props::TIME_UTC,
            &[(UTC, utc), (OFFSET, offset)],
        );
    }

    fn send_guide_pulse(&self, vector: &str, active: &str, idle: &str, duration_ms: f64) {
        if self.can_pulse_guide.load(Ordering::SeqCst) {
            self.core.sender().send_new_number(
                self.core.name(),
                vector,
                &[(active, duration_ms), (idle, 0.0)],
            );
        }
    }

    // Inbound reduction.

    fn reduce(&self, message: &IndiMessage) {
        let Some(name) = message.vector_name() else { return };

        match name {
            props::TELESCOPE_SLEW_RATE => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let (true, Some(elements)) = (message.is_definition(), message.switch_elements())
                {
                    state.slew_rates = elements.iter().map(|(n, _)| n.to_string()).collect();
                }
                if let Some(rate) = message.first_on_switch() {
                    if state.slew_rate != rate {
                        state.slew_rate = rate.to_string();
                        drop(state);
                        self.fire(DeviceEvent::MountSlewRateChanged {
                            device: self.device(),
                            rate: rate.to_string(),
                        });
                    }
                }
            }
            props::TELESCOPE_TRACK_MODE => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let (true, Some(elements)) = (message.is_definition(), message.switch_elements())
                {
                    state.track_modes = elements
                        .iter()
                        .map(|(n, _)| n.trim_start_matches("TRACK_").to_string())
                        .collect();
                }
                if let Some(mode) = message.first_on_switch() {
                    let mode = mode.trim_start_matches("TRACK_").to_string();
                    state.track_mode = mode.clone();
                    drop(state);
                    self.fire(DeviceEvent::MountTrackModeChanged { device: self.device(), mode });
                }
            }
            props::TELESCOPE_TRACK_STATE => {
                let tracking = message.first_on_switch() == Some(TRACK_ON);
                self.tracking.store(tracking, Ordering::SeqCst);
                self.fire(DeviceEvent::MountTrackingChanged { device: self.device(), tracking });
            }
            props::TELESCOPE_PIER_SIDE => {
                let pier_side = match message.first_on_switch() {
                    None => PierSide::Neither,
                    Some("PIER_WEST") => PierSide::West,
                    Some(_) => PierSide::East,
                };
                self.state.lock().unwrap_or_else(|e| e.into_inner()).pier_side = pier_side;
                self.fire(DeviceEvent::MountPierSideChanged {
                    device: self.device(),
                    pier_side: pier_side.as_str().to_string(),
                });
            }
            props::TELESCOPE_PARK => {
                if message.is_definition() {
                    self.can_park.store(true, Ordering::SeqCst);
                }
                self.parking.store(message.is_busy(), Ordering::SeqCst);
                let parked = message.first_on_switch() == Some(PARK);
                self.parked.store(parked, Ordering::SeqCst);
                self.fire(DeviceEvent::MountParkChanged { device: self.device(), parked });
            }
            props::TELESCOPE_ABORT_MOTION => {
                self.can_abort.store(true, Ordering::SeqCst);
            }
            props::ON_COORD_SET => {
                if let Some(elements) = message.switch_elements() {
                    self.can_sync.store(
                        elements.iter().any(|(n, _)| *n == COORD_SYNC),
                        Ordering::SeqCst,
                    );
                    self.can_goto.store(
                        elements.iter().any(|(n, _)| *n == COORD_TRACK),
                        Ordering::SeqCst,
                    );
                }
            }
            props::EQUATORIAL_EOD_COORD => {
                if message.state() == Some(PropertyState::Alert) {
                    self.fire(DeviceEvent::MountSlewFailed { device: self.device() });
                }

                let slewing = message.is_busy();
                if self.slewing.swap(slewing, Ordering::SeqCst) != slewing {
                    self.fire(DeviceEvent::MountSlewingChanged { device: self.device(), slewing });
                }

                if let (Some(ra), Some(dec)) = (
                    message.find_number(coord_elements::RA),
                    message.find_number(coord_elements::DEC),
                ) {
                    let coordinates =
                        EquatorialCoordinates { right_ascension: ra, declination: dec };
                    self.state.lock().unwrap_or_else(|e| e.into_inner()).coordinates = coordinates;
                    self.fire(DeviceEvent::MountCoordinatesChanged {
                        device: self.device(),
                        coordinates,
                    });
                }
            }
            props::TELESCOPE_TIMED_GUIDE_NS | props::TELESCOPE_TIMED_GUIDE_WE => {
                if message.is_definition() && !self.can_pulse_guide.load(Ordering::SeqCst) {
                    self.can_pulse_guide.store(true, Ordering::SeqCst);
                    debug!(device = self.core.name(), "pulse guide capability detected");
                }

                if self.can_pulse_guide.load(Ordering::SeqCst) {
                    let pulsing = message.is_busy();
                    if self.pulse_guiding.swap(pulsing, Ordering::SeqCst) != pulsing {
                        self.fire(DeviceEvent::GuidePulsingChanged {
                            device: self.device(),
                            pulsing,
                        });
                    }
                }
            }
            props::GEOGRAPHIC_COORD => {
                if let (Some(latitude), Some(longitude)) = (
                    message.find_number(coord_elements::LAT),
                    message.find_number(coord_elements::LONG),
                ) {
                    let site = GeographicCoordinates {
                        latitude,
                        longitude,
                        elevation: message.find_number(coord_elements::ELEV).unwrap_or(0.0),
                    };
                    self.state.lock().unwrap_or_else(|e| e.into_inner()).site = site;
                    self.fire(DeviceEvent::GeographicCoordinatesChanged {
                        device: self.device(),
                        coordinates: site,
                    });
                }
            }
            props::TIME_UTC => {
                if let Some(utc) = message.find_text(UTC) {
                    let offset = message.find_text(OFFSET).unwrap_or_default();
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.utc = utc.clone();
                    state.utc_offset = offset.clone();
                    drop(state);
                    self.fire(DeviceEvent::TimeChanged { device: self.device(), utc, offset });
                }
            }
            _ => {}
        }
    }
}

impl Device for MountDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_message(&self, message: &IndiMessage) {
        self.core.handle_message(message);
        self.reduce(message);
    }
}

impl GuideOutput for MountDevice {
    fn can_pulse_guide(&self) -> bool {
        self.can_pulse_guide.load(Ordering::SeqCst)
    }

    fn is_pulse_guiding(&self) -> bool {
        self.pulse_guiding.load(Ordering::SeqCst)
    }

    fn guide_north(&self, duration_ms: f64) {
        self.send_guide_pulse(
            props::TELESCOPE_TIMED_GUIDE_NS,
            TIMED_GUIDE_N,
            TIMED_GUIDE_S,
            duration_ms,
        );
    }

    fn guide_south(&self, duration_ms: f64) {
        self.send_guide_pulse(
            props::TELESCOPE_TIMED_GUIDE_NS,
            TIMED_GUIDE_S,
            TIMED_GUIDE_N,
            duration_ms,
        );
    }

    fn guide_east(&self, duration_ms: f64) {
        self.send_guide_pulse(
            props::TELESCOPE_TIMED_GUIDE_WE,
            TIMED_GUIDE_E,
            TIMED_GUIDE_W,
            duration_ms,
        );
    }

    fn guide_west(&self, duration_ms: f64) {
        self.send_guide_pulse(
            props::TELESCOPE_TIMED_GUIDE_WE,
            TIMED_GUIDE_W,
            TIMED_GUIDE_E,
            duration_ms,
        );
    }
}
