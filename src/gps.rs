//! GPS device: read-only site coordinates and UTC time.

use crate::device::{Device, DeviceCore, MessageSender};
use crate::events::{DeviceEvent, GeographicCoordinates};
use crate::protocol::{coord_elements, standard_properties as props, IndiMessage};
use std::sync::Mutex;

pub const UTC: &str = "UTC";
pub const OFFSET: &str = "OFFSET";

#[derive(Debug, Default)]
struct GpsState {
    coordinates: GeographicCoordinates,
    utc: String,
    utc_offset: String,
}

#[derive(Debug)]
pub struct GpsDevice {
    core: DeviceCore,
    state: Mutex<GpsState>,
}

impl GpsDevice {
    pub fn new(name: String, sender: MessageSender) -> Self {
        Self { core: DeviceCore::new(name, sender), state: Mutex::new(GpsState::default()) }
    }

    pub fn coordinates(&self) -> GeographicCoordinates {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).coordinates
    }

    pub fn utc_time(&self) -> (String, String) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.utc.clone(), state.utc_offset.clone())
    }

    fn reduce(&self, message: &IndiMessage) {
        match message.vector_name() {
            Some(props::GEOGRAPHIC_COORD) => {
                if let (Some(latitude), Some(longitude)) = (
                    message.find_number(coord_elements::LAT),
                    message.find_number(coord_elements::LONG),
                ) {
                    let coordinates = GeographicCoordinates {
                        latitude,
                        longitude,
                        elevation: message.find_number(coord_elements::ELEV).unwrap_or(0.0),
                    };
                    self.state.lock().unwrap_or_else(|e| e.into_inner()).coordinates =
                        coordinates;
                    self.core.sender().fire(DeviceEvent::GeographicCoordinatesChanged {
                        device: self.core.name().to_string(),
                        coordinates,
                    });
                }
            }
            Some(props::TIME_UTC) => {
                if let Some(utc) = message.find_text(UTC) {
                    let offset = message.find_text(OFFSET).unwrap_or_default();
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.utc = utc.clone();
                    state.utc_offset = offset.clone();
                    drop(state);
                    self.core.sender().fire(DeviceEvent::TimeChanged {
                        device: self.core.name().to_string(),
                        utc,
                        offset,
                    });
                }
            }
            _ => {}
        }
    }
}

impl Device for GpsDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_message(&self, message: &IndiMessage) {
        self.core.handle_message(message);
        self.reduce(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::*;
    use crate::protocol::PropertyState;

    #[test]
    fn test_coordinates_and_time() {
        let (sender, _out, mut events) = sender();
        let gps = GpsDevice::new("GPS Simulator".to_string(), sender);

        gps.handle_message(&def_number_vector(
            "GPS Simulator",
            props::GEOGRAPHIC_COORD,
            PropertyState::Ok,
            &[
                (coord_elements::LAT, 51.5),
                (coord_elements::LONG, -0.12),
                (coord_elements::ELEV, 11.0),
            ],
        ));

        let coordinates = gps.coordinates();
        assert_eq!(coordinates.latitude, 51.5);
        assert_eq!(coordinates.longitude, -0.12);
        assert_eq!(coordinates.elevation, 11.0);

        gps.handle_message(&def_text_vector(
            "GPS Simulator",
            props::TIME_UTC,
            &[(UTC, "2024-01-01T00:00:00"), (OFFSET, "+00:00")],
        ));
        assert_eq!(
            gps.utc_time(),
            ("2024-01-01T00:00:00".to_string(), "+00:00".to_string())
        );

        let fired = drain_events(&mut events);
        assert!(fired
            .iter()
            .any(|e| matches!(e, DeviceEvent::GeographicCoordinatesChanged { .. })));
        assert!(fired.iter().any(|e| matches!(e, DeviceEvent::TimeChanged { .. })));
    }
}
