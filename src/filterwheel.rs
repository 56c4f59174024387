//! Filter wheel device: slot position, filter names, and movement.

use crate::device::{Device, DeviceCore, MessageSender};
use crate::events::DeviceEvent;
use crate::protocol::{standard_properties as props, IndiMessage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct FilterWheelDevice {
    core: DeviceCore,
    moving: AtomicBool,
    position: AtomicU32,
    names: Mutex<Vec<String>>,
}

impl FilterWheelDevice {
    pub fn new(name: String, sender: MessageSender) -> Self {
        Self {
            core: DeviceCore::new(name, sender),
            moving: AtomicBool::new(false),
            position: AtomicU32::new(0),
            names: Mutex::new(Vec::new()),
        }
    }

    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    /// Current slot, 1-based as on the wire.
    pub fn position(&self) -> u32 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn move_to(&self, slot: u32) {
        self.core.sender().send_new_number(
            self.core.name(),
            props::FILTER_SLOT,
            &[(props::FILTER_SLOT_VALUE, slot as f64)],
        );
    }

    pub fn set_filter_names(&self, names: &[&str]) {
        let elements: Vec<(String, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (format!("FILTER_SLOT_NAME_{}", i + 1), *name))
            .collect();
        let borrowed: Vec<(&str, &str)> =
            elements.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        self.core
            .sender()
            .send_new_text(self.core.name(), props::FILTER_NAME, &borrowed);
    }

    fn reduce(&self, message: &IndiMessage) {
        match message.vector_name() {
            Some(props::FILTER_SLOT) => {
                self.moving.store(message.is_busy(), Ordering::SeqCst);
                if let Some(slot) = message.find_number(props::FILTER_SLOT_VALUE) {
                    let position = slot.max(0.0) as u32;
                    self.position.store(position, Ordering::SeqCst);
                    self.core.sender().fire(DeviceEvent::FilterPositionChanged {
                        device: self.core.name().to_string(),
                        position,
                    });
                }
            }
            Some(props::FILTER_NAME) => {
                if let Some(elements) = message.text_elements() {
                    let names: Vec<String> =
                        elements.iter().map(|(_, v)| v.to_string()).collect();
                    *self.names.lock().unwrap_or_else(|e| e.into_inner()) = names.clone();
                    self.core.sender().fire(DeviceEvent::FilterNamesChanged {
                        device: self.core.name().to_string(),
                        names,
                    });
                }
            }
            _ => {}
        }
    }
}

impl Device for FilterWheelDevice {
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
    fn test_position_and_motion() {
        let (sender, mut out, mut events) = sender();
        let wheel = FilterWheelDevice::new("Filter Simulator".to_string(), sender);

        wheel.move_to(3);
        let sent = drain_outbound(&mut out);
        assert_eq!(sent[0].vector_name(), Some(props::FILTER_SLOT));
        assert_eq!(sent[0].find_number(props::FILTER_SLOT_VALUE), Some(3.0));

        wheel.handle_message(&def_number_vector(
            "Filter Simulator",
            props::FILTER_SLOT,
            PropertyState::Busy,
            &[(props::FILTER_SLOT_VALUE, 3.0)],
        ));
        assert!(wheel.is_moving());
        assert_eq!(wheel.position(), 3);
        assert!(drain_events(&mut events).contains(&DeviceEvent::FilterPositionChanged {
            device: "Filter Simulator".to_string(),
            position: 3,
        }));
    }

    #[test]
    fn test_filter_names() {
        let (sender, _out, mut events) = sender();
        let wheel = FilterWheelDevice::new("Filter Simulator".to_string(), sender);

        wheel.handle_message(&def_text_vector(
            "Filter Simulator",
            props::FILTER_NAME,
            &[
                ("FILTER_SLOT_NAME_1", "Red"),
                ("FILTER_SLOT_NAME_2", "Green"),
                ("FILTER_SLOT_NAME_3", "Blue"),
            ],
        ));

        assert_eq!(wheel.filter_names(), vec!["Red", "Green", "Blue"]);
        assert!(drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, DeviceEvent::FilterNamesChanged { .. })));
    }
}
