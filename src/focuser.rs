//! Focuser device: absolute position and motion.

use crate::device::{Device, DeviceCore, MessageSender};
use crate::events::DeviceEvent;
use crate::protocol::{standard_properties as props, IndiMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const ABORT: &str = "ABORT";

#[derive(Debug)]
pub struct FocuserDevice {
    core: DeviceCore,
    moving: AtomicBool,
    can_abort: AtomicBool,
    position: Mutex<f64>,
}

impl FocuserDevice {
    pub fn new(name: String, sender: MessageSender) -> Self {
        Self {
            core: DeviceCore::new(name, sender),
            moving: AtomicBool::new(false),
            can_abort: AtomicBool::new(false),
            position: Mutex::new(0.0),
        }
    }

    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    pub fn can_abort(&self) -> bool {
        self.can_abort.load(Ordering::SeqCst)
    }

    pub fn position(&self) -> f64 {
        *self.position.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn move_to(&self, position: f64) {
        self.core.sender().send_new_number(
            self.core.name(),
            props::ABS_FOCUS_POSITION,
            &[(props::FOCUS_ABSOLUTE_POSITION, position)],
        );
    }

    pub fn abort_motion(&self) {
        if self.can_abort() {
            self.core.sender().send_new_switch(
                self.core.name(),
                props::FOCUS_ABORT_MOTION,
                &[(ABORT, true)],
            );
        }
    }

    fn reduce(&self, message: &IndiMessage) {
        match message.vector_name() {
            Some(props::ABS_FOCUS_POSITION) => {
                let moving = message.is_busy();
                if self.moving.swap(moving, Ordering::SeqCst) != moving {
                    self.core.sender().fire(DeviceEvent::FocuserMovingChanged {
                        device: self.core.name().to_string(),
                        moving,
                    });
                }
                if let Some(position) = message.find_number(props::FOCUS_ABSOLUTE_POSITION) {
                    *self.position.lock().unwrap_or_else(|e| e.into_inner()) = position;
                    self.core.sender().fire(DeviceEvent::FocuserPositionChanged {
                        device: self.core.name().to_string(),
                        position,
                    });
                }
            }
            Some(props::FOCUS_ABORT_MOTION) => {
                self.can_abort.store(true, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

impl Device for FocuserDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_message(&self, message: &IndiMessage) {
        self.core.handle_message(message);
        self.reduce(message);
    }
}
