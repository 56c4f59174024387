//! Camera device: exposure and cooling state plus the minimal command set.

use crate::device::{Device, DeviceCore, MessageSender};
use crate::events::DeviceEvent;
use crate::protocol::{standard_properties as props, IndiMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const COOLER_ON: &str = "COOLER_ON";
pub const COOLER_OFF: &str = "COOLER_OFF";
pub const ABORT: &str = "ABORT";
pub const CCD_TEMPERATURE_VALUE: &str = "CCD_TEMPERATURE_VALUE";

#[derive(Debug)]
pub struct CameraDevice {
    core: DeviceCore,
    exposing: AtomicBool,
    cooler_on: AtomicBool,
    exposure_remaining: Mutex<f64>,
    temperature: Mutex<f64>,
}

impl CameraDevice {
    pub fn new(name: String, sender: MessageSender) -> Self {
        Self {
            core: DeviceCore::new(name, sender),
            exposing: AtomicBool::new(false),
            cooler_on: AtomicBool::new(false),
            exposure_remaining: Mutex::new(0.0),
            temperature: Mutex::new(0.0),
        }
    }

    pub fn is_exposing(&self) -> bool {
        self.exposing.load(Ordering::SeqCst)
    }

    pub fn is_cooler_on(&self) -> bool {
        self.cooler_on.load(Ordering::SeqCst)
    }

    /// Seconds left in the running exposure.
    pub fn exposure_remaining(&self) -> f64 {
        *self.exposure_remaining.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn temperature(&self) -> f64 {
        *self.temperature.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_exposure(&self, seconds: f64) {
        self.core.sender().send_new_number(
            self.core.name(),
            props::CCD_EXPOSURE,
            &[(props::CCD_EXPOSURE_VALUE, seconds)],
        );
    }

    pub fn abort_exposure(&self) {
        self.core.sender().send_new_switch(
            self.core.name(),
            props::CCD_ABORT_EXPOSURE,
            &[(ABORT, true)],
        );
    }

    pub fn cooler(&self, enable: bool) {
        let element = if enable { COOLER_ON } else { COOLER_OFF };
        self.core
            .sender()
            .send_new_switch(self.core.name(), props::CCD_COOLER, &[(element, true)]);
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.core.sender().send_new_number(
            self.core.name(),
            props::CCD_TEMPERATURE,
            &[(CCD_TEMPERATURE_VALUE, celsius)],
        );
    }

    fn reduce(&self, message: &IndiMessage) {
        match message.vector_name() {
            Some(props::CCD_EXPOSURE) => {
                let exposing = message.is_busy();
                self.exposing.store(exposing, Ordering::SeqCst);
                let remaining = message.find_number(props::CCD_EXPOSURE_VALUE).unwrap_or(0.0);
                *self.exposure_remaining.lock().unwrap_or_else(|e| e.into_inner()) = remaining;
                self.core.sender().fire(DeviceEvent::CameraExposureChanged {
                    device: self.core.name().to_string(),
                    exposing,
                    remaining,
                });
            }
            Some(props::CCD_COOLER) => {
                if let Some(cooler_on) = message.find_switch(COOLER_ON) {
                    self.cooler_on.store(cooler_on, Ordering::SeqCst);
                    self.core.sender().fire(DeviceEvent::CameraCoolerChanged {
                        device: self.core.name().to_string(),
                        cooler_on,
                    });
                }
            }
            Some(props::CCD_TEMPERATURE) => {
                if let Some(temperature) = message.find_number(CCD_TEMPERATURE_VALUE) {
                    *self.temperature.lock().unwrap_or_else(|e| e.into_inner()) = temperature;
                    self.core.sender().fire(DeviceEvent::CameraTemperatureChanged {
                        device: self.core.name().to_string(),
                        temperature,
                    });
                }
            }
            _ => {}
        }
    }
}

impl Device for CameraDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_message(&self, message: &IndiMessage) {
        self.core.handle_message(message);
        self.reduce(message);
    }
}
