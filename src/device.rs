//! Shared device machinery: the runtime property store, the outbound
//! command path, and the connection state machine every category reuses.

use crate::error::{IndiError, IndiResult};
use crate::events::DeviceEvent;
use crate::protocol::{standard_properties as props, *};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Baud rates the serial handshake will accept.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 115200, 230400];

/// How many free-text driver messages each device keeps.
const MESSAGE_LOG_LIMIT: usize = 100;

/// Serial transport settings applied during the connect handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
}

/// Current value of a single property element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropertyValue {
    Switch(bool),
    Number { value: f64, min: f64, max: f64, step: f64, format: String },
    Text(String),
    Light(PropertyState),
    Blob,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyItem {
    pub name: String,
    pub label: String,
    pub value: PropertyValue,
}

/// Runtime snapshot of one property vector. A definition replaces the
/// whole vector; updates mutate state and values in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyVector {
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub rule: Option<SwitchRule>,
    pub items: Vec<PropertyItem>,
}

impl PropertyVector {
    pub fn item(&self, name: &str) -> Option<&PropertyItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn switch(&self, name: &str) -> Option<bool> {
        match self.item(name)?.value {
            PropertyValue::Switch(value) => Some(value),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.item(name)?.value {
            PropertyValue::Number { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match &self.item(name)?.value {
            PropertyValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Name of the first switch that is On, for OneOfMany selectors.
    pub fn first_on_switch(&self) -> Option<&str> {
        self.items
            .iter()
            .find(|item| matches!(item.value, PropertyValue::Switch(true)))
            .map(|item| item.name.as_str())
    }

    fn from_definition(message: &IndiMessage) -> Option<Self> {
        let (name, label, group, state, perm, rule, items) = match message {
            IndiMessage::DefSwitchVector(v) => (
                &v.name,
                &v.label,
                &v.group,
                v.state,
                v.perm,
                Some(v.rule),
                v.elements
                    .iter()
                    .map(|e| PropertyItem {
                        name: e.name.clone(),
                        label: e.label.clone(),
                        value: PropertyValue::Switch(e.value),
                    })
                    .collect(),
            ),
            IndiMessage::DefNumberVector(v) => (
                &v.name,
                &v.label,
                &v.group,
                v.state,
                v.perm,
                None,
                v.elements
                    .iter()
                    .map(|e| PropertyItem {
                        name: e.name.clone(),
                        label: e.label.clone(),
                        value: PropertyValue::Number {
                            value: e.value,
                            min: e.min,
                            max: e.max,
                            step: e.step,
                            format: e.format.clone(),
                        },
                    })
                    .collect(),
            ),
            IndiMessage::DefTextVector(v) => (
                &v.name,
                &v.label,
                &v.group,
                v.state,
                v.perm,
                None,
                v.elements
                    .iter()
                    .map(|e| PropertyItem {
                        name: e.name.clone(),
                        label: e.label.clone(),
                        value: PropertyValue::Text(e.value.clone()),
                    })
                    .collect(),
            ),
            IndiMessage::DefLightVector(v) => (
                &v.name,
                &v.label,
                &v.group,
                v.state,
                PropertyPermission::ReadOnly,
                None,
                v.elements
                    .iter()
                    .map(|e| PropertyItem {
                        name: e.name.clone(),
                        label: e.label.clone(),
                        value: PropertyValue::Light(e.value),
                    })
                    .collect(),
            ),
            IndiMessage::DefBlobVector(v) => (
                &v.name,
                &v.label,
                &v.group,
                v.state,
                v.perm,
                None,
                v.elements
                    .iter()
                    .map(|e| PropertyItem {
                        name: e.name.clone(),
                        label: e.label.clone(),
                        value: PropertyValue::Blob,
                    })
                    .collect(),
            ),
            _ => return None,
        };

        Some(Self {
            name: name.clone(),
            label: label.clone(),
            group: group.clone(),
            state,
            perm,
            rule,
            items,
        })
    }

    /// Apply a set vector. Unknown element names are ignored.
    fn apply_update(&mut self, message: &IndiMessage) {
        if let Some(state) = message.state() {
            self.state = state;
        }

        match message {
            IndiMessage::SetSwitchVector(v) => {
                for e in &v.elements {
                    if let Some(item) = self.items.iter_mut().find(|i| i.name == e.name) {
                        item.value = PropertyValue::Switch(e.value);
                    }
                }
            }
            IndiMessage::SetNumberVector(v) => {
                for e in &v.elements {
                    if let Some(item) = self.items.iter_mut().find(|i| i.name == e.name) {
                        if let PropertyValue::Number { value, .. } = &mut item.value {
                            *value = e.value;
                        }
                    }
                }
            }
            IndiMessage::SetTextVector(v) => {
                for e in &v.elements {
                    if let Some(item) = self.items.iter_mut().find(|i| i.name == e.name) {
                        item.value = PropertyValue::Text(e.value.clone());
                    }
                }
            }
            IndiMessage::SetLightVector(v) => {
                for e in &v.elements {
                    if let Some(item) = self.items.iter_mut().find(|i| i.name == e.name) {
                        item.value = PropertyValue::Light(e.value);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Outbound command path plus event fan-out, shared by every device.
/// Sends never block; the writer task drains the channel.
#[derive(Debug, Clone)]
pub struct MessageSender {
    outbound: mpsc::UnboundedSender<IndiMessage>,
    events: broadcast::Sender<DeviceEvent>,
}

impl MessageSender {
    pub fn new(
        outbound: mpsc::UnboundedSender<IndiMessage>,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self { outbound, events }
    }

    pub fn send(&self, message: IndiMessage) {
        // A closed channel means the connection is gone; commands are
        // dropped rather than surfaced to every call site.
        if self.outbound.send(message).is_err() {
            debug!("outbound channel closed, command dropped");
        }
    }

    pub fn send_new_switch(&self, device: &str, name: &str, elements: &[(&str, bool)]) {
        self.send(IndiMessage::NewSwitchVector(NewSwitchVector {
            device: device.to_string(),
            name: name.to_string(),
            timestamp: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| OneSwitch { name: name.to_string(), value: *value })
                .collect(),
        }));
    }

    pub fn send_new_number(&self, device: &str, name: &str, elements: &[(&str, f64)]) {
        self.send(IndiMessage::NewNumberVector(NewNumberVector {
            device: device.to_string(),
            name: name.to_string(),
            timestamp: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| OneNumber { name: name.to_string(), value: *value })
                .collect(),
        }));
    }

    pub fn send_new_text(&self, device: &str, name: &str, elements: &[(&str, &str)]) {
        self.send(IndiMessage::NewTextVector(NewTextVector {
            device: device.to_string(),
            name: name.to_string(),
            timestamp: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| OneText { name: name.to_string(), value: value.to_string() })
                .collect(),
        }));
    }

    /// Fan an event out to listeners. No listeners is not an error.
    pub fn fire(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }
}

/// Per-device state shared by every category: connection axis, property
/// store, serial settings, and the bounded message log.
#[derive(Debug)]
pub struct DeviceCore {
    name: String,
    sender: MessageSender,
    connected: AtomicBool,
    connecting: AtomicBool,
    serial: Mutex<Option<SerialSettings>>,
    properties: Mutex<HashMap<String, PropertyVector>>,
    messages: Mutex<VecDeque<String>>,
}

impl DeviceCore {
    pub fn new(name: String, sender: MessageSender) -> Self {
        Self {
            name,
            sender,
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            serial: Mutex::new(None),
            properties: Mutex::new(HashMap::new()),
            messages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    /// Configure the serial transport used by the next `connect()`.
    pub fn set_serial(&self, port: &str, baud_rate: u32) -> IndiResult<()> {
        if port.trim().is_empty() {
            return Err(IndiError::BlankSerialPort);
        }
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(IndiError::UnsupportedBaudRate(baud_rate));
        }

        let mut serial = self.serial.lock().unwrap_or_else(|e| e.into_inner());
        *serial = Some(SerialSettings { port: port.to_string(), baud_rate });
        Ok(())
    }

    pub fn serial(&self) -> Option<SerialSettings> {
        self.serial.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Begin the connect handshake. No-op while already connected.
    pub fn connect(&self) {
        if self.is_connected() {
            return;
        }

        self.connecting.store(true, Ordering::SeqCst);
        self.sender.fire(DeviceEvent::Connecting { device: self.name.clone() });

        if let Some(serial) = self.serial() {
            self.sender.send_new_switch(
                &self.name,
                props::CONNECTION_MODE,
                &[(props::CONNECTION_SERIAL, true)],
            );
            self.sender.send_new_text(
                &self.name,
                props::DEVICE_PORT,
                &[(props::DEVICE_PORT_VALUE, &serial.port)],
            );
            // Baud selectors are switches named after the rate itself.
            self.sender.send_new_switch(
                &self.name,
                props::DEVICE_BAUD_RATE,
                &[(&serial.baud_rate.to_string(), true)],
            );
        }

        self.sender
            .send_new_switch(&self.name, props::CONNECTION, &[(props::CONNECT, true)]);
    }

    /// Request disconnection. Always sends, even when not connected.
    pub fn disconnect(&self) {
        self.sender
            .send_new_switch(&self.name, props::CONNECTION, &[(props::DISCONNECT, true)]);
    }

    /// Re-ask the server for this device's full property set.
    pub fn ask(&self) {
        self.sender.send(IndiMessage::GetProperties(GetProperties {
            device: self.name.clone(),
            name: String::new(),
            version: INDI_PROTOCOL_VERSION.to_string(),
        }));
    }

    pub fn property(&self, name: &str) -> Option<PropertyVector> {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Most recent free-text messages, newest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Route one inbound message through the shared machinery: message
    /// log, property store, and the connection state machine.
    pub fn handle_message(&self, message: &IndiMessage) {
        match message {
            IndiMessage::Message(m) => {
                let mut log = self.messages.lock().unwrap_or_else(|e| e.into_inner());
                log.push_front(m.message.clone());
                log.truncate(MESSAGE_LOG_LIMIT);
                drop(log);
                self.sender.fire(DeviceEvent::MessageReceived {
                    device: self.name.clone(),
                    message: m.message.clone(),
                });
            }
            IndiMessage::DelProperty(m) if !m.name.is_empty() => {
                let removed = self
                    .properties
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&m.name)
                    .is_some();
                if removed {
                    self.sender.fire(DeviceEvent::PropertyDeleted {
                        device: self.name.clone(),
                        name: m.name.clone(),
                    });
                }
            }
            _ => {
                let Some(name) = message.vector_name() else { return };

                // The connection axis is reduced straight off the wire,
                // whether or not the vector has been defined yet.
                if name == props::CONNECTION
                    && matches!(
                        message,
                        IndiMessage::DefSwitchVector(_) | IndiMessage::SetSwitchVector(_)
                    )
                {
                    self.reduce_connection(message);
                }

                if message.is_definition() {
                    if let Some(vector) = PropertyVector::from_definition(message) {
                        self.properties
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(name.to_string(), vector);
                        self.fire_property_changed(name);
                    }
                } else if matches!(
                    message,
                    IndiMessage::SetSwitchVector(_)
                        | IndiMessage::SetNumberVector(_)
                        | IndiMessage::SetTextVector(_)
                        | IndiMessage::SetLightVector(_)
                ) {
                    let mut properties =
                        self.properties.lock().unwrap_or_else(|e| e.into_inner());
                    // Updates for vectors never defined are ignored.
                    if let Some(vector) = properties.get_mut(name) {
                        vector.apply_update(message);
                        drop(properties);
                        self.fire_property_changed(name);
                    }
                }
            }
        }
    }

    fn fire_property_changed(&self, name: &str) {
        self.sender.fire(DeviceEvent::PropertyChanged {
            device: self.name.clone(),
            name: name.to_string(),
        });
    }

    /// Connection axis: Disconnected -> Connecting -> Connected, with
    /// Connecting -> Disconnected when the handshake ends in Alert.
    fn reduce_connection(&self, message: &IndiMessage) {
        let connected = message.find_switch(props::CONNECT).unwrap_or(false);

        if connected != self.is_connected() {
            self.connected.store(connected, Ordering::SeqCst);
            self.connecting.store(false, Ordering::SeqCst);
            if connected {
                self.sender.fire(DeviceEvent::Connected { device: self.name.clone() });
                // The full property set may have changed across the connect.
                self.ask();
            } else {
                self.sender.fire(DeviceEvent::Disconnected { device: self.name.clone() });
            }
        } else if !connected && message.state() == Some(PropertyState::Alert) {
            self.connecting.store(false, Ordering::SeqCst);
            self.sender.fire(DeviceEvent::ConnectionFailed { device: self.name.clone() });
        }
    }
}

/// Common surface of every registered device.
pub trait Device: Send + Sync {
    fn core(&self) -> &DeviceCore;

    /// Reduce one inbound message into device state.
    fn handle_message(&self, message: &IndiMessage);

    fn name(&self) -> &str {
        self.core().name()
    }
}

/// Capability: emit timed guide pulses. Calls are silent no-ops until the
/// device defines its timed-guide vectors.
pub trait GuideOutput: Device {
    fn can_pulse_guide(&self) -> bool;
    fn is_pulse_guiding(&self) -> bool;

    fn guide_north(&self, duration_ms: f64);
    fn guide_south(&self, duration_ms: f64);
    fn guide_east(&self, duration_ms: f64);
    fn guide_west(&self, duration_ms: f64);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A sender wired to inspectable channels.
    pub fn sender() -> (
        MessageSender,
        mpsc::UnboundedReceiver<IndiMessage>,
        broadcast::Receiver<DeviceEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = broadcast::channel(256);
        (MessageSender::new(out_tx, event_tx), out_rx, event_rx)
    }

    pub fn drain_outbound(rx: &mut mpsc::UnboundedReceiver<IndiMessage>) -> Vec<IndiMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn drain_events(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn def_switch_vector(
        device: &str,
        name: &str,
        state: PropertyState,
        elements: &[(&str, bool)],
    ) -> IndiMessage {
        IndiMessage::DefSwitchVector(DefSwitchVector {
            device: device.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            group: String::new(),
            state,
            perm: PropertyPermission::ReadWrite,
            rule: SwitchRule::OneOfMany,
            timeout: None,
            timestamp: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| DefSwitch {
                    name: name.to_string(),
                    label: name.to_string(),
                    value: *value,
                })
                .collect(),
        })
    }

    pub fn set_switch_vector(
        device: &str,
        name: &str,
        state: PropertyState,
        elements: &[(&str, bool)],
    ) -> IndiMessage {
        IndiMessage::SetSwitchVector(SetSwitchVector {
            device: device.to_string(),
            name: name.to_string(),
            state,
            timeout: None,
            timestamp: String::new(),
            message: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| OneSwitch { name: name.to_string(), value: *value })
                .collect(),
        })
    }

    pub fn def_number_vector(
        device: &str,
        name: &str,
        state: PropertyState,
        elements: &[(&str, f64)],
    ) -> IndiMessage {
        IndiMessage::DefNumberVector(DefNumberVector {
            device: device.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            group: String::new(),
            state,
            perm: PropertyPermission::ReadWrite,
            timeout: None,
            timestamp: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| DefNumber {
                    name: name.to_string(),
                    label: name.to_string(),
                    value: *value,
                    min: 0.0,
                    max: 0.0,
                    step: 0.0,
                    format: String::new(),
                })
                .collect(),
        })
    }

    pub fn set_number_vector(
        device: &str,
        name: &str,
        state: PropertyState,
        elements: &[(&str, f64)],
    ) -> IndiMessage {
        IndiMessage::SetNumberVector(SetNumberVector {
            device: device.to_string(),
            name: name.to_string(),
            state,
            timeout: None,
            timestamp: String::new(),
            message: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| OneNumber { name: name.to_string(), value: *value })
                .collect(),
        })
    }

    pub fn def_text_vector(
        device: &str,
        name: &str,
        elements: &[(&str, &str)],
    ) -> IndiMessage {
        IndiMessage::DefTextVector(DefTextVector {
            device: device.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            group: String::new(),
            state: PropertyState::Idle,
            perm: PropertyPermission::ReadOnly,
            timeout: None,
            timestamp: String::new(),
            elements: elements
                .iter()
                .map(|(name, value)| DefText {
                    name: name.to_string(),
                    label: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn core() -> (DeviceCore, mpsc::UnboundedReceiver<IndiMessage>, broadcast::Receiver<DeviceEvent>)
    {
        let (sender, out_rx, event_rx) = sender();
        (DeviceCore::new("Telescope1".to_string(), sender), out_rx, event_rx)
    }

    #[test]
    fn test_serial_validation() {
        let (core, _out, _events) = core();

        assert!(matches!(core.set_serial("", 9600), Err(IndiError::BlankSerialPort)));
        assert!(matches!(core.set_serial("   ", 9600), Err(IndiError::BlankSerialPort)));
        assert!(matches!(
            core.set_serial("/dev/ttyUSB0", 4800),
            Err(IndiError::UnsupportedBaudRate(4800))
        ));

        core.set_serial("/dev/ttyUSB0", 115200).unwrap();
        assert_eq!(
            core.serial(),
            Some(SerialSettings { port: "/dev/ttyUSB0".to_string(), baud_rate: 115200 })
        );
    }

    #[test]
    fn test_connect_sends_serial_handshake() {
        let (core, mut out, mut events) = core();
        core.set_serial("/dev/ttyUSB0", 9600).unwrap();
        core.connect();

        let sent = drain_outbound(&mut out);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].vector_name(), Some(props::CONNECTION_MODE));
        assert_eq!(sent[0].find_switch(props::CONNECTION_SERIAL), Some(true));
        assert_eq!(sent[1].vector_name(), Some(props::DEVICE_PORT));
        assert_eq!(sent[1].find_text(props::DEVICE_PORT_VALUE).as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(sent[2].vector_name(), Some(props::DEVICE_BAUD_RATE));
        assert_eq!(sent[2].find_switch("9600"), Some(true));
        assert_eq!(sent[3].vector_name(), Some(props::CONNECTION));
        assert_eq!(sent[3].find_switch(props::CONNECT), Some(true));

        assert!(core.is_connecting());
        assert_eq!(
            drain_events(&mut events),
            vec![DeviceEvent::Connecting { device: "Telescope1".to_string() }]
        );
    }

    #[test]
    fn test_connect_without_serial_skips_handshake() {
        let (core, mut out, _events) = core();
        core.connect();

        let sent = drain_outbound(&mut out);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].vector_name(), Some(props::CONNECTION));
    }

    #[test]
    fn test_connect_while_connected_is_noop() {
        let (core, mut out, _events) = core();
        core.handle_message(&set_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Ok,
            &[(props::CONNECT, true), (props::DISCONNECT, false)],
        ));
        drain_outbound(&mut out);

        core.connect();
        assert!(drain_outbound(&mut out).is_empty());
    }

    #[test]
    fn test_connection_state_machine() {
        let (core, mut out, mut events) = core();
        core.connect();
        drain_outbound(&mut out);
        drain_events(&mut events);

        // Connection is reduced straight off the wire, before the vector
        // definition has even arrived.
        core.handle_message(&set_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Busy,
            &[(props::CONNECT, true)],
        ));
        assert!(core.is_connected());
        assert!(!core.is_connecting());

        let fired = drain_events(&mut events);
        assert!(fired.contains(&DeviceEvent::Connected { device: "Telescope1".to_string() }));

        // A later definition confirming the same value fires no second
        // Connected event.
        core.handle_message(&def_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Ok,
            &[(props::CONNECT, true), (props::DISCONNECT, false)],
        ));
        assert!(core.is_connected());
        assert!(!drain_events(&mut events)
            .contains(&DeviceEvent::Connected { device: "Telescope1".to_string() }));
        // Connected triggers a fresh getProperties scoped to the device.
        let sent = drain_outbound(&mut out);
        assert!(sent
            .iter()
            .any(|m| matches!(m, IndiMessage::GetProperties(g) if g.device == "Telescope1")));

        core.handle_message(&set_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false), (props::DISCONNECT, true)],
        ));
        assert!(!core.is_connected());
        assert!(drain_events(&mut events)
            .contains(&DeviceEvent::Disconnected { device: "Telescope1".to_string() }));
    }

    #[test]
    fn test_connection_alert_while_connecting_fails() {
        let (core, mut out, mut events) = core();
        core.handle_message(&def_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false), (props::DISCONNECT, true)],
        ));
        core.connect();
        drain_outbound(&mut out);
        drain_events(&mut events);

        core.handle_message(&set_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Alert,
            &[(props::CONNECT, false)],
        ));

        assert!(!core.is_connected());
        assert!(!core.is_connecting());
        assert!(drain_events(&mut events)
            .contains(&DeviceEvent::ConnectionFailed { device: "Telescope1".to_string() }));
    }

    #[test]
    fn test_property_store_def_set_delete() {
        let (core, _out, mut events) = core();

        core.handle_message(&def_number_vector(
            "Telescope1",
            "EQUATORIAL_EOD_COORD",
            PropertyState::Idle,
            &[("RA", 0.0), ("DEC", 0.0)],
        ));
        drain_events(&mut events);

        core.handle_message(&set_number_vector(
            "Telescope1",
            "EQUATORIAL_EOD_COORD",
            PropertyState::Busy,
            &[("RA", 5.5)],
        ));

        let vector = core.property("EQUATORIAL_EOD_COORD").unwrap();
        assert_eq!(vector.state, PropertyState::Busy);
        assert_eq!(vector.number("RA"), Some(5.5));
        assert_eq!(vector.number("DEC"), Some(0.0));
        assert!(drain_events(&mut events).contains(&DeviceEvent::PropertyChanged {
            device: "Telescope1".to_string(),
            name: "EQUATORIAL_EOD_COORD".to_string(),
        }));

        // Updates for unknown vectors are dropped without an event.
        core.handle_message(&set_number_vector("Telescope1", "NOPE", PropertyState::Ok, &[]));
        assert!(drain_events(&mut events).is_empty());

        core.handle_message(&IndiMessage::DelProperty(DelProperty {
            device: "Telescope1".to_string(),
            name: "EQUATORIAL_EOD_COORD".to_string(),
            timestamp: String::new(),
            message: String::new(),
        }));
        assert!(core.property("EQUATORIAL_EOD_COORD").is_none());
        assert!(drain_events(&mut events).contains(&DeviceEvent::PropertyDeleted {
            device: "Telescope1".to_string(),
            name: "EQUATORIAL_EOD_COORD".to_string(),
        }));
    }

    #[test]
    fn test_message_log_is_bounded() {
        let (core, _out, _events) = core();

        for i in 0..150 {
            core.handle_message(&IndiMessage::Message(TextMessage {
                device: "Telescope1".to_string(),
                timestamp: String::new(),
                message: format!("message {i}"),
            }));
        }

        let log = core.messages();
        assert_eq!(log.len(), 100);
        assert_eq!(log[0], "message 149");
        assert_eq!(log[99], "message 50");
    }
}
