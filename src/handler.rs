//! Protocol handler: classifies devices from `DRIVER_INFO`, routes inbound
//! messages, and re-orders messages that arrive before their device's
//! identity is known.
//!
//! Servers interleave property traffic from several drivers, so a vector
//! for a device can arrive before that device's `DRIVER_INFO`. Such
//! messages wait in a reordering queue and are replayed, in arrival order,
//! once the device registers. Each queued message carries a retry counter
//! keyed by its identity; a message retried past the limit is dropped as a
//! loop.

use crate::camera::CameraDevice;
use crate::device::{Device, GuideOutput, MessageSender};
use crate::drivers::DriverTable;
use crate::events::{DeviceEvent, DeviceInterface};
use crate::filterwheel::FilterWheelDevice;
use crate::focuser::FocuserDevice;
use crate::gps::GpsDevice;
use crate::mount::MountDevice;
use crate::protocol::{standard_properties as props, IndiMessage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// How many times an unroutable message is retried before being dropped.
pub const MESSAGE_RETRY_LIMIT: u32 = 2048;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct Registry {
    mounts: HashMap<String, Arc<MountDevice>>,
    cameras: HashMap<String, Arc<CameraDevice>>,
    wheels: HashMap<String, Arc<FilterWheelDevice>>,
    focusers: HashMap<String, Arc<FocuserDevice>>,
    gps: HashMap<String, Arc<GpsDevice>>,
    guide_outputs: HashMap<String, Arc<dyn GuideOutput>>,
    not_registered: HashSet<String>,
    pending: VecDeque<Arc<IndiMessage>>,
    // Retry counters keyed by message identity (allocation address), not
    // content. Two equal messages from different reads count separately.
    retries: HashMap<usize, u32>,
}

impl Registry {
    fn devices_named(&self, name: &str) -> Vec<Arc<dyn Device>> {
        let mut devices: Vec<Arc<dyn Device>> = Vec::new();
        if let Some(d) = self.cameras.get(name) {
            devices.push(d.clone());
        }
        if let Some(d) = self.mounts.get(name) {
            devices.push(d.clone());
        }
        if let Some(d) = self.wheels.get(name) {
            devices.push(d.clone());
        }
        if let Some(d) = self.focusers.get(name) {
            devices.push(d.clone());
        }
        if let Some(d) = self.gps.get(name) {
            devices.push(d.clone());
        }
        devices
    }

    fn remove_pending(&mut self, message: &Arc<IndiMessage>) {
        self.pending.retain(|queued| !Arc::ptr_eq(queued, message));
        self.retries.remove(&retry_key(message));
    }
}

fn retry_key(message: &Arc<IndiMessage>) -> usize {
    Arc::as_ptr(message) as usize
}

/// Device registry and inbound routing. One instance per connection.
pub struct ProtocolHandler {
    drivers: DriverTable,
    registry: Mutex<Registry>,
    outbound: mpsc::UnboundedSender<IndiMessage>,
    events: broadcast::Sender<DeviceEvent>,
}

impl ProtocolHandler {
    /// Build a handler. The returned receiver is the outbound command
    /// queue and belongs to the writer task.
    pub fn new(drivers: DriverTable) -> (Arc<Self>, mpsc::UnboundedReceiver<IndiMessage>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handler = Arc::new(Self {
            drivers,
            registry: Mutex::new(Registry::default()),
            outbound,
            events,
        });
        (handler, outbound_rx)
    }

    /// Register a listener. Dropping the receiver unregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Command path handed to devices created by this handler.
    pub fn sender(&self) -> MessageSender {
        MessageSender::new(self.outbound.clone(), self.events.clone())
    }

    /// Ask the server for every device's properties.
    pub fn ask_properties(&self) {
        self.sender().send(IndiMessage::GetProperties(crate::protocol::GetProperties {
            device: String::new(),
            name: String::new(),
            version: crate::protocol::INDI_PROTOCOL_VERSION.to_string(),
        }));
    }

    pub fn mount(&self, name: &str) -> Option<Arc<MountDevice>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).mounts.get(name).cloned()
    }

    pub fn mounts(&self) -> Vec<Arc<MountDevice>> {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mounts
            .values()
            .cloned()
            .collect()
    }

    pub fn camera(&self, name: &str) -> Option<Arc<CameraDevice>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).cameras.get(name).cloned()
    }

    pub fn cameras(&self) -> Vec<Arc<CameraDevice>> {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cameras
            .values()
            .cloned()
            .collect()
    }

    pub fn filter_wheel(&self, name: &str) -> Option<Arc<FilterWheelDevice>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).wheels.get(name).cloned()
    }

    pub fn focuser(&self, name: &str) -> Option<Arc<FocuserDevice>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).focusers.get(name).cloned()
    }

    pub fn gps(&self, name: &str) -> Option<Arc<GpsDevice>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).gps.get(name).cloned()
    }

    pub fn guide_output(&self, name: &str) -> Option<Arc<dyn GuideOutput>> {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .guide_outputs
            .get(name)
            .cloned()
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).pending.len()
    }

    fn fire(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Route one inbound message. The whole routing pass runs under the
    /// registry lock so a device is never observed half-registered.
    pub fn handle_message(&self, message: Arc<IndiMessage>) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        self.process(&mut registry, message);
    }

    fn process(&self, registry: &mut Registry, message: Arc<IndiMessage>) {
        if registry.not_registered.contains(message.device()) {
            registry.remove_pending(&message);
            return;
        }

        if let IndiMessage::DefTextVector(v) = &*message {
            if v.name == props::DRIVER_INFO {
                self.classify(registry, &message);
                return;
            }
        }

        match &*message {
            IndiMessage::Message(m) => {
                let devices = registry.devices_named(&m.device);
                if devices.is_empty() {
                    // Broadcast or unknown sender; listeners still see it.
                    self.fire(DeviceEvent::MessageReceived {
                        device: m.device.clone(),
                        message: m.message.clone(),
                    });
                } else {
                    for device in devices {
                        device.handle_message(&message);
                    }
                }
                debug!(device = %m.device, "free-text message received");
                return;
            }
            IndiMessage::DelProperty(m) if m.name.is_empty() && !m.device.is_empty() => {
                self.detach_device(registry, &m.device);
                return;
            }
            _ => {}
        }

        let device_name = message.device().to_string();

        if device_name.is_empty() {
            registry.remove_pending(&message);
            return;
        }

        let devices = registry.devices_named(&device_name);

        if !devices.is_empty() {
            for device in &devices {
                device.handle_message(&message);
            }
            registry.remove_pending(&message);
            self.attach_guide_output(registry, &device_name);
            debug!(device = %device_name, vector = ?message.vector_name(), "message routed");
        } else {
            let key = retry_key(&message);
            let counter = registry.retries.entry(key).or_insert(0);
            *counter += 1;

            if *counter <= MESSAGE_RETRY_LIMIT {
                // Keep a single queued instance regardless of how many
                // times the message came back around.
                registry.pending.retain(|queued| !Arc::ptr_eq(queued, &message));
                registry.pending.push_back(message);
            } else {
                registry.remove_pending(&message);
                warn!(device = %device_name, "message loop detected, dropping message");
            }
        }
    }

    /// `DRIVER_INFO` handling: register the device under every category
    /// its driver executable belongs to, then replay queued messages.
    fn classify(&self, registry: &mut Registry, message: &Arc<IndiMessage>) {
        let device_name = message.device().to_string();

        let Some(executable) = message.find_text(props::DRIVER_EXEC) else {
            warn!(device = %device_name, "DRIVER_INFO without DRIVER_EXEC");
            registry.not_registered.insert(device_name);
            return;
        };

        let interfaces = self.drivers.interfaces(&executable);

        if interfaces.is_empty() {
            warn!(device = %device_name, executable = %executable, "device is not registered");
            registry.not_registered.insert(device_name);
            return;
        }

        for interface in interfaces {
            let attached = match interface {
                DeviceInterface::Mount => {
                    if registry.mounts.contains_key(&device_name) {
                        false
                    } else {
                        let device =
                            Arc::new(MountDevice::new(device_name.clone(), self.sender()));
                        registry.mounts.insert(device_name.clone(), device);
                        true
                    }
                }
                DeviceInterface::Camera => {
                    if registry.cameras.contains_key(&device_name) {
                        false
                    } else {
                        let device =
                            Arc::new(CameraDevice::new(device_name.clone(), self.sender()));
                        registry.cameras.insert(device_name.clone(), device);
                        true
                    }
                }
                DeviceInterface::FilterWheel => {
                    if registry.wheels.contains_key(&device_name) {
                        false
                    } else {
                        let device =
                            Arc::new(FilterWheelDevice::new(device_name.clone(), self.sender()));
                        registry.wheels.insert(device_name.clone(), device);
                        true
                    }
                }
                DeviceInterface::Focuser => {
                    if registry.focusers.contains_key(&device_name) {
                        false
                    } else {
                        let device =
                            Arc::new(FocuserDevice::new(device_name.clone(), self.sender()));
                        registry.focusers.insert(device_name.clone(), device);
                        true
                    }
                }
                DeviceInterface::Gps => {
                    if registry.gps.contains_key(&device_name) {
                        false
                    } else {
                        let device = Arc::new(GpsDevice::new(device_name.clone(), self.sender()));
                        registry.gps.insert(device_name.clone(), device);
                        true
                    }
                }
                DeviceInterface::GuideOutput => false,
            };

            if attached {
                info!(device = %device_name, ?interface, "device attached");
                // Listeners see the attach before any replayed property
                // traffic for the device.
                self.fire(DeviceEvent::Attached { device: device_name.clone(), interface });
                self.flush_pending(registry);
            }
        }
    }

    /// Replay queued messages after a registration. Messages for the new
    /// device route in arrival order; the rest go back through the retry
    /// accounting.
    fn flush_pending(&self, registry: &mut Registry) {
        let queued: Vec<Arc<IndiMessage>> = registry.pending.drain(..).collect();
        for message in queued {
            self.process(registry, message);
        }
    }

    /// After routing, promote a mount to guide output once its timed-guide
    /// vectors have been defined.
    fn attach_guide_output(&self, registry: &mut Registry, device_name: &str) {
        if registry.guide_outputs.contains_key(device_name) {
            return;
        }

        let Some(mount) = registry.mounts.get(device_name) else { return };

        if mount.can_pulse_guide() {
            registry
                .guide_outputs
                .insert(device_name.to_string(), mount.clone() as Arc<dyn GuideOutput>);
            info!(device = %device_name, "guide output attached");
            self.fire(DeviceEvent::Attached {
                device: device_name.to_string(),
                interface: DeviceInterface::GuideOutput,
            });
        }
    }

    fn detach_device(&self, registry: &mut Registry, device_name: &str) {
        if registry.guide_outputs.remove(device_name).is_some() {
            info!(device = %device_name, "guide output detached");
            self.fire(DeviceEvent::Detached {
                device: device_name.to_string(),
                interface: DeviceInterface::GuideOutput,
            });
        }

        let removed = [
            (registry.cameras.remove(device_name).is_some(), DeviceInterface::Camera),
            (registry.mounts.remove(device_name).is_some(), DeviceInterface::Mount),
            (registry.wheels.remove(device_name).is_some(), DeviceInterface::FilterWheel),
            (registry.focusers.remove(device_name).is_some(), DeviceInterface::Focuser),
            (registry.gps.remove(device_name).is_some(), DeviceInterface::Gps),
        ];

        for (was_removed, interface) in removed {
            if was_removed {
                info!(device = %device_name, ?interface, "device detached");
                self.fire(DeviceEvent::Detached {
                    device: device_name.to_string(),
                    interface,
                });
            }
        }
    }

    /// Detach every device and drop all buffered state. Idempotent.
    pub fn close(&self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());

        let names: Vec<String> = registry
            .cameras
            .keys()
            .chain(registry.mounts.keys())
            .chain(registry.wheels.keys())
            .chain(registry.focusers.keys())
            .chain(registry.gps.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for name in names {
            self.detach_device(&mut registry, &name);
        }

        registry.not_registered.clear();
        registry.pending.clear();
        registry.retries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::*;
    use crate::protocol::PropertyState;

    fn driver_info(device: &str, executable: &str) -> Arc<IndiMessage> {
        Arc::new(def_text_vector(
            device,
            props::DRIVER_INFO,
            &[
                ("DRIVER_NAME", device),
                (props::DRIVER_EXEC, executable),
                ("DRIVER_VERSION", "1.0"),
            ],
        ))
    }

    fn handler() -> (Arc<ProtocolHandler>, broadcast::Receiver<DeviceEvent>) {
        let (handler, _outbound) = ProtocolHandler::new(DriverTable::default());
        let events = handler.subscribe();
        (handler, events)
    }

    fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_driver_info_registers_mount() {
        let (handler, mut events) = handler();

        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));

        assert!(handler.mount("Telescope1").is_some());
        assert_eq!(
            drain(&mut events),
            vec![DeviceEvent::Attached {
                device: "Telescope1".to_string(),
                interface: DeviceInterface::Mount,
            }]
        );

        // A repeated DRIVER_INFO does not re-attach.
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));
        assert!(drain(&mut events).is_empty());
        assert_eq!(handler.mounts().len(), 1);
    }

    #[test]
    fn test_unknown_driver_blocks_device() {
        let (handler, mut events) = handler();

        handler.handle_message(driver_info("Mystery", "indi_unknown_gadget"));
        assert!(drain(&mut events).is_empty());

        // Later traffic from a blocked device is discarded, not buffered.
        handler.handle_message(Arc::new(def_switch_vector(
            "Mystery",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false)],
        )));
        assert_eq!(handler.pending_len(), 0);
    }

    #[test]
    fn test_messages_buffered_until_identity_known() {
        let (handler, mut events) = handler();

        // Property definitions arrive before DRIVER_INFO.
        handler.handle_message(Arc::new(def_switch_vector(
            "Telescope1",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false), (props::DISCONNECT, true)],
        )));
        handler.handle_message(Arc::new(def_number_vector(
            "Telescope1",
            props::EQUATORIAL_EOD_COORD,
            PropertyState::Idle,
            &[("RA", 1.5), ("DEC", 2.5)],
        )));
        assert_eq!(handler.pending_len(), 2);

        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));

        // Both queued messages replayed into the new device, in order.
        let mount = handler.mount("Telescope1").unwrap();
        assert!(mount.core().property(props::CONNECTION).is_some());
        assert_eq!(mount.coordinates().right_ascension, 1.5);
        assert_eq!(handler.pending_len(), 0);

        let fired = drain(&mut events);
        let attach_index = fired
            .iter()
            .position(|e| matches!(e, DeviceEvent::Attached { .. }))
            .unwrap();
        let property_index = fired
            .iter()
            .position(|e| matches!(e, DeviceEvent::PropertyChanged { .. }))
            .unwrap();
        assert!(attach_index < property_index);
    }

    #[test]
    fn test_pending_messages_for_other_devices_survive_flush() {
        let (handler, _events) = handler();

        handler.handle_message(Arc::new(def_number_vector(
            "CCD Simulator",
            props::CCD_EXPOSURE,
            PropertyState::Idle,
            &[(props::CCD_EXPOSURE_VALUE, 0.0)],
        )));
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));

        // The camera message is still waiting for its own DRIVER_INFO.
        assert_eq!(handler.pending_len(), 1);

        handler.handle_message(driver_info("CCD Simulator", "indi_simulator_ccd"));
        assert_eq!(handler.pending_len(), 0);
        let camera = handler.camera("CCD Simulator").unwrap();
        assert!(camera.core().property(props::CCD_EXPOSURE).is_some());
    }

    #[test]
    fn test_message_loop_detection() {
        let (handler, _events) = handler();

        let message = Arc::new(def_switch_vector(
            "Ghost",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false)],
        ));

        for _ in 0..MESSAGE_RETRY_LIMIT {
            handler.handle_message(message.clone());
            assert_eq!(handler.pending_len(), 1);
        }

        // One more retry crosses the limit and drops the message.
        handler.handle_message(message.clone());
        assert_eq!(handler.pending_len(), 0);

        // The same content in a fresh allocation starts a fresh counter.
        let twin = Arc::new(def_switch_vector(
            "Ghost",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false)],
        ));
        handler.handle_message(twin);
        assert_eq!(handler.pending_len(), 1);
    }

    #[test]
    fn test_empty_device_name_is_discarded() {
        let (handler, _events) = handler();

        handler.handle_message(Arc::new(def_switch_vector(
            "",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false)],
        )));
        assert_eq!(handler.pending_len(), 0);
    }

    #[test]
    fn test_broadcast_text_message_reaches_listeners() {
        let (handler, mut events) = handler();

        handler.handle_message(Arc::new(IndiMessage::Message(crate::protocol::TextMessage {
            device: String::new(),
            timestamp: String::new(),
            message: "server restarting".to_string(),
        })));

        assert!(drain(&mut events).contains(&DeviceEvent::MessageReceived {
            device: String::new(),
            message: "server restarting".to_string(),
        }));
    }

    #[test]
    fn test_routed_text_message_lands_in_device_log() {
        let (handler, _events) = handler();
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));

        handler.handle_message(Arc::new(IndiMessage::Message(crate::protocol::TextMessage {
            device: "Telescope1".to_string(),
            timestamp: String::new(),
            message: "slew complete".to_string(),
        })));

        let mount = handler.mount("Telescope1").unwrap();
        assert_eq!(mount.core().messages(), vec!["slew complete"]);
    }

    #[test]
    fn test_whole_device_delete_detaches() {
        let (handler, mut events) = handler();
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));
        drain(&mut events);

        handler.handle_message(Arc::new(IndiMessage::DelProperty(
            crate::protocol::DelProperty {
                device: "Telescope1".to_string(),
                name: String::new(),
                timestamp: String::new(),
                message: String::new(),
            },
        )));

        assert!(handler.mount("Telescope1").is_none());
        assert_eq!(
            drain(&mut events),
            vec![DeviceEvent::Detached {
                device: "Telescope1".to_string(),
                interface: DeviceInterface::Mount,
            }]
        );
    }

    #[test]
    fn test_guide_output_attaches_after_timed_guide_definition() {
        let (handler, mut events) = handler();
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));
        drain(&mut events);

        assert!(handler.guide_output("Telescope1").is_none());

        handler.handle_message(Arc::new(def_number_vector(
            "Telescope1",
            props::TELESCOPE_TIMED_GUIDE_NS,
            PropertyState::Idle,
            &[("TIMED_GUIDE_N", 0.0), ("TIMED_GUIDE_S", 0.0)],
        )));

        let guide_output = handler.guide_output("Telescope1").unwrap();
        assert!(guide_output.can_pulse_guide());
        assert!(drain(&mut events).contains(&DeviceEvent::Attached {
            device: "Telescope1".to_string(),
            interface: DeviceInterface::GuideOutput,
        }));
    }

    #[test]
    fn test_close_detaches_everything_and_is_idempotent() {
        let (handler, mut events) = handler();
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));
        handler.handle_message(driver_info("CCD Simulator", "indi_simulator_ccd"));
        handler.handle_message(Arc::new(def_switch_vector(
            "Ghost",
            props::CONNECTION,
            PropertyState::Idle,
            &[(props::CONNECT, false)],
        )));
        drain(&mut events);

        handler.close();

        let fired = drain(&mut events);
        assert_eq!(fired.len(), 2);
        assert!(fired.contains(&DeviceEvent::Detached {
            device: "Telescope1".to_string(),
            interface: DeviceInterface::Mount,
        }));
        assert!(fired.contains(&DeviceEvent::Detached {
            device: "CCD Simulator".to_string(),
            interface: DeviceInterface::Camera,
        }));
        assert!(handler.mounts().is_empty());
        assert!(handler.cameras().is_empty());
        assert_eq!(handler.pending_len(), 0);

        handler.close();
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_commands_flow_through_outbound_queue() {
        let (handler, mut outbound) = ProtocolHandler::new(DriverTable::default());
        handler.handle_message(driver_info("Telescope1", "indi_simulator_telescope"));

        let mount = handler.mount("Telescope1").unwrap();
        mount.core().connect();

        let sent = drain_outbound(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].vector_name(), Some(props::CONNECTION));
        assert_eq!(sent[0].device(), "Telescope1");
    }
}
