//! Wire codec: INDI XML grammar <-> [`IndiMessage`].
//!
//! Decoding is event driven: [`MessageBuilder`] consumes `quick-xml` events
//! one at a time and yields a message whenever a top-level element
//! completes. The same builder serves the async [`MessageStream`] used by
//! the protocol reader and the synchronous [`decode_str`] helper used in
//! tests. A malformed message fails alone; the builder skips the rest of
//! the offending element and keeps decoding.

use crate::error::{IndiError, IndiResult};
use crate::protocol::*;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tokio::io::{AsyncRead, BufReader};

/// What the enclosing vector expects its children to be. The vector kind
/// dictates how a child parses; the child's own tag name is not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    DefSwitch,
    DefNumber,
    DefText,
    DefLight,
    DefBlob,
    OneSwitch,
    OneNumber,
    OneText,
    OneLight,
}

#[derive(Debug)]
enum Partial {
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
    EnableBlob { device: String, name: String, text: String },
}

impl Partial {
    fn child_kind(&self) -> Option<ChildKind> {
        match self {
            Self::DefSwitchVector(_) => Some(ChildKind::DefSwitch),
            Self::DefNumberVector(_) => Some(ChildKind::DefNumber),
            Self::DefTextVector(_) => Some(ChildKind::DefText),
            Self::DefLightVector(_) => Some(ChildKind::DefLight),
            Self::DefBlobVector(_) => Some(ChildKind::DefBlob),
            Self::SetSwitchVector(_) | Self::NewSwitchVector(_) => Some(ChildKind::OneSwitch),
            Self::SetNumberVector(_) | Self::NewNumberVector(_) => Some(ChildKind::OneNumber),
            Self::SetTextVector(_) | Self::NewTextVector(_) => Some(ChildKind::OneText),
            Self::SetLightVector(_) => Some(ChildKind::OneLight),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PartialChild {
    kind: ChildKind,
    name: String,
    label: String,
    min: f64,
    max: f64,
    step: f64,
    format: String,
    text: String,
}

/// Incremental decoder over `quick-xml` events.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    top: Option<Partial>,
    child: Option<PartialChild>,
    skip_depth: usize,
}

impl MessageBuilder {
    /// Feed one XML event. Returns a message when a top-level element
    /// completes, `Ok(None)` while one is still being assembled, and an
    /// error when the current message turns out to be malformed. After an
    /// error the builder has discarded the broken message and remains
    /// usable for the next one.
    pub fn feed(&mut self, event: &Event<'_>) -> IndiResult<Option<IndiMessage>> {
        match event {
            Event::Start(e) => self.on_start(e),
            Event::Empty(e) => self.on_empty(e),
            Event::Text(e) => {
                if self.skip_depth == 0 {
                    let text = e
                        .unescape()
                        .map_err(|err| IndiError::MalformedMessage(err.to_string()))?;
                    self.on_text(&text);
                }
                Ok(None)
            }
            Event::CData(e) => {
                if self.skip_depth == 0 {
                    let text = String::from_utf8_lossy(e).into_owned();
                    self.on_text(&text);
                }
                Ok(None)
            }
            Event::End(e) => self.on_end(e),
            _ => Ok(None),
        }
    }

    fn on_start(&mut self, e: &BytesStart<'_>) -> IndiResult<Option<IndiMessage>> {
        if self.skip_depth > 0 {
            self.skip_depth += 1;
            return Ok(None);
        }

        if self.top.is_none() {
            match parse_top(e) {
                Ok(Some(partial)) => {
                    self.top = Some(partial);
                    Ok(None)
                }
                // Unrecognized top-level element: skip it, not an error.
                Ok(None) => {
                    self.skip_depth = 1;
                    Ok(None)
                }
                Err(err) => {
                    self.skip_depth = 1;
                    Err(err)
                }
            }
        } else if self.child.is_none() {
            let kind = match self.top.as_ref().and_then(Partial::child_kind) {
                Some(kind) => kind,
                None => {
                    // Control messages have no children worth keeping.
                    self.skip_depth = 1;
                    return Ok(None);
                }
            };

            match parse_child(e, kind) {
                Ok(child) => {
                    self.child = Some(child);
                    Ok(None)
                }
                Err(err) => {
                    // A broken child fails the whole message.
                    self.top = None;
                    self.skip_depth = 1;
                    Err(err)
                }
            }
        } else {
            // Unexpected nesting inside an element body.
            self.skip_depth = 1;
            Ok(None)
        }
    }

    fn on_empty(&mut self, e: &BytesStart<'_>) -> IndiResult<Option<IndiMessage>> {
        if self.skip_depth > 0 {
            return Ok(None);
        }

        if self.top.is_none() {
            match parse_top(e)? {
                Some(partial) => finalize_top(partial).map(Some),
                None => Ok(None),
            }
        } else if self.child.is_none() {
            let kind = match self.top.as_ref().and_then(Partial::child_kind) {
                Some(kind) => kind,
                None => return Ok(None),
            };
            let child = parse_child(e, kind).map_err(|err| {
                self.top = None;
                err
            })?;
            self.push_child(child).map_err(|err| {
                self.top = None;
                err
            })?;
            Ok(None)
        } else {
            Ok(None)
        }
    }

    fn on_text(&mut self, text: &str) {
        if let Some(child) = self.child.as_mut() {
            child.text.push_str(text);
        } else if let Some(Partial::EnableBlob { text: body, .. }) = self.top.as_mut() {
            body.push_str(text);
        }
    }

    fn on_end(&mut self, _e: &BytesEnd<'_>) -> IndiResult<Option<IndiMessage>> {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return Ok(None);
        }

        if let Some(child) = self.child.take() {
            self.push_child(child).map_err(|err| {
                self.top = None;
                err
            })?;
            Ok(None)
        } else if let Some(partial) = self.top.take() {
            finalize_top(partial).map(Some)
        } else {
            // Stray end tag, e.g. the tail of an already-failed message.
            Ok(None)
        }
    }

    fn push_child(&mut self, child: PartialChild) -> IndiResult<()> {
        let Some(top) = self.top.as_mut() else { return Ok(()) };
        let PartialChild { kind, name, label, min, max, step, format, text } = child;
        let text = text.trim().to_string();

        match top {
            Partial::DefSwitchVector(v) => {
                v.elements.push(DefSwitch { name, label, value: switch_value(&text) });
            }
            Partial::DefNumberVector(v) => {
                v.elements.push(DefNumber {
                    value: number_value(&name, &text)?,
                    name,
                    label,
                    min,
                    max,
                    step,
                    format,
                });
            }
            Partial::DefTextVector(v) => {
                v.elements.push(DefText { name, label, value: text });
            }
            Partial::DefLightVector(v) => {
                v.elements.push(DefLight { value: light_value(&name, &text)?, name, label });
            }
            Partial::DefBlobVector(v) => {
                v.elements.push(DefBlob { name, label });
            }
            Partial::SetSwitchVector(v) => {
                v.elements.push(OneSwitch { name, value: switch_value(&text) });
            }
            Partial::NewSwitchVector(v) => {
                v.elements.push(OneSwitch { name, value: switch_value(&text) });
            }
            Partial::SetNumberVector(v) => {
                v.elements.push(OneNumber { value: number_value(&name, &text)?, name });
            }
            Partial::NewNumberVector(v) => {
                v.elements.push(OneNumber { value: number_value(&name, &text)?, name });
            }
            Partial::SetTextVector(v) => {
                v.elements.push(OneText { name, value: text });
            }
            Partial::NewTextVector(v) => {
                v.elements.push(OneText { name, value: text });
            }
            Partial::SetLightVector(v) => {
                v.elements.push(OneLight { value: light_value(&name, &text)?, name });
            }
            _ => debug_assert!(false, "{kind:?} pushed into a control message"),
        }

        Ok(())
    }
}

/// Switch bodies match "On" case-insensitively; anything else is Off.
fn switch_value(text: &str) -> bool {
    text.eq_ignore_ascii_case("on")
}

fn number_value(element: &str, text: &str) -> IndiResult<f64> {
    text.parse::<f64>().map_err(|_| {
        IndiError::MalformedMessage(format!("element '{element}': invalid number '{text}'"))
    })
}

fn light_value(element: &str, text: &str) -> IndiResult<PropertyState> {
    PropertyState::parse(text).ok_or_else(|| {
        IndiError::MalformedMessage(format!("element '{element}': invalid light state '{text}'"))
    })
}

fn attr_opt(e: &BytesStart<'_>, key: &str) -> IndiResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| IndiError::MalformedMessage(err.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| IndiError::MalformedMessage(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn attr_req(e: &BytesStart<'_>, key: &str, element: &str) -> IndiResult<String> {
    attr_opt(e, key)?.ok_or_else(|| {
        IndiError::MalformedMessage(format!("<{element}> missing required attribute '{key}'"))
    })
}

fn attr_state(e: &BytesStart<'_>, element: &str) -> IndiResult<PropertyState> {
    let text = attr_req(e, "state", element)?;
    PropertyState::parse(&text).ok_or_else(|| {
        IndiError::MalformedMessage(format!("<{element}> invalid state '{text}'"))
    })
}

fn attr_perm(e: &BytesStart<'_>, element: &str) -> IndiResult<PropertyPermission> {
    match attr_opt(e, "perm")? {
        Some(text) => PropertyPermission::parse(&text).ok_or_else(|| {
            IndiError::MalformedMessage(format!("<{element}> invalid perm '{text}'"))
        }),
        None => Ok(PropertyPermission::ReadWrite),
    }
}

fn attr_timeout(e: &BytesStart<'_>) -> IndiResult<Option<f64>> {
    Ok(attr_opt(e, "timeout")?.and_then(|t| t.parse().ok()))
}

struct DefAttrs {
    device: String,
    name: String,
    label: String,
    group: String,
    state: PropertyState,
    timeout: Option<f64>,
    timestamp: String,
}

fn def_attrs(e: &BytesStart<'_>, element: &str) -> IndiResult<DefAttrs> {
    let name = attr_req(e, "name", element)?;
    Ok(DefAttrs {
        device: attr_req(e, "device", element)?,
        label: attr_opt(e, "label")?.unwrap_or_else(|| name.clone()),
        name,
        group: attr_opt(e, "group")?.unwrap_or_default(),
        state: attr_state(e, element)?,
        timeout: attr_timeout(e)?,
        timestamp: attr_req(e, "timestamp", element)?,
    })
}

struct SetAttrs {
    device: String,
    name: String,
    state: PropertyState,
    timeout: Option<f64>,
    timestamp: String,
    message: String,
}

fn set_attrs(e: &BytesStart<'_>, element: &str) -> IndiResult<SetAttrs> {
    Ok(SetAttrs {
        device: attr_req(e, "device", element)?,
        name: attr_req(e, "name", element)?,
        state: attr_state(e, element)?,
        timeout: attr_timeout(e)?,
        timestamp: attr_req(e, "timestamp", element)?,
        message: attr_opt(e, "message")?.unwrap_or_default(),
    })
}

fn parse_top(e: &BytesStart<'_>) -> IndiResult<Option<Partial>> {
    let partial = match e.name().as_ref() {
        b"defSwitchVector" => {
            let a = def_attrs(e, "defSwitchVector")?;
            let rule_text = attr_req(e, "rule", "defSwitchVector")?;
            let rule = SwitchRule::parse(&rule_text).ok_or_else(|| {
                IndiError::MalformedMessage(format!("<defSwitchVector> invalid rule '{rule_text}'"))
            })?;
            Partial::DefSwitchVector(DefSwitchVector {
                device: a.device,
                name: a.name,
                label: a.label,
                group: a.group,
                state: a.state,
                perm: attr_perm(e, "defSwitchVector")?,
                rule,
                timeout: a.timeout,
                timestamp: a.timestamp,
                elements: Vec::new(),
            })
        }
        b"defNumberVector" => {
            let a = def_attrs(e, "defNumberVector")?;
            Partial::DefNumberVector(DefNumberVector {
                device: a.device,
                name: a.name,
                label: a.label,
                group: a.group,
                state: a.state,
                perm: attr_perm(e, "defNumberVector")?,
                timeout: a.timeout,
                timestamp: a.timestamp,
                elements: Vec::new(),
            })
        }
        b"defTextVector" => {
            let a = def_attrs(e, "defTextVector")?;
            Partial::DefTextVector(DefTextVector {
                device: a.device,
                name: a.name,
                label: a.label,
                group: a.group,
                state: a.state,
                perm: attr_perm(e, "defTextVector")?,
                timeout: a.timeout,
                timestamp: a.timestamp,
                elements: Vec::new(),
            })
        }
        b"defLightVector" => {
            let a = def_attrs(e, "defLightVector")?;
            Partial::DefLightVector(DefLightVector {
                device: a.device,
                name: a.name,
                label: a.label,
                group: a.group,
                state: a.state,
                timestamp: a.timestamp,
                elements: Vec::new(),
            })
        }
        b"defBLOBVector" => {
            let a = def_attrs(e, "defBLOBVector")?;
            Partial::DefBlobVector(DefBlobVector {
                device: a.device,
                name: a.name,
                label: a.label,
                group: a.group,
                state: a.state,
                perm: attr_perm(e, "defBLOBVector")?,
                timeout: a.timeout,
                timestamp: a.timestamp,
                elements: Vec::new(),
            })
        }
        b"setSwitchVector" => {
            let a = set_attrs(e, "setSwitchVector")?;
            Partial::SetSwitchVector(SetSwitchVector {
                device: a.device,
                name: a.name,
                state: a.state,
                timeout: a.timeout,
                timestamp: a.timestamp,
                message: a.message,
                elements: Vec::new(),
            })
        }
        b"setNumberVector" => {
            let a = set_attrs(e, "setNumberVector")?;
            Partial::SetNumberVector(SetNumberVector {
                device: a.device,
                name: a.name,
                state: a.state,
                timeout: a.timeout,
                timestamp: a.timestamp,
                message: a.message,
                elements: Vec::new(),
            })
        }
        b"setTextVector" => {
            let a = set_attrs(e, "setTextVector")?;
            Partial::SetTextVector(SetTextVector {
                device: a.device,
                name: a.name,
                state: a.state,
                timeout: a.timeout,
                timestamp: a.timestamp,
                message: a.message,
                elements: Vec::new(),
            })
        }
        b"setLightVector" => {
            let a = set_attrs(e, "setLightVector")?;
            Partial::SetLightVector(SetLightVector {
                device: a.device,
                name: a.name,
                state: a.state,
                timestamp: a.timestamp,
                message: a.message,
                elements: Vec::new(),
            })
        }
        b"newSwitchVector" => Partial::NewSwitchVector(NewSwitchVector {
            device: attr_req(e, "device", "newSwitchVector")?,
            name: attr_req(e, "name", "newSwitchVector")?,
            timestamp: attr_opt(e, "timestamp")?.unwrap_or_default(),
            elements: Vec::new(),
        }),
        b"newNumberVector" => Partial::NewNumberVector(NewNumberVector {
            device: attr_req(e, "device", "newNumberVector")?,
            name: attr_req(e, "name", "newNumberVector")?,
            timestamp: attr_opt(e, "timestamp")?.unwrap_or_default(),
            elements: Vec::new(),
        }),
        b"newTextVector" => Partial::NewTextVector(NewTextVector {
            device: attr_req(e, "device", "newTextVector")?,
            name: attr_req(e, "name", "newTextVector")?,
            timestamp: attr_opt(e, "timestamp")?.unwrap_or_default(),
            elements: Vec::new(),
        }),
        b"delProperty" => Partial::DelProperty(DelProperty {
            device: attr_req(e, "device", "delProperty")?,
            name: attr_opt(e, "name")?.unwrap_or_default(),
            timestamp: attr_opt(e, "timestamp")?.unwrap_or_default(),
            message: attr_opt(e, "message")?.unwrap_or_default(),
        }),
        b"message" => Partial::Message(TextMessage {
            device: attr_opt(e, "device")?.unwrap_or_default(),
            timestamp: attr_opt(e, "timestamp")?.unwrap_or_default(),
            message: attr_opt(e, "message")?.unwrap_or_default(),
        }),
        b"getProperties" => Partial::GetProperties(GetProperties {
            device: attr_opt(e, "device")?.unwrap_or_default(),
            name: attr_opt(e, "name")?.unwrap_or_default(),
            version: attr_opt(e, "version")?
                .unwrap_or_else(|| INDI_PROTOCOL_VERSION.to_string()),
        }),
        b"enableBLOB" => Partial::EnableBlob {
            device: attr_req(e, "device", "enableBLOB")?,
            name: attr_opt(e, "name")?.unwrap_or_default(),
            text: String::new(),
        },
        _ => return Ok(None),
    };

    Ok(Some(partial))
}

fn parse_child(e: &BytesStart<'_>, kind: ChildKind) -> IndiResult<PartialChild> {
    let element = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let name = attr_req(e, "name", &element)?;
    let label = attr_opt(e, "label")?.unwrap_or_else(|| name.clone());

    let (mut min, mut max, mut step, mut format) = (0.0, 0.0, 0.0, String::new());

    if kind == ChildKind::DefNumber {
        min = number_value(&name, &attr_req(e, "min", &element)?)?;
        max = number_value(&name, &attr_req(e, "max", &element)?)?;
        step = number_value(&name, &attr_req(e, "step", &element)?)?;
        format = attr_opt(e, "format")?.unwrap_or_default();
    }

    Ok(PartialChild { kind, name, label, min, max, step, format, text: String::new() })
}

fn finalize_top(partial: Partial) -> IndiResult<IndiMessage> {
    Ok(match partial {
        Partial::DefSwitchVector(v) => IndiMessage::DefSwitchVector(v),
        Partial::DefNumberVector(v) => IndiMessage::DefNumberVector(v),
        Partial::DefTextVector(v) => IndiMessage::DefTextVector(v),
        Partial::DefLightVector(v) => IndiMessage::DefLightVector(v),
        Partial::DefBlobVector(v) => IndiMessage::DefBlobVector(v),
        Partial::SetSwitchVector(v) => IndiMessage::SetSwitchVector(v),
        Partial::SetNumberVector(v) => IndiMessage::SetNumberVector(v),
        Partial::SetTextVector(v) => IndiMessage::SetTextVector(v),
        Partial::SetLightVector(v) => IndiMessage::SetLightVector(v),
        Partial::NewSwitchVector(v) => IndiMessage::NewSwitchVector(v),
        Partial::NewNumberVector(v) => IndiMessage::NewNumberVector(v),
        Partial::NewTextVector(v) => IndiMessage::NewTextVector(v),
        Partial::DelProperty(v) => IndiMessage::DelProperty(v),
        Partial::Message(v) => IndiMessage::Message(v),
        Partial::GetProperties(v) => IndiMessage::GetProperties(v),
        Partial::EnableBlob { device, name, text } => {
            let text = text.trim().to_string();
            let value = BlobEnable::parse(&text).ok_or_else(|| {
                IndiError::MalformedMessage(format!("<enableBLOB> invalid value '{text}'"))
            })?;
            IndiMessage::EnableBlob(EnableBlob { device, name, value })
        }
    })
}

/// Lazy decoder over an async byte stream, one message per call.
pub struct MessageStream<R> {
    reader: quick_xml::Reader<BufReader<R>>,
    buf: Vec<u8>,
    builder: MessageBuilder,
}

impl<R: AsyncRead + Unpin> MessageStream<R> {
    pub fn new(input: R) -> Self {
        let mut reader = quick_xml::Reader::from_reader(BufReader::new(input));
        reader.trim_text(true);
        Self { reader, buf: Vec::new(), builder: MessageBuilder::default() }
    }

    /// Read the next message. `Ok(None)` means clean end of stream. A
    /// malformed-message error leaves the stream usable; a transport error
    /// does not.
    pub async fn next_message(&mut self) -> IndiResult<Option<IndiMessage>> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into_async(&mut self.buf).await?;

            if matches!(event, Event::Eof) {
                return Ok(None);
            }

            if let Some(message) = self.builder.feed(&event)? {
                return Ok(Some(message));
            }
        }
    }
}

/// Decode every message in a string. Fails on the first malformed message.
pub fn decode_str(input: &str) -> IndiResult<Vec<IndiMessage>> {
    let mut reader = quick_xml::Reader::from_str(input);
    reader.trim_text(true);

    let mut builder = MessageBuilder::default();
    let mut messages = Vec::new();

    loop {
        let event = reader.read_event()?;

        if matches!(event, Event::Eof) {
            break;
        }

        if let Some(message) = builder.feed(&event)? {
            messages.push(message);
        }
    }

    Ok(messages)
}

fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    attrs: &[(&str, &str)],
    body: &str,
) -> IndiResult<()> {
    let mut start = BytesStart::new(tag);
    for (key, value) in attrs {
        start.push_attribute((*key, *value));
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(body)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn switch_text(value: bool) -> &'static str {
    if value {
        "On"
    } else {
        "Off"
    }
}

/// Encode a message into its wire form. Attributes are emitted in
/// canonical order: device, name, then vector metadata.
pub fn encode(message: &IndiMessage) -> IndiResult<String> {
    let mut writer = Writer::new(Vec::new());

    match message {
        IndiMessage::DefSwitchVector(m) => {
            let mut start = BytesStart::new("defSwitchVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("label", m.label.as_str()));
            start.push_attribute(("group", m.group.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            start.push_attribute(("perm", m.perm.as_str()));
            start.push_attribute(("rule", m.rule.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "defSwitch",
                    &[("name", &e.name), ("label", &e.label)],
                    switch_text(e.value),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("defSwitchVector")))?;
        }
        IndiMessage::DefNumberVector(m) => {
            let mut start = BytesStart::new("defNumberVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("label", m.label.as_str()));
            start.push_attribute(("group", m.group.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            start.push_attribute(("perm", m.perm.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                let (min, max, step) =
                    (e.min.to_string(), e.max.to_string(), e.step.to_string());
                write_element(
                    &mut writer,
                    "defNumber",
                    &[
                        ("name", &e.name),
                        ("label", &e.label),
                        ("format", &e.format),
                        ("min", &min),
                        ("max", &max),
                        ("step", &step),
                    ],
                    &e.value.to_string(),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("defNumberVector")))?;
        }
        IndiMessage::DefTextVector(m) => {
            let mut start = BytesStart::new("defTextVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("label", m.label.as_str()));
            start.push_attribute(("group", m.group.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            start.push_attribute(("perm", m.perm.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "defText",
                    &[("name", &e.name), ("label", &e.label)],
                    &e.value,
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("defTextVector")))?;
        }
        IndiMessage::DefLightVector(m) => {
            let mut start = BytesStart::new("defLightVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("label", m.label.as_str()));
            start.push_attribute(("group", m.group.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "defLight",
                    &[("name", &e.name), ("label", &e.label)],
                    e.value.as_str(),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("defLightVector")))?;
        }
        IndiMessage::DefBlobVector(m) => {
            let mut start = BytesStart::new("defBLOBVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("label", m.label.as_str()));
            start.push_attribute(("group", m.group.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            start.push_attribute(("perm", m.perm.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                let mut es = BytesStart::new("defBLOB");
                es.push_attribute(("name", e.name.as_str()));
                es.push_attribute(("label", e.label.as_str()));
                writer.write_event(Event::Empty(es))?;
            }
            writer.write_event(Event::End(BytesEnd::new("defBLOBVector")))?;
        }
        IndiMessage::SetSwitchVector(m) => {
            let mut start = BytesStart::new("setSwitchVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            if !m.message.is_empty() {
                start.push_attribute(("message", m.message.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "oneSwitch",
                    &[("name", &e.name)],
                    switch_text(e.value),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("setSwitchVector")))?;
        }
        IndiMessage::SetNumberVector(m) => {
            let mut start = BytesStart::new("setNumberVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            if !m.message.is_empty() {
                start.push_attribute(("message", m.message.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "oneNumber",
                    &[("name", &e.name)],
                    &e.value.to_string(),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("setNumberVector")))?;
        }
        IndiMessage::SetTextVector(m) => {
            let mut start = BytesStart::new("setTextVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            if let Some(timeout) = m.timeout {
                start.push_attribute(("timeout", timeout.to_string().as_str()));
            }
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            if !m.message.is_empty() {
                start.push_attribute(("message", m.message.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(&mut writer, "oneText", &[("name", &e.name)], &e.value)?;
            }
            writer.write_event(Event::End(BytesEnd::new("setTextVector")))?;
        }
        IndiMessage::SetLightVector(m) => {
            let mut start = BytesStart::new("setLightVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("state", m.state.as_str()));
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            if !m.message.is_empty() {
                start.push_attribute(("message", m.message.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(&mut writer, "oneLight", &[("name", &e.name)], e.value.as_str())?;
            }
            writer.write_event(Event::End(BytesEnd::new("setLightVector")))?;
        }
        IndiMessage::NewSwitchVector(m) => {
            let mut start = BytesStart::new("newSwitchVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "oneSwitch",
                    &[("name", &e.name)],
                    switch_text(e.value),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("newSwitchVector")))?;
        }
        IndiMessage::NewNumberVector(m) => {
            let mut start = BytesStart::new("newNumberVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(
                    &mut writer,
                    "oneNumber",
                    &[("name", &e.name)],
                    &e.value.to_string(),
                )?;
            }
            writer.write_event(Event::End(BytesEnd::new("newNumberVector")))?;
        }
        IndiMessage::NewTextVector(m) => {
            let mut start = BytesStart::new("newTextVector");
            start.push_attribute(("device", m.device.as_str()));
            start.push_attribute(("name", m.name.as_str()));
            start.push_attribute(("timestamp", m.timestamp.as_str()));
            writer.write_event(Event::Start(start))?;
            for e in &m.elements {
                write_element(&mut writer, "oneText", &[("name", &e.name)], &e.value)?;
            }
            writer.write_event(Event::End(BytesEnd::new("newTextVector")))?;
        }
        IndiMessage::DelProperty(m) => {
            let mut start = BytesStart::new("delProperty");
            start.push_attribute(("device", m.device.as_str()));
            if !m.name.is_empty() {
                start.push_attribute(("name", m.name.as_str()));
            }
            if !m.timestamp.is_empty() {
                start.push_attribute(("timestamp", m.timestamp.as_str()));
            }
            if !m.message.is_empty() {
                start.push_attribute(("message", m.message.as_str()));
            }
            writer.write_event(Event::Empty(start))?;
        }
        IndiMessage::Message(m) => {
            let mut start = BytesStart::new("message");
            if !m.device.is_empty() {
                start.push_attribute(("device", m.device.as_str()));
            }
            if !m.timestamp.is_empty() {
                start.push_attribute(("timestamp", m.timestamp.as_str()));
            }
            start.push_attribute(("message", m.message.as_str()));
            writer.write_event(Event::Empty(start))?;
        }
        IndiMessage::GetProperties(m) => {
            let mut start = BytesStart::new("getProperties");
            start.push_attribute(("version", m.version.as_str()));
            if !m.device.is_empty() {
                start.push_attribute(("device", m.device.as_str()));
            }
            if !m.name.is_empty() {
                start.push_attribute(("name", m.name.as_str()));
            }
            writer.write_event(Event::Empty(start))?;
        }
        IndiMessage::EnableBlob(m) => {
            let mut start = BytesStart::new("enableBLOB");
            start.push_attribute(("device", m.device.as_str()));
            if !m.name.is_empty() {
                start.push_attribute(("name", m.name.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(m.value.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new("enableBLOB")))?;
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|err| IndiError::MalformedMessage(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMESTAMP: &str = "2024-01-01T00:00:00";

    #[test]
    fn test_decode_def_switch_vector() {
        let xml = format!(
            "<defSwitchVector device=\"Telescope1\" name=\"CONNECTION\" label=\"Connection\" \
             group=\"Main Control\" state=\"Idle\" perm=\"rw\" rule=\"OneOfMany\" \
             timestamp=\"{TIMESTAMP}\">\
             <defSwitch name=\"CONNECT\" label=\"Connect\">Off</defSwitch>\
             <defSwitch name=\"DISCONNECT\" label=\"Disconnect\">On</defSwitch>\
             </defSwitchVector>"
        );

        let messages = decode_str(&xml).unwrap();
        assert_eq!(messages.len(), 1);

        match &messages[0] {
            IndiMessage::DefSwitchVector(v) => {
                assert_eq!(v.device, "Telescope1");
                assert_eq!(v.name, "CONNECTION");
                assert_eq!(v.rule, SwitchRule::OneOfMany);
                assert_eq!(v.perm, PropertyPermission::ReadWrite);
                assert_eq!(v.elements.len(), 2);
                assert!(!v.elements[0].value);
                assert!(v.elements[1].value);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_set_number_vector() {
        let xml = format!(
            "<setNumberVector device=\"Telescope1\" name=\"EQUATORIAL_EOD_COORD\" \
             state=\"Busy\" timestamp=\"{TIMESTAMP}\">\
             <oneNumber name=\"RA\">10.5</oneNumber>\
             <oneNumber name=\"DEC\">-45.25</oneNumber>\
             </setNumberVector>"
        );

        let messages = decode_str(&xml).unwrap();
        match &messages[0] {
            IndiMessage::SetNumberVector(v) => {
                assert_eq!(v.state, PropertyState::Busy);
                assert_eq!(v.elements[0].value, 10.5);
                assert_eq!(v.elements[1].value, -45.25);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_switch_decoding_is_case_insensitive() {
        for token in ["On", "on", "ON", "oN"] {
            let xml = format!(
                "<setSwitchVector device=\"D\" name=\"V\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
                 <oneSwitch name=\"S\">{token}</oneSwitch></setSwitchVector>"
            );
            let messages = decode_str(&xml).unwrap();
            assert_eq!(messages[0].find_switch("S"), Some(true), "token {token:?}");
        }

        for token in ["Off", "off", "1", "true", ""] {
            let xml = format!(
                "<setSwitchVector device=\"D\" name=\"V\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
                 <oneSwitch name=\"S\">{token}</oneSwitch></setSwitchVector>"
            );
            let messages = decode_str(&xml).unwrap();
            assert_eq!(messages[0].find_switch("S"), Some(false), "token {token:?}");
        }
    }

    #[test]
    fn test_unknown_top_level_element_is_skipped() {
        let xml = format!(
            "<setBLOBVector device=\"CCD1\" name=\"CCD1\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
             <oneBLOB name=\"CCD1\" size=\"4\" format=\".fits\">AAAA</oneBLOB>\
             </setBLOBVector>\
             <message device=\"CCD1\" message=\"exposure done\"/>"
        );

        let messages = decode_str(&xml).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], IndiMessage::Message(m) if m.message == "exposure done"));
    }

    #[test]
    fn test_missing_device_fails_single_message() {
        let xml = format!(
            "<setSwitchVector name=\"V\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
             <oneSwitch name=\"S\">On</oneSwitch></setSwitchVector>"
        );
        let err = decode_str(&xml).unwrap_err();
        assert!(matches!(err, IndiError::MalformedMessage(_)));
    }

    #[test]
    fn test_invalid_number_fails_message_but_not_stream() {
        let xml = format!(
            "<setNumberVector device=\"D\" name=\"BAD\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
             <oneNumber name=\"N\">not-a-number</oneNumber></setNumberVector>\
             <setNumberVector device=\"D\" name=\"GOOD\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
             <oneNumber name=\"N\">1.5</oneNumber></setNumberVector>"
        );

        let mut reader = quick_xml::Reader::from_str(&xml);
        reader.trim_text(true);
        let mut builder = MessageBuilder::default();
        let mut messages = Vec::new();
        let mut errors = 0;

        loop {
            let event = reader.read_event().unwrap();
            if matches!(event, Event::Eof) {
                break;
            }
            match builder.feed(&event) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(_) => errors += 1,
            }
        }

        assert_eq!(errors, 1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].vector_name(), Some("GOOD"));
        assert_eq!(messages[0].find_number("N"), Some(1.5));
    }

    #[test]
    fn test_decode_control_messages() {
        let xml = "<getProperties version=\"1.7\" device=\"Telescope1\"/>\
                   <delProperty device=\"Telescope1\"/>\
                   <enableBLOB device=\"CCD1\">Also</enableBLOB>";

        let messages = decode_str(xml).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], IndiMessage::GetProperties(m) if m.device == "Telescope1"));
        assert!(matches!(&messages[1], IndiMessage::DelProperty(m) if m.name.is_empty()));
        assert!(matches!(&messages[2], IndiMessage::EnableBlob(m) if m.value == BlobEnable::Also));
    }

    #[test]
    fn test_request_vector_round_trip() {
        let message = IndiMessage::NewNumberVector(NewNumberVector {
            device: "Telescope1".to_string(),
            name: "EQUATORIAL_EOD_COORD".to_string(),
            timestamp: String::new(),
            elements: vec![
                OneNumber { name: "RA".to_string(), value: 10.5 },
                OneNumber { name: "DEC".to_string(), value: -45.25 },
            ],
        });

        let xml = encode(&message).unwrap();
        let decoded = decode_str(&xml).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], message);
    }

    #[test]
    fn test_switch_request_round_trip() {
        let message = IndiMessage::NewSwitchVector(NewSwitchVector {
            device: "Telescope1".to_string(),
            name: "CONNECTION".to_string(),
            timestamp: String::new(),
            elements: vec![OneSwitch { name: "CONNECT".to_string(), value: true }],
        });

        let xml = encode(&message).unwrap();
        assert!(xml.contains("newSwitchVector"));
        assert!(xml.contains(">On<"));
        assert_eq!(decode_str(&xml).unwrap()[0], message);
    }

    #[test]
    fn test_encode_get_properties() {
        let message = IndiMessage::GetProperties(GetProperties {
            device: String::new(),
            name: String::new(),
            version: INDI_PROTOCOL_VERSION.to_string(),
        });

        let xml = encode(&message).unwrap();
        assert_eq!(xml, "<getProperties version=\"1.7\"/>");
    }

    #[test]
    fn test_text_value_is_escaped() {
        let message = IndiMessage::NewTextVector(NewTextVector {
            device: "D".to_string(),
            name: "V".to_string(),
            timestamp: String::new(),
            elements: vec![OneText { name: "T".to_string(), value: "a < b & c".to_string() }],
        });

        let xml = encode(&message).unwrap();
        let decoded = decode_str(&xml).unwrap();
        assert_eq!(decoded[0].find_text("T").as_deref(), Some("a < b & c"));
    }

    #[tokio::test]
    async fn test_message_stream_reads_until_eof() {
        let xml = format!(
            "<setSwitchVector device=\"D\" name=\"A\" state=\"Ok\" timestamp=\"{TIMESTAMP}\">\
             <oneSwitch name=\"S\">On</oneSwitch></setSwitchVector>\
             <message message=\"hello\"/>"
        );

        let mut stream = MessageStream::new(xml.as_bytes());
        let first = stream.next_message().await.unwrap().unwrap();
        assert_eq!(first.vector_name(), Some("A"));
        let second = stream.next_message().await.unwrap().unwrap();
        assert!(matches!(second, IndiMessage::Message(_)));
        assert!(stream.next_message().await.unwrap().is_none());
    }
}
