//! Typed INDI messages.
//!
//! Incoming elements are parsed with `roxmltree` into [`IndiMessage`];
//! outgoing commands ([`NewVector`], [`get_properties`]) are rendered to XML
//! text directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndiError, Result};

/// INDI protocol version announced in the handshake.
pub const PROTOCOL_VERSION: &str = "1.7";

/// The four INDI vector types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VectorKind {
    Text,
    Number,
    Switch,
    Light,
}

impl VectorKind {
    pub const ALL: [VectorKind; 4] = [
        VectorKind::Text,
        VectorKind::Number,
        VectorKind::Switch,
        VectorKind::Light,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VectorKind::Text => "Text",
            VectorKind::Number => "Number",
            VectorKind::Switch => "Switch",
            VectorKind::Light => "Light",
        }
    }

    /// Kind from a tag such as `defNumberVector` or `oneSwitch`.
    fn from_tag(tag: &str, prefix: &str, suffix: &str) -> Option<Self> {
        let middle = tag.strip_prefix(prefix)?.strip_suffix(suffix)?;
        VectorKind::ALL.into_iter().find(|k| k.as_str() == middle)
    }
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorKind {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self> {
        VectorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| IndiError::malformed("vector", format!("unknown type {s:?}")))
    }
}

/// Vector state as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VectorState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl VectorState {
    pub fn as_str(self) -> &'static str {
        match self {
            VectorState::Idle => "Idle",
            VectorState::Ok => "Ok",
            VectorState::Busy => "Busy",
            VectorState::Alert => "Alert",
        }
    }
}

impl fmt::Display for VectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorState {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Idle" => Ok(VectorState::Idle),
            "Ok" => Ok(VectorState::Ok),
            "Busy" => Ok(VectorState::Busy),
            "Alert" => Ok(VectorState::Alert),
            other => Err(IndiError::malformed("vector", format!("unknown state {other:?}"))),
        }
    }
}

/// One member of a vector: `defNumber`, `oneSwitch`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    /// Trimmed text content.
    pub value: String,
    /// Attributes other than `name` (`label`, `format`, `min`, ...).
    pub attributes: BTreeMap<String, String>,
}

/// `def*Vector`: declares (or redeclares) a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefVector {
    pub kind: VectorKind,
    pub device: String,
    pub name: String,
    pub state: VectorState,
    pub timestamp: Option<String>,
    pub message: Option<String>,
    /// Remaining attributes (`label`, `group`, `perm`, `rule`, `timeout`, ...).
    pub attributes: BTreeMap<String, String>,
    pub members: Vec<Member>,
}

/// `set*Vector`: new values and/or state for a declared vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetVector {
    pub kind: VectorKind,
    pub device: String,
    pub name: String,
    pub state: Option<VectorState>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub members: Vec<Member>,
}

/// `delProperty`: removes one vector, or the whole device when `name` is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelProperty {
    pub device: String,
    pub name: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
}

/// `message`: a free-text log line, optionally tied to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub device: Option<String>,
    pub timestamp: Option<String>,
    pub message: String,
}

/// A parsed incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndiMessage {
    Def(DefVector),
    Set(SetVector),
    Del(DelProperty),
    Message(LogMessage),
}

impl IndiMessage {
    /// Parse one framed element.
    ///
    /// Returns `Ok(None)` for elements this client does not handle (BLOB
    /// vectors, `getProperties` echoes, ...).
    pub fn parse(xml: &str) -> Result<Option<Self>> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        let tag = root.tag_name().name();

        if let Some(kind) = VectorKind::from_tag(tag, "def", "Vector") {
            return parse_def(root, kind).map(|d| Some(IndiMessage::Def(d)));
        }
        if let Some(kind) = VectorKind::from_tag(tag, "set", "Vector") {
            return parse_set(root, kind).map(|s| Some(IndiMessage::Set(s)));
        }
        match tag {
            "delProperty" => Ok(Some(IndiMessage::Del(DelProperty {
                device: required(root, "device")?,
                name: optional(root, "name"),
                timestamp: optional(root, "timestamp"),
                message: optional(root, "message"),
            }))),
            "message" => Ok(Some(IndiMessage::Message(LogMessage {
                device: optional(root, "device"),
                timestamp: optional(root, "timestamp"),
                message: optional(root, "message").unwrap_or_default(),
            }))),
            other => {
                debug!(tag = other, "ignoring unsupported indi element");
                Ok(None)
            }
        }
    }

    /// Device this message concerns, if any.
    pub fn device(&self) -> Option<&str> {
        match self {
            IndiMessage::Def(d) => Some(&d.device),
            IndiMessage::Set(s) => Some(&s.device),
            IndiMessage::Del(d) => Some(&d.device),
            IndiMessage::Message(m) => m.device.as_deref(),
        }
    }

    /// Free-text message attached to this element, if any.
    pub fn log_text(&self) -> Option<&str> {
        match self {
            IndiMessage::Def(d) => d.message.as_deref(),
            IndiMessage::Set(s) => s.message.as_deref(),
            IndiMessage::Del(d) => d.message.as_deref(),
            IndiMessage::Message(m) => Some(&m.message),
        }
    }
}

const RESERVED: [&str; 5] = ["device", "name", "state", "timestamp", "message"];

fn required(node: Node<'_, '_>, attr: &str) -> Result<String> {
    node.attribute(attr)
        .map(str::to_string)
        .ok_or_else(|| IndiError::malformed(node.tag_name().name(), format!("missing {attr}")))
}

fn optional(node: Node<'_, '_>, attr: &str) -> Option<String> {
    node.attribute(attr).map(str::to_string)
}

fn extra_attributes(node: Node<'_, '_>, reserved: &[&str]) -> BTreeMap<String, String> {
    node.attributes()
        .filter(|a| !reserved.contains(&a.name()))
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect()
}

fn members(node: Node<'_, '_>, tag: &str) -> Result<Vec<Member>> {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().name() == tag)
        .map(|c| -> Result<Member> {
            Ok(Member {
                name: required(c, "name")?,
                value: c.text().unwrap_or_default().trim().to_string(),
                attributes: extra_attributes(c, &["name"]),
            })
        })
        .collect()
}

fn parse_def(node: Node<'_, '_>, kind: VectorKind) -> Result<DefVector> {
    Ok(DefVector {
        kind,
        device: required(node, "device")?,
        name: required(node, "name")?,
        state: required(node, "state")?.parse::<VectorState>()?,
        timestamp: optional(node, "timestamp"),
        message: optional(node, "message"),
        attributes: extra_attributes(node, &RESERVED),
        members: members(node, &format!("def{kind}"))?,
    })
}

fn parse_set(node: Node<'_, '_>, kind: VectorKind) -> Result<SetVector> {
    Ok(SetVector {
        kind,
        device: required(node, "device")?,
        name: required(node, "name")?,
        state: optional(node, "state").map(|s| s.parse::<VectorState>()).transpose()?,
        timestamp: optional(node, "timestamp"),
        message: optional(node, "message"),
        attributes: extra_attributes(node, &RESERVED),
        members: members(node, &format!("one{kind}"))?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Outgoing
// ─────────────────────────────────────────────────────────────────────────────

/// `new*Vector`: a client command setting member values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVector {
    pub kind: VectorKind,
    pub device: String,
    pub name: String,
    /// `(member name, value)` in wire order.
    pub members: Vec<(String, String)>,
}

impl NewVector {
    pub fn to_xml(&self) -> String {
        let mut out = format!(
            "<new{kind}Vector device=\"{}\" name=\"{}\">\n",
            escape(&self.device),
            escape(&self.name),
            kind = self.kind,
        );
        for (member, value) in &self.members {
            out.push_str(&format!(
                "  <one{kind} name=\"{}\">{}</one{kind}>\n",
                escape(member),
                escape(value),
                kind = self.kind,
            ));
        }
        out.push_str(&format!("</new{}Vector>\n", self.kind));
        out
    }
}

/// The `getProperties` handshake, optionally narrowed to one device.
pub fn get_properties(device: Option<&str>) -> String {
    match device {
        Some(device) => format!(
            "<getProperties version=\"{PROTOCOL_VERSION}\" device=\"{}\"/>\n",
            escape(device)
        ),
        None => format!("<getProperties version=\"{PROTOCOL_VERSION}\"/>\n"),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
