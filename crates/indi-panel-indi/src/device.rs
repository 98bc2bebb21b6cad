//! Read views over the device tree and command handles.
//!
//! Views borrow the store and are only handed out inside
//! [`IndiConnection::with_tree`], so a predicate always sees one consistent
//! state. Handles own a connection clone and can outlive any borrow; each
//! read goes through a fresh view.

use indi_panel_core::Serial;
use indi_panel_store::{Node, Store};
use serde_json::Value;
use tracing::debug;

use crate::connection::IndiConnection;
use crate::error::{IndiError, Result};
use crate::message::{NewVector, VectorKind, VectorState};

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────────

/// The whole device tree.
#[derive(Debug, Clone, Copy)]
pub struct DeviceTreeView<'a> {
    store: &'a Store,
    root: &'a [String],
}

impl<'a> DeviceTreeView<'a> {
    pub fn new(store: &'a Store, tree_path: &'a [String]) -> Self {
        Self {
            store,
            root: tree_path,
        }
    }

    fn node(&self) -> Option<&'a Node> {
        let path: Vec<&str> = self.root.iter().map(String::as_str).collect();
        self.store.node(&path)
    }

    /// Names of every known device.
    pub fn device_names(&self) -> Vec<String> {
        self.node().map(Node::keys).unwrap_or_default()
    }

    pub fn device(&self, name: &str) -> DeviceView<'a> {
        DeviceView {
            node: self.node().and_then(|n| n.child(name)),
            name: name.to_string(),
        }
    }
}

/// One device. May refer to a device that does not exist (yet).
#[derive(Debug, Clone)]
pub struct DeviceView<'a> {
    node: Option<&'a Node>,
    name: String,
}

impl<'a> DeviceView<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.node.is_some()
    }

    pub fn vector_names(&self) -> Vec<String> {
        self.node.map(Node::keys).unwrap_or_default()
    }

    pub fn vector(&self, name: &str) -> VectorView<'a> {
        VectorView {
            node: self.node.and_then(|n| n.child(name)),
            device: self.name.clone(),
            name: name.to_string(),
        }
    }
}

/// One vector of a device.
#[derive(Debug, Clone)]
pub struct VectorView<'a> {
    node: Option<&'a Node>,
    device: String,
    name: String,
}

impl<'a> VectorView<'a> {
    fn field(&self, field: &str) -> Option<&'a Value> {
        self.node?.child(field)?.as_scalar()
    }

    fn member(&self, member: &str) -> Option<&'a Node> {
        self.node?.child("childs")?.child(member)
    }

    fn qualified(&self, member: &str) -> String {
        format!("{}.{}.{}", self.device, self.name, member)
    }

    pub fn exists(&self) -> bool {
        self.node.is_some()
    }

    pub fn kind(&self) -> Option<VectorKind> {
        self.field("$type")?.as_str()?.parse().ok()
    }

    pub fn state(&self) -> Option<VectorState> {
        self.field("$state")?.as_str()?.parse().ok()
    }

    /// Revision drawn on the last definition, update or local command.
    pub fn rev(&self) -> Option<Serial> {
        self.field("$rev")?.as_u64()
    }

    /// Any vector attribute such as `label`, `group` or `perm`.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.field(&format!("${name}")).map(as_text)
    }

    /// A vector that exists and is not Busy accepts a new command.
    pub fn is_ready_for_order(&self) -> bool {
        self.exists() && self.state() != Some(VectorState::Busy)
    }

    /// Member names in declaration order.
    pub fn property_names(&self) -> Vec<String> {
        self.node
            .and_then(|n| n.child("childNames"))
            .map(|names| {
                names
                    .entries()
                    .into_iter()
                    .filter_map(|(_, n)| n.as_scalar().and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_property(&self, member: &str) -> bool {
        self.member(member).is_some()
    }

    pub fn property_value_if_exists(&self, member: &str) -> Option<String> {
        self.member(member)?.child("$_")?.as_scalar().map(as_text)
    }

    /// Current value of a member; `NotFound` names the full path.
    pub fn property_value(&self, member: &str) -> Result<String> {
        self.property_value_if_exists(member)
            .ok_or_else(|| IndiError::NotFound(self.qualified(member)))
    }

    /// A member attribute such as `label` or `format`.
    pub fn property_attribute(&self, member: &str, name: &str) -> Option<String> {
        self.member(member)?
            .child(&format!("${name}"))?
            .as_scalar()
            .map(as_text)
    }

    /// `(name, value)` for every member, in declaration order.
    pub fn values(&self) -> Vec<(String, String)> {
        self.property_names()
            .into_iter()
            .filter_map(|name| {
                let value = self.property_value_if_exists(&name)?;
                Some((name, value))
            })
            .collect()
    }

    /// Build the command that writes `values` to this vector.
    ///
    /// Text and Number vectors must be written whole, so members not named
    /// in `values` keep their current value. Switch vectors carry only the
    /// named members. Light vectors are read-only.
    pub fn new_command(&self, values: &[(&str, &str)]) -> Result<NewVector> {
        let kind = self
            .kind()
            .ok_or_else(|| IndiError::NotFound(format!("{}.{}", self.device, self.name)))?;
        if kind == VectorKind::Light {
            return Err(IndiError::InvalidCommand(format!(
                "{}.{} is a light vector",
                self.device, self.name
            )));
        }
        if let Some((unknown, _)) = values.iter().find(|(m, _)| !self.has_property(m)) {
            return Err(IndiError::NotFound(self.qualified(unknown)));
        }

        let members = match kind {
            VectorKind::Switch => values
                .iter()
                .map(|(m, v)| (m.to_string(), v.to_string()))
                .collect(),
            _ => self
                .property_names()
                .into_iter()
                .map(|name| {
                    let value = values
                        .iter()
                        .find(|(m, _)| *m == name)
                        .map(|(_, v)| v.to_string())
                        .or_else(|| self.property_value_if_exists(&name))
                        .unwrap_or_default();
                    (name, value)
                })
                .collect(),
        };

        Ok(NewVector {
            kind,
            device: self.device.clone(),
            name: self.name.clone(),
            members,
        })
    }
}

// ─────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────

/// A device addressed by name on a live connection.
#[derive(Clone)]
pub struct DeviceHandle {
    conn: IndiConnection,
    name: String,
}

impl DeviceHandle {
    pub(crate) fn new(conn: IndiConnection, name: &str) -> Self {
        Self {
            conn,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.conn.with_tree(|tree| tree.device(&self.name).exists())
    }

    pub fn vector_names(&self) -> Vec<String> {
        self.conn.with_tree(|tree| tree.device(&self.name).vector_names())
    }

    pub fn vector(&self, name: &str) -> VectorHandle {
        VectorHandle {
            conn: self.conn.clone(),
            device: self.name.clone(),
            name: name.to_string(),
        }
    }
}

/// A vector addressed by device and name on a live connection.
#[derive(Clone)]
pub struct VectorHandle {
    conn: IndiConnection,
    device: String,
    name: String,
}

impl VectorHandle {
    fn read<R>(&self, f: impl FnOnce(&VectorView<'_>) -> R) -> R {
        self.conn
            .with_tree(|tree| f(&tree.device(&self.device).vector(&self.name)))
    }

    pub fn exists(&self) -> bool {
        self.read(|v| v.exists())
    }

    pub fn kind(&self) -> Option<VectorKind> {
        self.read(|v| v.kind())
    }

    pub fn state(&self) -> Option<VectorState> {
        self.read(|v| v.state())
    }

    pub fn rev(&self) -> Option<Serial> {
        self.read(|v| v.rev())
    }

    pub fn is_ready_for_order(&self) -> bool {
        self.read(|v| v.is_ready_for_order())
    }

    pub fn property_names(&self) -> Vec<String> {
        self.read(|v| v.property_names())
    }

    pub fn property_value(&self, member: &str) -> Result<String> {
        self.read(|v| v.property_value(member))
    }

    pub fn property_value_if_exists(&self, member: &str) -> Option<String> {
        self.read(|v| v.property_value_if_exists(member))
    }

    /// Send new member values to the driver and mark the vector Busy.
    pub fn set_values(&self, values: &[(&str, &str)]) -> Result<()> {
        self.conn.ensure_connected()?;
        let command = self.read(|v| v.new_command(values))?;
        self.conn.submit(&self.device, &self.name, command.to_xml())?;
        debug!(device = %self.device, vector = %self.name, members = command.members.len(), "vector write sent");
        Ok(())
    }

    /// Like [`set_values`](Self::set_values), but refuses while the vector
    /// is still Busy from an earlier command.
    pub fn set_values_if_ready(&self, values: &[(&str, &str)]) -> Result<()> {
        if self.state() == Some(VectorState::Busy) {
            return Err(IndiError::Busy {
                device: self.device.clone(),
                vector: self.name.clone(),
            });
        }
        self.set_values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_tree::{DeviceTreeWriter, TreeConfig};
    use crate::message::IndiMessage;
    use indi_panel_core::SerialClock;

    fn tree() -> (Store, TreeConfig) {
        let clock = SerialClock::new();
        let mut store = Store::new(clock.clone());
        let config = TreeConfig::default();
        let mut writer = DeviceTreeWriter::new(config.clone(), clock);
        for xml in [
            r#"<defNumberVector device="Mount" name="EQUATORIAL_EOD_COORD" state="Ok" perm="rw" label="Coords">
                <defNumber name="RA">1.5</defNumber><defNumber name="DEC">20</defNumber>
            </defNumberVector>"#,
            r#"<defSwitchVector device="Mount" name="ABORT" state="Idle" rule="AtMostOne">
                <defSwitch name="ABORT">Off</defSwitch>
            </defSwitchVector>"#,
            r#"<defLightVector device="Mount" name="STATUS" state="Busy">
                <defLight name="SLEWING">Busy</defLight>
            </defLightVector>"#,
        ] {
            let message = IndiMessage::parse(xml).unwrap().unwrap();
            writer.apply(&mut store, &message).unwrap();
        }
        (store, config)
    }

    #[test]
    fn test_views_read_tree() {
        let (store, config) = tree();
        let view = DeviceTreeView::new(&store, &config.tree_path);

        assert_eq!(view.device_names(), vec!["Mount"]);
        assert!(!view.device("Nope").exists());

        let coords = view.device("Mount").vector("EQUATORIAL_EOD_COORD");
        assert!(coords.exists());
        assert_eq!(coords.kind(), Some(VectorKind::Number));
        assert_eq!(coords.state(), Some(VectorState::Ok));
        assert!(coords.rev().is_some());
        assert_eq!(coords.attribute("label").as_deref(), Some("Coords"));
        assert!(coords.is_ready_for_order());
        assert_eq!(coords.property_names(), vec!["RA", "DEC"]);
        assert_eq!(coords.property_value("DEC").unwrap(), "20");
        assert_eq!(coords.values(), vec![("RA".into(), "1.5".into()), ("DEC".into(), "20".into())]);

        let err = coords.property_value("ALT").unwrap_err();
        assert!(matches!(err, IndiError::NotFound(p) if p == "Mount.EQUATORIAL_EOD_COORD.ALT"));

        assert!(!view.device("Mount").vector("STATUS").is_ready_for_order());
    }

    #[test]
    fn test_number_command_is_completed_from_current_values() {
        let (store, config) = tree();
        let view = DeviceTreeView::new(&store, &config.tree_path);
        let command = view
            .device("Mount")
            .vector("EQUATORIAL_EOD_COORD")
            .new_command(&[("DEC", "45")])
            .unwrap();
        assert_eq!(
            command.members,
            vec![("RA".to_string(), "1.5".to_string()), ("DEC".to_string(), "45".to_string())]
        );
    }

    #[test]
    fn test_switch_command_carries_named_members_only() {
        let (store, config) = tree();
        let view = DeviceTreeView::new(&store, &config.tree_path);
        let command = view
            .device("Mount")
            .vector("ABORT")
            .new_command(&[("ABORT", "On")])
            .unwrap();
        assert_eq!(command.kind, VectorKind::Switch);
        assert_eq!(command.members, vec![("ABORT".to_string(), "On".to_string())]);
    }

    #[test]
    fn test_invalid_commands_are_rejected() {
        let (store, config) = tree();
        let view = DeviceTreeView::new(&store, &config.tree_path);
        let mount = view.device("Mount");

        assert!(matches!(
            mount.vector("STATUS").new_command(&[("SLEWING", "Ok")]),
            Err(IndiError::InvalidCommand(_))
        ));
        assert!(matches!(
            mount.vector("ABORT").new_command(&[("BOGUS", "On")]),
            Err(IndiError::NotFound(_))
        ));
        assert!(matches!(
            mount.vector("MISSING").new_command(&[]),
            Err(IndiError::NotFound(_))
        ));
    }
}
