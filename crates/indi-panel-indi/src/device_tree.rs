//! Projection of INDI messages onto the store.
//!
//! Layout under the tree path (default `deviceTree`):
//!
//! ```text
//! <device>.<vector>.$type        Text | Number | Switch | Light
//!                  .$state       Idle | Ok | Busy | Alert
//!                  .$rev         revision drawn from the clock on every touch
//!                  .$timestamp   driver timestamp, when given
//!                  .$<attr>      every other vector attribute (label, group, perm, ...)
//!                  .childs.<member>.$_       current value
//!                  .childs.<member>.$<attr>  member attributes (label, format, ...)
//!                  .childNames   declared member order
//! ```
//!
//! Free-text `message` attributes and elements are appended to a bounded log
//! at `<messages path>.byUid.<uid>`.

use std::collections::VecDeque;

use indi_panel_core::SerialClock;
use indi_panel_store::Store;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::message::{DefVector, DelProperty, IndiMessage, SetVector, VectorState};

/// Where in the store the device tree and message log live.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    pub tree_path: Vec<String>,
    pub messages_path: Vec<String>,
    /// Log entries kept before the oldest is dropped.
    pub max_messages: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            tree_path: vec!["deviceTree".to_string()],
            messages_path: vec!["messages".to_string()],
            max_messages: 100,
        }
    }
}

/// Applies parsed messages to the device tree. The single writer of that
/// subtree.
#[derive(Debug)]
pub struct DeviceTreeWriter {
    config: TreeConfig,
    clock: SerialClock,
    next_uid: u64,
    log: VecDeque<u64>,
}

fn set_field(store: &mut Store, base: &[&str], field: &str, value: Value) -> Result<()> {
    let mut path = base.to_vec();
    path.push(field);
    store.set(&path, &value)?;
    Ok(())
}

pub(crate) fn join<'a>(base: &'a [String], rest: &[&'a str]) -> Vec<&'a str> {
    base.iter().map(String::as_str).chain(rest.iter().copied()).collect()
}

impl DeviceTreeWriter {
    pub fn new(config: TreeConfig, clock: SerialClock) -> Self {
        Self {
            config,
            clock,
            next_uid: 0,
            log: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Apply one message.
    ///
    /// Updates for unknown devices, vectors or members are logged and
    /// ignored; only store failures are errors.
    pub fn apply(&mut self, store: &mut Store, message: &IndiMessage) -> Result<()> {
        if let Some(text) = message.log_text() {
            let timestamp = match message {
                IndiMessage::Def(d) => d.timestamp.as_deref(),
                IndiMessage::Set(s) => s.timestamp.as_deref(),
                IndiMessage::Del(d) => d.timestamp.as_deref(),
                IndiMessage::Message(m) => m.timestamp.as_deref(),
            };
            self.append_log(store, message.device(), timestamp, text)?;
        }

        match message {
            IndiMessage::Def(def) => self.define(store, def),
            IndiMessage::Set(set) => self.update(store, set),
            IndiMessage::Del(del) => self.delete(store, del),
            IndiMessage::Message(_) => Ok(()),
        }
    }

    /// Drop every device, e.g. when the connection goes away.
    pub fn clear(&mut self, store: &mut Store) -> Result<()> {
        let path = join(&self.config.tree_path, &[]);
        store.set(&path, &json!({}))?;
        Ok(())
    }

    /// Optimistically mark a vector Busy after sending a command.
    pub fn mark_busy(&mut self, store: &mut Store, device: &str, vector: &str) -> Result<()> {
        let base = join(&self.config.tree_path, &[device, vector]);
        if !store.contains(&base) {
            return Ok(());
        }
        set_field(store, &base, "$state", json!(VectorState::Busy.as_str()))?;
        set_field(store, &base, "$rev", json!(self.clock.next()))
    }

    fn define(&mut self, store: &mut Store, def: &DefVector) -> Result<()> {
        let mut vector = Map::new();
        vector.insert("$type".into(), json!(def.kind.as_str()));
        vector.insert("$state".into(), json!(def.state.as_str()));
        vector.insert("$rev".into(), json!(self.clock.next()));
        if let Some(ts) = &def.timestamp {
            vector.insert("$timestamp".into(), json!(ts));
        }
        for (k, v) in &def.attributes {
            vector.insert(format!("${k}"), json!(v));
        }

        let mut childs = Map::new();
        for member in &def.members {
            let mut child = Map::new();
            child.insert("$_".into(), json!(member.value));
            child.insert("$name".into(), json!(member.name));
            for (k, v) in &member.attributes {
                child.insert(format!("${k}"), json!(v));
            }
            childs.insert(member.name.clone(), Value::Object(child));
        }
        vector.insert("childs".into(), Value::Object(childs));
        vector.insert(
            "childNames".into(),
            Value::Array(def.members.iter().map(|m| json!(m.name)).collect()),
        );

        let path = join(&self.config.tree_path, &[def.device.as_str(), def.name.as_str()]);
        store.set(&path, &Value::Object(vector))?;
        debug!(device = %def.device, vector = %def.name, kind = %def.kind, "vector defined");
        Ok(())
    }

    fn update(&mut self, store: &mut Store, set: &SetVector) -> Result<()> {
        let base = join(&self.config.tree_path, &[set.device.as_str(), set.name.as_str()]);
        if !store.contains(&base) {
            warn!(device = %set.device, vector = %set.name, "update for undeclared vector ignored");
            return Ok(());
        }

        if let Some(state) = set.state {
            set_field(store, &base, "$state", json!(state.as_str()))?;
        }
        if let Some(ts) = &set.timestamp {
            set_field(store, &base, "$timestamp", json!(ts))?;
        }
        for (k, v) in &set.attributes {
            set_field(store, &base, &format!("${k}"), json!(v))?;
        }
        for member in &set.members {
            let mut child = base.clone();
            child.extend(["childs", member.name.as_str()]);
            if !store.contains(&child) {
                warn!(
                    device = %set.device,
                    vector = %set.name,
                    member = %member.name,
                    "update for undeclared member ignored"
                );
                continue;
            }
            set_field(store, &child, "$_", json!(member.value))?;
        }
        set_field(store, &base, "$rev", json!(self.clock.next()))
    }

    fn delete(&mut self, store: &mut Store, del: &DelProperty) -> Result<()> {
        let removed = match &del.name {
            Some(name) => store.remove(&join(
                &self.config.tree_path,
                &[del.device.as_str(), name.as_str()],
            ))?,
            None => store.remove(&join(&self.config.tree_path, &[del.device.as_str()]))?,
        };
        if !removed {
            debug!(device = %del.device, vector = ?del.name, "delProperty for unknown target");
        }
        Ok(())
    }

    fn append_log(
        &mut self,
        store: &mut Store,
        device: Option<&str>,
        timestamp: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let uid = self.next_uid;
        self.next_uid += 1;

        let mut entry = Map::new();
        if let Some(device) = device {
            entry.insert("$device".into(), json!(device));
        }
        if let Some(ts) = timestamp {
            entry.insert("$timestamp".into(), json!(ts));
        }
        entry.insert("$message".into(), json!(text));

        let key = uid.to_string();
        store.set(&join(&self.config.messages_path, &["byUid", key.as_str()]), &Value::Object(entry))?;
        self.log.push_back(uid);

        while self.log.len() > self.config.max_messages {
            let Some(oldest) = self.log.pop_front() else {
                break;
            };
            let key = oldest.to_string();
            store.remove(&join(&self.config.messages_path, &["byUid", key.as_str()]))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> IndiMessage {
        IndiMessage::parse(xml).unwrap().unwrap()
    }

    fn setup() -> (Store, DeviceTreeWriter) {
        let clock = SerialClock::new();
        (
            Store::new(clock.clone()),
            DeviceTreeWriter::new(TreeConfig::default(), clock),
        )
    }

    const DEF_EXPOSURE: &str = r#"<defNumberVector device="CCD1" name="CCD_EXPOSURE" state="Idle" perm="rw" label="Expose">
        <defNumber name="CCD_EXPOSURE_VALUE" label="Duration" format="%5.2f">5</defNumber>
    </defNumberVector>"#;

    #[test]
    fn test_def_builds_vector() {
        let (mut store, mut writer) = setup();
        writer.apply(&mut store, &parse(DEF_EXPOSURE)).unwrap();

        let vector = store.get(&["deviceTree", "CCD1", "CCD_EXPOSURE"]).unwrap();
        assert_eq!(vector["$type"], json!("Number"));
        assert_eq!(vector["$state"], json!("Idle"));
        assert_eq!(vector["$perm"], json!("rw"));
        assert_eq!(vector["childs"]["CCD_EXPOSURE_VALUE"]["$_"], json!("5"));
        assert_eq!(vector["childs"]["CCD_EXPOSURE_VALUE"]["$format"], json!("%5.2f"));
        assert_eq!(vector["childNames"], json!(["CCD_EXPOSURE_VALUE"]));
        assert!(vector["$rev"].is_u64());
    }

    #[test]
    fn test_set_updates_existing_vector() {
        let (mut store, mut writer) = setup();
        writer.apply(&mut store, &parse(DEF_EXPOSURE)).unwrap();
        let rev = store.get(&["deviceTree", "CCD1", "CCD_EXPOSURE", "$rev"]).unwrap();

        writer
            .apply(
                &mut store,
                &parse(r#"<setNumberVector device="CCD1" name="CCD_EXPOSURE" state="Busy" timestamp="t1"><oneNumber name="CCD_EXPOSURE_VALUE">4.9</oneNumber><oneNumber name="BOGUS">1</oneNumber></setNumberVector>"#),
            )
            .unwrap();

        let vector = store.get(&["deviceTree", "CCD1", "CCD_EXPOSURE"]).unwrap();
        assert_eq!(vector["$state"], json!("Busy"));
        assert_eq!(vector["$timestamp"], json!("t1"));
        assert_eq!(vector["childs"]["CCD_EXPOSURE_VALUE"]["$_"], json!("4.9"));
        assert!(vector["childs"].get("BOGUS").is_none());
        assert_ne!(vector["$rev"], rev);
    }

    #[test]
    fn test_set_for_unknown_vector_is_ignored() {
        let (mut store, mut writer) = setup();
        writer
            .apply(&mut store, &parse(r#"<setTextVector device="X" name="Y" state="Ok"/>"#))
            .unwrap();
        assert!(!store.contains(&["deviceTree", "X"]));
    }

    #[test]
    fn test_del_property() {
        let (mut store, mut writer) = setup();
        writer.apply(&mut store, &parse(DEF_EXPOSURE)).unwrap();
        writer
            .apply(
                &mut store,
                &parse(r#"<defSwitchVector device="CCD1" name="CONNECTION" state="Ok" rule="OneOfMany"><defSwitch name="CONNECT">On</defSwitch></defSwitchVector>"#),
            )
            .unwrap();

        writer
            .apply(&mut store, &parse(r#"<delProperty device="CCD1" name="CCD_EXPOSURE"/>"#))
            .unwrap();
        assert!(!store.contains(&["deviceTree", "CCD1", "CCD_EXPOSURE"]));
        assert!(store.contains(&["deviceTree", "CCD1", "CONNECTION"]));

        writer
            .apply(&mut store, &parse(r#"<delProperty device="CCD1"/>"#))
            .unwrap();
        assert_eq!(store.get(&["deviceTree"]), Some(json!({})));
    }

    #[test]
    fn test_message_log_is_bounded() {
        let clock = SerialClock::new();
        let mut store = Store::new(clock.clone());
        let config = TreeConfig {
            max_messages: 2,
            ..TreeConfig::default()
        };
        let mut writer = DeviceTreeWriter::new(config, clock);

        for i in 0..3 {
            let xml = format!(r#"<message device="CCD1" message="line {i}"/>"#);
            writer.apply(&mut store, &parse(&xml)).unwrap();
        }
        let log = store.get(&["messages", "byUid"]).unwrap();
        assert_eq!(log.as_object().unwrap().len(), 2);
        assert!(log.get("0").is_none());
        assert_eq!(log["2"]["$message"], json!("line 2"));
        assert_eq!(log["2"]["$device"], json!("CCD1"));
    }

    #[test]
    fn test_clear_and_mark_busy() {
        let (mut store, mut writer) = setup();
        writer.apply(&mut store, &parse(DEF_EXPOSURE)).unwrap();

        writer.mark_busy(&mut store, "CCD1", "CCD_EXPOSURE").unwrap();
        assert_eq!(
            store.get(&["deviceTree", "CCD1", "CCD_EXPOSURE", "$state"]),
            Some(json!("Busy"))
        );

        writer.clear(&mut store).unwrap();
        assert_eq!(store.get(&["deviceTree"]), Some(json!({})));
    }
}
