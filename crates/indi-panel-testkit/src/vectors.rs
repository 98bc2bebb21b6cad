//! Golden vectors: canned INDI traffic and expected diff shapes.
//!
//! The diff vectors pin the exact JSON clients receive, so any change to the
//! wire format shows up as a failing vector.

use serde_json::{json, Value};

use indi_panel_core::{apply_diff, SerialClock, Whitelist};
use indi_panel_store::{Snapshot, Store};

// ─────────────────────────────────────────────────────────────────────────────
// INDI XML
// ─────────────────────────────────────────────────────────────────────────────

/// A camera with an exposure vector, a connection switch and a status light.
pub const CCD_DEFINITIONS: &str = r#"<defSwitchVector device="CCD Simulator" name="CONNECTION" label="Connection" group="Main Control" state="Ok" perm="rw" rule="OneOfMany" timeout="60">
    <defSwitch name="CONNECT" label="Connect">On</defSwitch>
    <defSwitch name="DISCONNECT" label="Disconnect">Off</defSwitch>
</defSwitchVector>
<defNumberVector device="CCD Simulator" name="CCD_EXPOSURE" label="Expose" group="Main Control" state="Idle" perm="rw" timeout="60">
    <defNumber name="CCD_EXPOSURE_VALUE" label="Duration (s)" format="%5.2f" min="0.01" max="3600" step="1">1</defNumber>
</defNumberVector>
<defTextVector device="CCD Simulator" name="DRIVER_INFO" label="Driver Info" group="General Info" state="Idle" perm="ro">
    <defText name="DRIVER_NAME" label="Name">CCD Simulator</defText>
    <defText name="DRIVER_EXEC" label="Exec">indi_simulator_ccd</defText>
</defTextVector>
<defLightVector device="CCD Simulator" name="CCD_STATUS" label="Status" group="Main Control" state="Idle">
    <defLight name="COOLER" label="Cooler">Idle</defLight>
</defLightVector>
"#;

/// Exposure countdown update in Busy state.
pub fn exposure_busy(remaining: f64) -> String {
    format!(
        r#"<setNumberVector device="CCD Simulator" name="CCD_EXPOSURE" state="Busy"><oneNumber name="CCD_EXPOSURE_VALUE">{remaining}</oneNumber></setNumberVector>"#
    )
}

/// Exposure finished.
pub fn exposure_done() -> String {
    r#"<setNumberVector device="CCD Simulator" name="CCD_EXPOSURE" state="Ok"><oneNumber name="CCD_EXPOSURE_VALUE">0</oneNumber></setNumberVector>"#
        .to_string()
}

/// Exposure failed.
pub fn exposure_alert(message: &str) -> String {
    format!(
        r#"<setNumberVector device="CCD Simulator" name="CCD_EXPOSURE" state="Alert" message="{message}"/>"#
    )
}

/// A server log line.
pub fn log_line(device: &str, text: &str) -> String {
    format!(r#"<message device="{device}" timestamp="2024-01-01T00:00:00" message="{text}"/>"#)
}

/// Device removal.
pub fn del_device(device: &str) -> String {
    format!(r#"<delProperty device="{device}"/>"#)
}

// ─────────────────────────────────────────────────────────────────────────────
// Diff vectors
// ─────────────────────────────────────────────────────────────────────────────

/// A store transition and the diff a client must receive for it.
#[derive(Debug, Clone)]
pub struct DiffVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// State the client already holds.
    pub before: Value,
    /// State after the mutation.
    pub after: Value,
    /// Whitelist the client registered with.
    pub whitelist: Whitelist,
    /// Exact wire form of the expected diff.
    pub expected: Value,
}

/// Get all diff vectors.
pub fn all_diff_vectors() -> Vec<DiffVector> {
    vec![
        DiffVector {
            name: "nested scalar change",
            before: json!({"a": {"b": 1, "c": 2}}),
            after: json!({"a": {"b": 2, "c": 2}}),
            whitelist: Whitelist::All,
            expected: json!({"update": {"a": {"update": {"b": 2}}}}),
        },
        DiffVector {
            name: "key removed",
            before: json!({"a": 1, "b": 2}),
            after: json!({"a": 1}),
            whitelist: Whitelist::All,
            expected: json!({"update": {}, "delete": ["b"]}),
        },
        DiffVector {
            name: "object replaced by scalar",
            before: json!({"a": {"b": 1}}),
            after: json!({"a": "x"}),
            whitelist: Whitelist::All,
            expected: json!({"update": {"a": "x"}}),
        },
        DiffVector {
            name: "new subtree",
            before: json!({}),
            after: json!({"dev": {"v": [1, 2]}}),
            whitelist: Whitelist::All,
            expected: json!({"update": {"dev": {"newObject": {"v": {"newArray": {"0": 1, "1": 2}}}}}}),
        },
        DiffVector {
            name: "array element changed",
            before: json!({"v": [1, 2]}),
            after: json!({"v": [1, 3]}),
            whitelist: Whitelist::All,
            expected: json!({"update": {"v": {"update": {"1": 3}}}}),
        },
        DiffVector {
            name: "filtered field is invisible",
            before: json!({"public": 1, "secret": 1}),
            after: json!({"public": 1, "secret": 2}),
            whitelist: Whitelist::fields([("public", Whitelist::All)]),
            expected: Value::Null,
        },
    ]
}

/// Replay one vector: build `before`, sync a client, move to `after`, and
/// return the wire form of the diff (`Null` when there is none).
pub fn replay(vector: &DiffVector) -> Value {
    let mut store = Store::new(SerialClock::new());
    // Assign key by key so that unchanged siblings keep their serials.
    store.set(&[], &vector.before).ok();
    store.end_tick();

    let mut cursor = Snapshot::unseen();
    let first = store.diff(&mut cursor, &vector.whitelist);

    store.set(&[], &vector.after).ok();
    store.end_tick();

    match store.diff(&mut cursor, &vector.whitelist) {
        Some(diff) => {
            let start = first.and_then(|d| apply_diff(None, &d).ok());
            let replica = apply_diff(start.as_ref(), &diff).ok();
            debug_assert_eq!(replica, Some(vector.whitelist.filter(&vector.after)));
            diff.to_json()
        }
        None => Value::Null,
    }
}

/// Check every vector. Returns the names of failing vectors.
pub fn verify_all_vectors() -> Vec<&'static str> {
    all_diff_vectors()
        .into_iter()
        .filter(|v| replay(v) != v.expected)
        .map(|v| v.name)
        .collect()
}
