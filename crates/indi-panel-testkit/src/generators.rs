//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::Value;

use indi_panel_core::Whitelist;
use indi_panel_store::Store;

/// Keys used by the generators. Small on purpose so that random operations
/// collide on the same nodes often.
pub const KEYS: [&str; 5] = ["a", "b", "c", "0", "1"];

/// One store mutation.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Set(Vec<String>, Value),
    Remove(Vec<String>),
    Touch(Vec<String>),
    EndTick,
}

impl StoreOp {
    /// Apply to `store`. Operations on impossible paths are rejected by the
    /// store without side effects, so their errors are ignored.
    pub fn apply(&self, store: &mut Store) {
        match self {
            StoreOp::Set(path, value) => {
                let _ = store.set(&as_strs(path), value);
            }
            StoreOp::Remove(path) => {
                let _ = store.remove(&as_strs(path));
            }
            StoreOp::Touch(path) => {
                store.touch(&as_strs(path));
            }
            StoreOp::EndTick => {
                store.end_tick();
            }
        }
    }
}

/// Borrow an owned path as the store expects it.
pub fn as_strs(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

/// Generate a non-empty path of 1 to 3 keys.
pub fn path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(KEYS.to_vec()).prop_map(str::to_string), 1..4)
}

/// Generate a JSON scalar.
pub fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (0i64..4).prop_map(Value::from),
        prop::sample::select(vec!["x", "y"]).prop_map(Value::from),
    ]
}

/// Generate a JSON value up to three levels deep.
pub fn json_value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Value::from),
            prop::collection::btree_map(prop::sample::select(vec!["a", "b", "c"]), inner, 0..3)
                .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k.to_string(), v)).collect())),
        ]
    })
}

/// Generate a store mutation, weighted towards writes.
pub fn store_op() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        4 => (path(), json_value()).prop_map(|(p, v)| StoreOp::Set(p, v)),
        2 => path().prop_map(StoreOp::Remove),
        1 => path().prop_map(StoreOp::Touch),
        2 => Just(StoreOp::EndTick),
    ]
}

/// Generate batches of mutations; one diff is taken after each batch.
pub fn op_batches() -> impl Strategy<Value = Vec<Vec<StoreOp>>> {
    prop::collection::vec(prop::collection::vec(store_op(), 0..6), 1..6)
}

/// Generate a `Fields` whitelist over the generator keys.
pub fn whitelist() -> impl Strategy<Value = Whitelist> {
    let rule = prop_oneof![
        3 => Just(Whitelist::All),
        1 => Just(Whitelist::Nothing),
    ];
    let nested = prop::collection::btree_map(
        prop::sample::select(KEYS.to_vec()).prop_map(str::to_string),
        rule,
        0..4,
    )
    .prop_map(Whitelist::Fields);
    prop::collection::btree_map(
        prop::sample::select(KEYS.to_vec()).prop_map(str::to_string),
        prop_oneof![Just(Whitelist::All), nested],
        1..4,
    )
    .prop_map(Whitelist::Fields)
}
