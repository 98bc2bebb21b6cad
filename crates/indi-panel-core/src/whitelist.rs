//! Field-level whitelist for snapshots and diffs.

use std::collections::BTreeMap;

use serde_json::Value;

/// Recursive `{key: true | false | sub-whitelist}` selector.
///
/// `All` accepts a whole subtree, `Nothing` rejects it. In a `Fields` map a
/// key that is not listed is rejected. Rules address object keys only: array
/// elements are kept positionally and inherit the array's own rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Whitelist {
    #[default]
    All,
    Nothing,
    Fields(BTreeMap<String, Whitelist>),
}

impl Whitelist {
    /// Build a `Fields` whitelist from `(key, rule)` pairs.
    pub fn fields<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Whitelist)>,
        S: Into<String>,
    {
        Whitelist::Fields(entries.into_iter().map(|(k, w)| (k.into(), w)).collect())
    }

    /// The rule for `key`, or `None` if the key is filtered out.
    pub fn child(&self, key: &str) -> Option<&Whitelist> {
        match self {
            Whitelist::All => Some(&Whitelist::All),
            Whitelist::Nothing => None,
            Whitelist::Fields(fields) => match fields.get(key) {
                Some(Whitelist::Nothing) | None => None,
                Some(rule) => Some(rule),
            },
        }
    }

    /// Whether `key` passes this whitelist.
    pub fn accepts(&self, key: &str) -> bool {
        self.child(key).is_some()
    }

    /// Parse the JSON form: `true`, `false`, or an object of nested rules.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Whitelist::All),
            Value::Bool(false) => Some(Whitelist::Nothing),
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, rule) in map {
                    fields.insert(key.clone(), Whitelist::from_json(rule)?);
                }
                Some(Whitelist::Fields(fields))
            }
            _ => None,
        }
    }

    /// Filter a plain value through this whitelist.
    pub fn filter(&self, value: &Value) -> Value {
        match (self, value) {
            (Whitelist::All, v) => v.clone(),
            (_, Value::Object(map)) => Value::Object(
                map.iter()
                    .filter_map(|(k, v)| self.child(k).map(|rule| (k.clone(), rule.filter(v))))
                    .collect(),
            ),
            (_, Value::Array(items)) => Value::Array(items.iter().map(|v| self.filter(v)).collect()),
            (_, v) => v.clone(),
        }
    }
}
