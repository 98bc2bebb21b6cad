//! Path selectors for synchronizer registrations.
//!
//! A [`PathSpec`] is a sequence of [`PathElement`]s:
//!
//! - `Key("x")` matches exactly the child `x`
//! - `Wildcard` matches every child that exists now or appears later
//! - `Any(alternatives)` continues with each alternative subpath from that point
//!
//! OR-groups combine as a cross product: the elements of every alternative are
//! followed by whatever comes after the group, and nested groups multiply out.
//! [`PathSpec::expand`] flattens a selector into the concrete step lists the
//! trigger tree is built from.

/// One element of a path selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElement {
    /// Exact key.
    Key(String),
    /// Any key, present or future.
    Wildcard,
    /// OR-group: each alternative is tried from this position.
    Any(Vec<PathSpec>),
}

/// A flattened path step: what the trigger tree actually stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Key(String),
    Wildcard,
}

/// A tree-shaped selector over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSpec {
    elements: Vec<PathElement>,
}

impl PathSpec {
    /// The empty selector, which addresses the root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a selector from exact keys only.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elements: keys.into_iter().map(|k| PathElement::Key(k.into())).collect(),
        }
    }

    /// Append an exact key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.elements.push(PathElement::Key(key.into()));
        self
    }

    /// Append a wildcard.
    pub fn wildcard(mut self) -> Self {
        self.elements.push(PathElement::Wildcard);
        self
    }

    /// Append an OR-group of alternative subpaths.
    pub fn any(mut self, alternatives: Vec<PathSpec>) -> Self {
        self.elements.push(PathElement::Any(alternatives));
        self
    }

    /// The raw elements.
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    /// Flatten the selector into concrete step lists.
    ///
    /// Duplicate expansions are kept once. An OR-group with no alternatives
    /// matches nothing, so it removes every path going through it.
    pub fn expand(&self) -> Vec<Vec<Step>> {
        let mut out: Vec<Vec<Step>> = Vec::new();
        for path in expand_elements(&self.elements) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }
}

fn expand_elements(elements: &[PathElement]) -> Vec<Vec<Step>> {
    let Some((first, rest)) = elements.split_first() else {
        return vec![Vec::new()];
    };

    let tails = expand_elements(rest);
    match first {
        PathElement::Key(key) => prefix_all(Step::Key(key.clone()), tails),
        PathElement::Wildcard => prefix_all(Step::Wildcard, tails),
        PathElement::Any(alternatives) => {
            let mut out = Vec::new();
            for alternative in alternatives {
                for head in alternative.expand() {
                    for tail in &tails {
                        let mut path = head.clone();
                        path.extend(tail.iter().cloned());
                        out.push(path);
                    }
                }
            }
            out
        }
    }
}

fn prefix_all(step: Step, tails: Vec<Vec<Step>>) -> Vec<Vec<Step>> {
    tails
        .into_iter()
        .map(|tail| {
            let mut path = Vec::with_capacity(tail.len() + 1);
            path.push(step.clone());
            path.extend(tail);
            path
        })
        .collect()
}

impl<S: Into<String>> FromIterator<S> for PathSpec {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::keys(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> Step {
        Step::Key(k.to_string())
    }

    #[test]
    fn test_plain_keys_expand_to_one_path() {
        let spec = PathSpec::keys(["a", "b"]);
        assert_eq!(spec.expand(), vec![vec![key("a"), key("b")]]);
    }

    #[test]
    fn test_root_expands_to_empty_path() {
        assert_eq!(PathSpec::root().expand(), vec![Vec::<Step>::new()]);
    }

    #[test]
    fn test_or_group_is_cross_product_with_suffix() {
        let spec = PathSpec::root()
            .key("tree")
            .any(vec![
                PathSpec::keys(["x"]),
                PathSpec::root().key("y").wildcard(),
            ])
            .key("z");

        assert_eq!(
            spec.expand(),
            vec![
                vec![key("tree"), key("x"), key("z")],
                vec![key("tree"), key("y"), Step::Wildcard, key("z")],
            ]
        );
    }

    #[test]
    fn test_nested_or_groups_multiply() {
        let spec = PathSpec::root()
            .any(vec![PathSpec::keys(["a"]), PathSpec::keys(["b"])])
            .any(vec![PathSpec::keys(["c"]), PathSpec::keys(["d"])]);

        let paths = spec.expand();
        assert_eq!(paths.len(), 4);
        assert!(paths.contains(&vec![key("b"), key("c")]));
        assert!(paths.contains(&vec![key("a"), key("d")]));
    }

    #[test]
    fn test_duplicate_alternatives_collapse() {
        let spec = PathSpec::root().any(vec![PathSpec::keys(["a"]), PathSpec::keys(["a"])]);
        assert_eq!(spec.expand(), vec![vec![key("a")]]);
    }

    #[test]
    fn test_empty_or_group_matches_nothing() {
        let spec = PathSpec::root().key("a").any(vec![]);
        assert!(spec.expand().is_empty());
    }
}
