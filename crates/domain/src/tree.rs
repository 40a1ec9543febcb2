//! State tree: recursive snapshot of the whole addressable namespace.
//!
//! A subtree can be marked *opaque*: transports that publish one message per
//! path (MQTT) emit an opaque subtree as a single JSON unit instead of one
//! message per leaf. Opaque subtrees nested inside another opaque subtree are
//! left out of the parent's unit and emitted at their own path.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::path::Path;

/// One child of a [`StateTree`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Value(Value),
    Tree(StateTree),
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<StateTree> for Node {
    fn from(tree: StateTree) -> Self {
        Self::Tree(tree)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTree {
    opaque: bool,
    /// Insertion order, which is the order children serialize and flatten in.
    children: IndexMap<String, Node>,
}

impl StateTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty subtree emitted as one unit when flattened.
    #[must_use]
    pub fn opaque() -> Self {
        Self {
            opaque: true,
            children: IndexMap::new(),
        }
    }

    /// An opaque subtree whose leaves are the entries of `map`, in its order.
    #[must_use]
    pub fn opaque_from(map: &Map<String, Value>) -> Self {
        let mut tree = Self::opaque();
        for (key, value) in map {
            tree.insert(key.clone(), value.clone());
        }
        tree
    }

    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    /// Add a child. Replacing an existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, node: impl Into<Node>) {
        self.children.insert(key.into(), node.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.children.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Full recursive JSON, opaque or not.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let map = self
            .children
            .iter()
            .map(|(key, node)| {
                let value = match node {
                    Node::Value(v) => v.clone(),
                    Node::Tree(t) => t.to_value(),
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(map)
    }

    /// One `(path, json)` pair per publishable unit, in insertion order.
    ///
    /// Plain leaves outside any opaque subtree are emitted individually;
    /// each opaque subtree is emitted once, without its nested opaque
    /// subtrees, which follow at their own paths.
    #[must_use]
    pub fn flatten(&self) -> Vec<(Path, Value)> {
        let mut out = Vec::new();
        self.collect(&Path::root(), false, &mut out);
        out
    }

    fn collect(&self, prefix: &Path, inside_unit: bool, out: &mut Vec<(Path, Value)>) {
        for (key, node) in &self.children {
            let path = prefix.join(key.clone());
            match node {
                Node::Value(value) => {
                    if !inside_unit {
                        out.push((path, value.clone()));
                    }
                }
                Node::Tree(tree) if tree.opaque => {
                    out.push((path.clone(), tree.unit_value()));
                    tree.collect(&path, true, out);
                }
                Node::Tree(tree) => tree.collect(&path, inside_unit, out),
            }
        }
    }

    fn unit_value(&self) -> Value {
        let map = self
            .children
            .iter()
            .filter_map(|(key, node)| match node {
                Node::Value(v) => Some((key.clone(), v.clone())),
                Node::Tree(t) if t.opaque => None,
                Node::Tree(t) => Some((key.clone(), t.unit_value())),
            })
            .collect();
        Value::Object(map)
    }
}

impl Serialize for StateTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.children.serialize(serializer)
    }
}
