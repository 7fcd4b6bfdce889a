//! The node tree the device exposes to the broker.
//!
//! Nodes carry a name, a method table and children. Children are stored
//! either in an ordered map (trees assembled at runtime) or a sorted
//! vector (fixed node sets); both look the same to path resolution and to
//! `ls`. Node specialization is a tagged sum — the dispatcher matches on
//! [`NodeKind`] instead of downcasting.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::methods::{DOUBLE_DMAP, DOUBLE_READ_ONLY_DMAP, MethodTable};

/// Child storage variant, chosen per node at creation.
pub enum Children {
    /// Ordered map; cheap inserts for trees built up dynamically.
    Tree(BTreeMap<String, Node>),
    /// Sorted vector; compact storage for fixed child sets.
    Array(Vec<Node>),
}

impl Children {
    pub fn tree() -> Self {
        Children::Tree(BTreeMap::new())
    }

    pub fn array() -> Self {
        Children::Array(Vec::new())
    }

    fn insert(&mut self, child: Node) {
        match self {
            Children::Tree(map) => {
                map.insert(child.name.clone(), child);
            }
            Children::Array(vec) => {
                match vec.binary_search_by(|n| n.name.as_str().cmp(&child.name)) {
                    Ok(at) => vec[at] = child,
                    Err(at) => vec.insert(at, child),
                }
            }
        }
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        match self {
            Children::Tree(map) => map.get_mut(name),
            Children::Array(vec) => {
                let at = vec.binary_search_by(|n| n.name.as_str().cmp(name)).ok()?;
                Some(&mut vec[at])
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Children::Tree(map) => map.len(),
            Children::Array(vec) => vec.len(),
        }
    }

    /// Uniform name iteration over both storage variants, in order.
    fn names(&self) -> impl Iterator<Item = &str> {
        let (tree, array) = match self {
            Children::Tree(map) => (Some(map.values()), None),
            Children::Array(vec) => (None, Some(vec.iter())),
        };
        tree.into_iter()
            .flatten()
            .chain(array.into_iter().flatten())
            .map(|n| n.name.as_str())
    }
}

/// Node specialization.
pub enum NodeKind {
    Generic,
    TypedValue(TypedValueNode),
    File(crate::file_node::FileNode),
    DotApp(crate::dotapp::DotAppNode),
    DotDevice(crate::dotdevice::DotDeviceNode),
}

/// One named element of the exposed tree.
pub struct Node {
    name: String,
    methods: &'static MethodTable,
    children: Children,
    pub kind: NodeKind,
}

impl Node {
    /// Plain node with the given method table. Sibling names must be
    /// unique; inserting a duplicate replaces the previous child.
    pub fn new(name: impl Into<String>, methods: &'static MethodTable, children: Children) -> Self {
        Node {
            name: name.into(),
            methods,
            children,
            kind: NodeKind::Generic,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &'static MethodTable {
        self.methods
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.insert(child);
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Child names in sorted order, for `ls`.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.names()
    }

    /// Resolve a slash separated path relative to this node. The empty
    /// path is the node itself; empty segments (double or trailing
    /// slashes) are skipped.
    pub fn find_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    /// Typed double parameter with `get`, `set` and `typeName`. The cell
    /// is shared: the application keeps a clone of the `Arc` and reads or
    /// writes the value under the same lock the handlers use.
    pub fn typed_double(name: impl Into<String>, value: Arc<Mutex<f64>>) -> Self {
        Node {
            name: name.into(),
            methods: &DOUBLE_DMAP,
            children: Children::array(),
            kind: NodeKind::TypedValue(TypedValueNode {
                value,
                type_name: "double",
            }),
        }
    }

    /// Like [`typed_double`](Node::typed_double) without `set`.
    pub fn typed_double_read_only(name: impl Into<String>, value: Arc<Mutex<f64>>) -> Self {
        Node {
            name: name.into(),
            methods: &DOUBLE_READ_ONLY_DMAP,
            children: Children::array(),
            kind: NodeKind::TypedValue(TypedValueNode {
                value,
                type_name: "double",
            }),
        }
    }
}

/// Scalar parameter exposed through typed getters and setters.
pub struct TypedValueNode {
    pub(crate) value: Arc<Mutex<f64>>,
    pub(crate) type_name: &'static str,
}

impl TypedValueNode {
    pub fn get(&self) -> f64 {
        *self.value.lock().expect("typed value lock")
    }

    pub fn set(&self, v: f64) {
        *self.value.lock().expect("typed value lock") = v;
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}
