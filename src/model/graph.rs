//! Canonical in-row graph entities.
//!
//! A node or edge value always presents the same way, whether it was read
//! back from storage (JSON-encoded) or constructed in memory by CREATE/MERGE:
//! a property map plus reserved bookkeeping keys.

use indexmap::IndexMap;

use super::Value;

/// Reserved key carrying the entity id on nodes and edges.
pub const ID_KEY: &str = "_nf_id";
/// Reserved key carrying the source node id on edges.
pub const START_KEY: &str = "_nf_start";
/// Reserved key carrying the target node id on edges.
pub const END_KEY: &str = "_nf_end";
/// Reserved key carrying the relationship type on edges, captured so that
/// `type(e)` keeps answering after the edge row is gone from storage.
pub const TYPE_KEY: &str = "_nf_type";

/// A node value: user properties plus its opaque id.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeObject {
    pub id: String,
    pub properties: IndexMap<String, Value>,
}

impl NodeObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), properties: IndexMap::new() }
    }

    pub fn with_properties(id: impl Into<String>, properties: IndexMap<String, Value>) -> Self {
        Self { id: id.into(), properties }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == ID_KEY {
            return None;
        }
        self.properties.get(key)
    }
}

/// An edge value: user properties plus id, endpoint ids and captured type.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeObject {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Known when the edge came from storage or CREATE/MERGE; `None` when
    /// the object was reassembled from a bare property map.
    pub rel_type: Option<String>,
    pub properties: IndexMap<String, Value>,
}

impl EdgeObject {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            rel_type: Some(rel_type.into()),
            properties: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A path: alternating nodes and edges. `nodes` always has one more element
/// than `edges`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathObject {
    pub nodes: Vec<NodeObject>,
    pub edges: Vec<EdgeObject>,
}

impl PathObject {
    pub fn single(node: NodeObject) -> Self {
        Self { nodes: vec![node], edges: Vec::new() }
    }

    pub fn append(&mut self, edge: EdgeObject, node: NodeObject) {
        self.edges.push(edge);
        self.nodes.push(node);
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_get_hides_reserved_id() {
        let mut n = NodeObject::new("abc");
        n.properties.insert("name".into(), Value::String("Ada".into()));
        assert_eq!(n.get("name"), Some(&Value::String("Ada".into())));
        assert_eq!(n.get(ID_KEY), None);
    }

    #[test]
    fn path_alternation() {
        let mut p = PathObject::single(NodeObject::new("a"));
        p.append(EdgeObject::new("e1", "a", "b", "KNOWS"), NodeObject::new("b"));
        assert_eq!(p.len(), 1);
        assert_eq!(p.nodes.len(), 2);
    }
}
