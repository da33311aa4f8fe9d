//! Declarative description of which linked types a graph operation touches.
//!
//! A [`GraphSpec`] is a list of [`GraphEntry`]s. Each entry is a path of mapped types
//! rooted at the operation's top-level type, e.g. `/Dataset`, `/Dataset/DatasetImageLink`,
//! `/Dataset/DatasetImageLink/Image`. An entry may carry an operation suffix
//! (`/Dataset/Image;KEEP`) that changes how the planner treats it.

use petgraph::{algo::toposort, graph::NodeIndex, Graph};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::{error::GraphOpError, properties::ObjectType};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOp {
    /// Rows matched by the entry take part in the operation.
    #[default]
    Reap,
    /// Rows matched by the entry are left where they are.
    Keep,
}

impl FromStr for EntryOp {
    type Err = GraphOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REAP" => Ok(EntryOp::Reap),
            "KEEP" => Ok(EntryOp::Keep),
            other => Err(GraphOpError::InvalidInput(format!(
                "unknown graph entry operation '{other}'"
            ))),
        }
    }
}

/// One path of a [`GraphSpec`]. The path is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GraphEntry {
    path: Vec<ObjectType>,
    op: EntryOp,
}

impl GraphEntry {
    pub fn new(path: Vec<ObjectType>, op: EntryOp) -> Result<GraphEntry, GraphOpError> {
        if path.is_empty() {
            return Err(GraphOpError::InvalidInput(
                "graph entry path must name at least one type".to_string(),
            ));
        }
        Ok(GraphEntry { path, op })
    }

    pub fn path(&self) -> &[ObjectType] {
        &self.path
    }

    pub fn op(&self) -> EntryOp {
        self.op
    }

    /// Type of the rows this entry selects (the last path element).
    pub fn object_type(&self) -> &ObjectType {
        &self.path[self.path.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_kept(&self) -> bool {
        self.op == EntryOp::Keep
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &GraphEntry) -> bool {
        self.path.len() < other.path.len() && other.path.starts_with(&self.path)
    }
}

impl FromStr for GraphEntry {
    type Err = GraphOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path_str, op) = match s.split_once(';') {
            Some((path, op)) => (path, op.trim().parse::<EntryOp>()?),
            None => (s, EntryOp::default()),
        };
        let Some(stripped) = path_str.trim().strip_prefix('/') else {
            return Err(GraphOpError::InvalidInput(format!(
                "graph entry '{s}' must start with '/'"
            )));
        };
        let path = stripped
            .split('/')
            .map(ObjectType::new)
            .collect::<Result<Vec<ObjectType>, GraphOpError>>()?;
        GraphEntry::new(path, op)
    }
}

impl TryFrom<String> for GraphEntry {
    type Error = GraphOpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<GraphEntry> for String {
    fn from(entry: GraphEntry) -> String {
        entry.to_string()
    }
}

impl Display for GraphEntry {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for elem in self.path.iter() {
            write!(f, "/{elem}")?;
        }
        if self.op != EntryOp::Reap {
            write!(f, ";{:?}", self.op)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphSpecRecord")]
pub struct GraphSpec {
    pub name: String,
    entries: Vec<GraphEntry>,
}

#[derive(Deserialize)]
struct GraphSpecRecord {
    name: String,
    entries: Vec<GraphEntry>,
}

impl TryFrom<GraphSpecRecord> for GraphSpec {
    type Error = GraphOpError;

    fn try_from(record: GraphSpecRecord) -> Result<Self, Self::Error> {
        GraphSpec::new(&record.name, record.entries)
    }
}

impl GraphSpec {
    pub fn new(name: &str, entries: Vec<GraphEntry>) -> Result<GraphSpec, GraphOpError> {
        if entries.is_empty() {
            return Err(GraphOpError::InvalidInput(format!(
                "graph spec '{name}' has no entries"
            )));
        }
        let mut seen = BTreeMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(prev) = seen.insert(entry.path.clone(), idx) {
                return Err(GraphOpError::InvalidInput(format!(
                    "graph spec '{name}' repeats entry {entry} (indices {prev} and {idx})"
                )));
            }
        }
        Ok(GraphSpec {
            name: name.to_string(),
            entries,
        })
    }

    /// Parse every entry string, e.g. `["/Dataset", "/Dataset/Image;KEEP"]`.
    pub fn parse<S: AsRef<str>>(name: &str, entries: &[S]) -> Result<GraphSpec, GraphOpError> {
        let parsed = entries
            .iter()
            .map(|e| e.as_ref().parse::<GraphEntry>())
            .collect::<Result<Vec<GraphEntry>, GraphOpError>>()?;
        GraphSpec::new(name, parsed)
    }

    pub fn entries(&self) -> &[GraphEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&GraphEntry> {
        self.entries.get(index)
    }

    /// The top-level type every entry path is rooted at, if they agree.
    pub fn root_type(&self) -> Option<&ObjectType> {
        let first = self.entries.first()?.path.first()?;
        self.entries
            .iter()
            .all(|e| e.path.first() == Some(first))
            .then_some(first)
    }

    /// Entry indices ordered so that every entry comes after all of its ancestors.
    ///
    /// Delete plans walk this in reverse so children are removed before the rows they
    /// reference.
    pub fn ordered_entries(&self) -> Result<Vec<usize>, GraphOpError> {
        let mut graph = Graph::<usize, ()>::new();
        let nodes = (0..self.entries.len())
            .map(|idx| graph.add_node(idx))
            .collect::<Vec<NodeIndex>>();
        for (a_idx, a) in self.entries.iter().enumerate() {
            for (b_idx, b) in self.entries.iter().enumerate() {
                if a.is_ancestor_of(b) {
                    graph.add_edge(nodes[a_idx], nodes[b_idx], ());
                }
            }
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            GraphOpError::InvalidInput(format!(
                "graph spec '{}' has cyclic entries at {}",
                self.name,
                self.entries[graph[cycle.node_id()]]
            ))
        })?;
        Ok(sorted.into_iter().map(|node| graph[node]).collect())
    }
}
