//! Executable steps of a planned graph operation.
//!
//! Each [`GraphStep`] covers the rows selected by one [`GraphEntry`](crate::graphspec::GraphEntry)
//! and carries a [`StepKind`] holding only the data that kind needs. The executor dispatches on
//! the kind; there is no per-kind behaviour on the step itself.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    ops::Deref,
    sync::Arc,
};

use crate::{
    graphspec::{GraphEntry, GraphSpec},
    properties::{GroupId, ObjectType, RowId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Move the step's rows into `group`.
    Chgrp { group: GroupId },
    /// Check that nothing outside `group`/`user_group` still references the moved rows.
    ChgrpValidation { group: GroupId, user_group: GroupId },
    /// Remove the step's rows.
    Delete,
}

impl StepKind {
    pub fn is_validation(&self) -> bool {
        matches!(self, StepKind::ChgrpValidation { .. })
    }
}

impl Display for StepKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            StepKind::Chgrp { group } => write!(f, "Chgrp(group: {group})"),
            StepKind::ChgrpValidation { group, user_group } => {
                write!(f, "ChgrpValidation(group: {group}, user group: {user_group})")
            }
            StepKind::Delete => write!(f, "Delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStep {
    /// Position of the originating move/delete step in the flattened plan. Validation steps
    /// keep the index of the step they check.
    pub index: usize,
    pub spec: Arc<GraphSpec>,
    pub entry_index: usize,
    pub object_type: ObjectType,
    pub ids: Vec<RowId>,
    pub kind: StepKind,
}

impl GraphStep {
    pub fn entry(&self) -> &GraphEntry {
        // entry_index is checked when the factory builds the step
        &self.spec.entries()[self.entry_index]
    }

    /// Same origin as `self`, different kind.
    pub fn derive(&self, kind: StepKind) -> GraphStep {
        GraphStep {
            kind,
            ..self.clone()
        }
    }

    /// True if both steps were built from the same spec entry over the same rows.
    pub fn same_origin(&self, other: &GraphStep) -> bool {
        (Arc::ptr_eq(&self.spec, &other.spec) || self.spec == other.spec)
            && self.entry_index == other.entry_index
            && self.ids == other.ids
    }
}

impl Display for GraphStep {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "#{} {} {}:{:?} ({})",
            self.index,
            self.kind,
            self.object_type,
            self.ids,
            self.entry()
        )
    }
}

/// The flattened, ordered list of steps for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStack(Vec<GraphStep>);

impl StepStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: GraphStep) {
        self.0.push(step);
    }

    pub fn extend<I: IntoIterator<Item = GraphStep>>(&mut self, steps: I) {
        self.0.extend(steps);
    }

    pub fn into_inner(self) -> Vec<GraphStep> {
        self.0
    }

    /// Earlier step that already covers `(object_type, id)`, if any.
    pub fn find(&self, object_type: &ObjectType, id: RowId) -> Option<&GraphStep> {
        self.0
            .iter()
            .find(|step| &step.object_type == object_type && step.ids.contains(&id))
    }

    pub fn validations(&self) -> impl Iterator<Item = &GraphStep> {
        self.0.iter().filter(|step| step.kind.is_validation())
    }
}

impl Deref for StepStack {
    type Target = [GraphStep];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<GraphStep>> for StepStack {
    fn from(value: Vec<GraphStep>) -> Self {
        StepStack(value)
    }
}

impl IntoIterator for StepStack {
    type Item = GraphStep;
    type IntoIter = std::vec::IntoIter<GraphStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a StepStack {
    type Item = &'a GraphStep;
    type IntoIter = std::slice::Iter<'a, GraphStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
