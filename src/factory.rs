//! Turning a [`GraphSpec`] plus selected row ids into an ordered [`StepStack`].
//!
//! Factories hold no per-operation state: the destination group is passed to every call,
//! so one factory can plan any number of operations.

use std::sync::Arc;

use crate::{
    error::GraphOpError,
    graphspec::GraphSpec,
    properties::{GroupId, OperationKind, RowId},
    step::{GraphStep, StepKind, StepStack},
};

fn check_inputs(
    spec: &GraphSpec,
    entry_index: usize,
    ids: &[RowId],
) -> Result<(), GraphOpError> {
    if spec.entry(entry_index).is_none() {
        return Err(GraphOpError::InvalidInput(format!(
            "graph spec '{}' has no entry {entry_index}",
            spec.name
        )));
    }
    if ids.is_empty() {
        return Err(GraphOpError::InvalidInput(format!(
            "no ids given for entry {} of graph spec '{}'",
            entry_index, spec.name
        )));
    }
    Ok(())
}

fn build_step(
    index: usize,
    spec: &Arc<GraphSpec>,
    entry_index: usize,
    ids: Vec<RowId>,
    kind: StepKind,
) -> GraphStep {
    let object_type = spec.entries()[entry_index].object_type().clone();
    GraphStep {
        index,
        spec: spec.clone(),
        entry_index,
        object_type,
        ids,
        kind,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChgrpStepFactory {
    user_group: GroupId,
}

impl Default for ChgrpStepFactory {
    fn default() -> Self {
        ChgrpStepFactory::new(GroupId::USER)
    }
}

impl ChgrpStepFactory {
    pub fn new(user_group: GroupId) -> Self {
        ChgrpStepFactory { user_group }
    }

    pub fn user_group(&self) -> GroupId {
        self.user_group
    }

    /// Build the move step for `ids` of `spec.entries()[entry_index]`.
    ///
    /// `stack` is the plan built so far; the new step is not pushed onto it.
    pub fn create(
        &self,
        group: GroupId,
        index: usize,
        stack: &StepStack,
        spec: &Arc<GraphSpec>,
        entry_index: usize,
        ids: Vec<RowId>,
    ) -> Result<GraphStep, GraphOpError> {
        check_inputs(spec, entry_index, &ids)?;
        tracing::debug!(
            "[ChgrpStepFactory] step {} of {} planned: {} ids of {} -> group {}",
            index,
            stack.len() + 1,
            ids.len(),
            spec.entries()[entry_index],
            group
        );
        Ok(build_step(
            index,
            spec,
            entry_index,
            ids,
            StepKind::Chgrp { group },
        ))
    }

    /// Append one validation step per move step. All moves stay ahead of all validations.
    pub fn post_process(&self, group: GroupId, steps: StepStack) -> StepStack {
        let validations = steps
            .iter()
            .map(|step| {
                step.derive(StepKind::ChgrpValidation {
                    group,
                    user_group: self.user_group,
                })
            })
            .collect::<Vec<GraphStep>>();
        tracing::debug!(
            "[ChgrpStepFactory] appending {} validation steps",
            validations.len()
        );
        let mut all = steps;
        all.extend(validations);
        all
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteStepFactory;

impl DeleteStepFactory {
    pub fn create(
        &self,
        index: usize,
        stack: &StepStack,
        spec: &Arc<GraphSpec>,
        entry_index: usize,
        ids: Vec<RowId>,
    ) -> Result<GraphStep, GraphOpError> {
        check_inputs(spec, entry_index, &ids)?;
        tracing::debug!(
            "[DeleteStepFactory] step {} of {} planned: {} ids of {}",
            index,
            stack.len() + 1,
            ids.len(),
            spec.entries()[entry_index]
        );
        Ok(build_step(index, spec, entry_index, ids, StepKind::Delete))
    }

    /// Deletes need no follow-up steps.
    pub fn post_process(&self, steps: StepStack) -> StepStack {
        steps
    }
}

/// Plan a whole operation.
///
/// `selections` maps entry indices of `spec` to the row ids the caller resolved for them.
/// Entries marked `KEEP` and entries with no selection produce no step. Ids already covered by
/// an earlier step of the same type are not planned twice. Chgrp plans run parents before
/// children; delete plans run children first.
pub fn plan_operation(
    kind: OperationKind,
    spec: &Arc<GraphSpec>,
    selections: &[(usize, Vec<RowId>)],
    user_group: GroupId,
) -> Result<StepStack, GraphOpError> {
    if let Some((entry_index, _)) = selections
        .iter()
        .find(|(idx, _)| spec.entry(*idx).is_none())
    {
        return Err(GraphOpError::InvalidInput(format!(
            "graph spec '{}' has no entry {entry_index}",
            spec.name
        )));
    }
    let mut order = spec.ordered_entries()?;
    if kind == OperationKind::Delete {
        order.reverse();
    }

    let chgrp = ChgrpStepFactory::new(user_group);
    let delete = DeleteStepFactory;
    let mut stack = StepStack::new();

    for entry_index in order {
        let entry = &spec.entries()[entry_index];
        if entry.is_kept() {
            tracing::debug!("[plan_operation] keeping {}", entry);
            continue;
        }
        let mut ids = selections
            .iter()
            .filter(|(idx, _)| *idx == entry_index)
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|id| stack.find(entry.object_type(), *id).is_none())
            .collect::<Vec<RowId>>();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            continue;
        }

        let index = stack.len();
        let step = match kind {
            OperationKind::Chgrp { target } => {
                chgrp.create(target, index, &stack, spec, entry_index, ids)?
            }
            OperationKind::Delete => delete.create(index, &stack, spec, entry_index, ids)?,
        };
        stack.push(step);
    }

    let planned = match kind {
        OperationKind::Chgrp { target } => chgrp.post_process(target, stack),
        OperationKind::Delete => delete.post_process(stack),
    };
    tracing::info!(
        "[plan_operation] {} on '{}' planned {} steps",
        kind,
        spec.name,
        planned.len()
    );
    Ok(planned)
}
