//! Running a planned [`StepStack`] against a [`GraphSession`].
//!
//! A plan runs inside one transaction opened on the [`TransactionalSession`]. Every step's
//! action runs in plan order; only when all actions have succeeded does every step's release
//! run, again in plan order, and then the transaction commits. Any failure, including a
//! release that cannot publish, rolls back every write the plan made. A failed action
//! publishes nothing.
//!
//! ## Chgrp validation
//!
//! A validation step runs after every move step (the factory appends them last), so its
//! queries see the post-move state. For each moved id and each lock candidate registered for
//! the step's type, it collects the referencing rows that sit outside both the destination
//! group and the user group. Hits from every candidate are merged before deciding:
//!
//! - nothing found: validated, nothing changes
//! - found, `force` set: the referencing rows are deleted, then validated
//! - found, `force` unset: the whole step fails with [`GraphOpError::Constraint`]
//!
//! Remediation is never partial: either every offending row is deleted or none is.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ConstraintViolations, GraphOpError},
    event::{EventAction, EventBus, EventLogMessage},
    metadata::ExtendedMetadata,
    properties::{GraphOpts, GroupId, ObjectType, RowId},
    session::{GraphSession, GraphTransaction, TransactionalSession},
    step::{GraphStep, StepKind, StepStack},
};

/// Outcome of a validation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    /// No referencing row was left outside the allowed groups.
    Clean,
    /// Offending rows existed and were deleted because `force` was set.
    Forced(ConstraintViolations),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub operation: Uuid,
    pub steps: usize,
    pub rows_moved: u64,
    pub rows_deleted: u64,
    pub rows_force_deleted: u64,
    pub events_published: usize,
    pub validations: usize,
}

pub struct GraphExecutor<'a, S: TransactionalSession> {
    session: &'a S,
    metadata: &'a ExtendedMetadata,
    bus: Option<&'a EventBus>,
    opts: GraphOpts,
}

impl<'a, S: TransactionalSession> GraphExecutor<'a, S> {
    pub fn new(session: &'a S, metadata: &'a ExtendedMetadata, opts: GraphOpts) -> Self {
        GraphExecutor {
            session,
            metadata,
            bus: None,
            opts,
        }
    }

    pub fn with_bus(mut self, bus: &'a EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn opts(&self) -> GraphOpts {
        self.opts
    }

    #[tracing::instrument(skip_all, fields(operation = tracing::field::Empty, steps = steps.len(), force = self.opts.force))]
    pub async fn run(&self, steps: &StepStack) -> Result<ExecutionReport, GraphOpError> {
        let operation = Uuid::new_v4();
        tracing::Span::current().record("operation", tracing::field::display(operation));
        tracing::info!("[GraphExecutor] operation {} started", operation);

        let mut report = ExecutionReport {
            operation,
            steps: steps.len(),
            ..Default::default()
        };

        let tx = self.session.begin().await?;
        if let Err(e) = self.apply(&tx, steps, &mut report).await {
            tracing::warn!(
                "[GraphExecutor] operation {} failed, rolling back: {}",
                operation,
                e
            );
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    "[GraphExecutor] rollback of operation {} failed: {}",
                    operation,
                    rollback_err
                );
            }
            return Err(e);
        }
        tx.commit().await?;

        tracing::info!(
            "[GraphExecutor] operation {} finished: {} moved, {} deleted, {} force-deleted",
            operation,
            report.rows_moved,
            report.rows_deleted,
            report.rows_force_deleted
        );
        Ok(report)
    }

    /// Every action in plan order, then every release in plan order.
    async fn apply<T: GraphSession>(
        &self,
        tx: &T,
        steps: &StepStack,
        report: &mut ExecutionReport,
    ) -> Result<(), GraphOpError> {
        for (pos, step) in steps.iter().enumerate() {
            tracing::debug!("[GraphExecutor] action {}/{}: {}", pos + 1, steps.len(), step);
            match step.kind {
                StepKind::Chgrp { group } => {
                    report.rows_moved += tx
                        .change_group(&step.object_type, &step.ids, group)
                        .await?;
                }
                StepKind::ChgrpValidation { group, user_group } => {
                    report.validations += 1;
                    if let ValidationOutcome::Forced(violations) =
                        self.check(tx, step, group, user_group).await?
                    {
                        report.rows_force_deleted +=
                            force_delete(tx, step, &violations).await?;
                    }
                }
                StepKind::Delete => {
                    report.rows_deleted += delete_rows(tx, step).await?;
                }
            }
        }

        for step in steps.iter() {
            if self.release(step)? {
                report.events_published += 1;
            }
        }
        Ok(())
    }

    /// Check one validation step against the committed state, honouring `force`.
    ///
    /// Returns the violations that were found when `force` is set so the caller can delete
    /// them; without `force` any violation is an error.
    pub async fn validate(
        &self,
        step: &GraphStep,
        group: GroupId,
        user_group: GroupId,
    ) -> Result<ValidationOutcome, GraphOpError> {
        self.check(self.session, step, group, user_group).await
    }

    async fn check<T: GraphSession>(
        &self,
        session: &T,
        step: &GraphStep,
        group: GroupId,
        user_group: GroupId,
    ) -> Result<ValidationOutcome, GraphOpError> {
        let violations = find_violations(
            session,
            self.metadata,
            &step.object_type,
            &step.ids,
            group,
            user_group,
        )
        .await?;
        if violations.is_empty() {
            return Ok(ValidationOutcome::Clean);
        }
        if self.opts.is_force() {
            tracing::warn!(
                "[GraphExecutor] forcing step {}: {}",
                step.index,
                violations
            );
            return Ok(ValidationOutcome::Forced(violations));
        }
        for message in violations.messages.iter() {
            tracing::info!("[GraphExecutor] {}", message);
        }
        Err(GraphOpError::Constraint(violations))
    }

    /// Release a step. Returns whether an event log message was published.
    fn release(&self, step: &GraphStep) -> Result<bool, GraphOpError> {
        let action = match step.kind {
            StepKind::Chgrp { .. } => EventAction::Chgrp,
            StepKind::Delete => EventAction::Delete,
            // Validations have no linked rows to announce.
            StepKind::ChgrpValidation { .. } => return Ok(false),
        };
        let Some(bus) = self.bus else {
            return Ok(false);
        };
        let message = EventLogMessage::new(action, step.object_type.clone(), step.ids.clone());
        bus.publish(message)
            .map_err(|e| GraphOpError::step_failed(step.index, e))?;
        Ok(true)
    }
}

async fn delete_rows<T: GraphSession>(tx: &T, step: &GraphStep) -> Result<u64, GraphOpError> {
    let deleted = tx.delete_rows(step.object_type.table(), &step.ids).await?;
    if deleted < step.ids.len() as u64 {
        tracing::debug!(
            "[GraphExecutor] {} of {} {} rows were already gone",
            step.ids.len() as u64 - deleted,
            step.ids.len(),
            step.object_type
        );
    }
    Ok(deleted)
}

async fn force_delete<T: GraphSession>(
    tx: &T,
    step: &GraphStep,
    violations: &ConstraintViolations,
) -> Result<u64, GraphOpError> {
    let mut deleted = 0;
    for (table, ids) in violations.by_table.iter() {
        let ids = ids.iter().copied().collect::<Vec<RowId>>();
        let removed = tx.delete_rows(table, &ids).await?;
        tracing::warn!(
            "[GraphExecutor] step {} force-deleted {} of {} rows from {}",
            step.index,
            removed,
            ids.len(),
            table
        );
        deleted += removed;
    }
    Ok(deleted)
}

/// Collect every referencing row of `ids` that sits outside `group` and `user_group`.
///
/// This is the read-only half of a validation step; `chgrp check` uses it for dry runs.
pub async fn find_violations<S: GraphSession>(
    session: &S,
    metadata: &ExtendedMetadata,
    object_type: &ObjectType,
    ids: &[RowId],
    group: GroupId,
    user_group: GroupId,
) -> Result<ConstraintViolations, GraphOpError> {
    let checks = metadata.lock_candidate_checks(object_type);
    let mut violations = ConstraintViolations::new();
    for id in ids {
        for lock in checks.iter() {
            let found = session
                .find_improper_links(lock, *id, group, user_group)
                .await?;
            if found.is_empty() {
                continue;
            }
            violations.push_message(format!(
                "{object_type}:{id} improperly links to {}.{}: {}",
                lock.table,
                lock.column,
                found.len()
            ));
            violations.record(&lock.table, found);
        }
    }
    Ok(violations)
}
