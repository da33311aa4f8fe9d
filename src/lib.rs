//! # chgrp-core
//!
//! A step engine for graph operations that move rows between permission groups ("chgrp") or
//! delete them, with validation that a move leaves no cross-group reference dangling.
//!
//! ## Overview
//!
//! A graph operation starts from a declarative [`GraphSpec`](graphspec::GraphSpec): a list of
//! entry paths (`/Dataset`, `/Dataset/DatasetImageLink/Image`, ...) naming the linked types the
//! operation reaches. Given the row ids the caller resolved for each entry, the planner builds a
//! flat, ordered [`StepStack`](step::StepStack) of [`GraphStep`](step::GraphStep)s, and a
//! [`GraphExecutor`](executor::GraphExecutor) runs it against a
//! [`GraphSession`](session::GraphSession).
//!
//! For chgrp, [`ChgrpStepFactory::post_process`](factory::ChgrpStepFactory::post_process) appends
//! one validation step per move step, after all of them. Each validation looks up the
//! *lock candidates* registered for its type in [`ExtendedMetadata`](metadata::ExtendedMetadata),
//! i.e. foreign keys `table.column -> type.id`, and collects referencing rows that are in neither
//! the destination group nor the reserved user group. With `force` those rows are deleted;
//! without it the operation fails with a structured
//! [`ConstraintViolations`](error::ConstraintViolations) payload.
//!
//! ## Quick Start
//!
//! ```rust
//! use chgrp_core::{
//!     executor::GraphExecutor,
//!     factory::plan_operation,
//!     graphspec::GraphSpec,
//!     metadata::ExtendedMetadata,
//!     properties::{GraphOpts, GroupId, LockCandidate, ObjectType, OperationKind},
//!     session::MemorySession,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), chgrp_core::GraphOpError> {
//! let session = MemorySession::new();
//! session.insert("Image", 1, GroupId(3));
//! session.insert("DatasetImageLink", 10, GroupId(3));
//! session.link("DatasetImageLink", 10, "child", 1)?;
//!
//! let metadata = ExtendedMetadata::new();
//! metadata.register(
//!     ObjectType::new("Image")?,
//!     LockCandidate::new("DatasetImageLink", "child")?,
//! );
//!
//! let spec = Arc::new(GraphSpec::parse("/Image", &["/Image"])?);
//! let plan = plan_operation(
//!     OperationKind::Chgrp { target: GroupId(4) },
//!     &spec,
//!     &[(0, vec![1])],
//!     GroupId::USER,
//! )?;
//!
//! // The dataset link stays behind in group 3, so only a forced move succeeds.
//! let executor = GraphExecutor::new(&session, &metadata, GraphOpts::forced());
//! let report = executor.run(&plan).await?;
//! assert_eq!(report.rows_force_deleted, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: planning, execution, in-memory session, caches
//! - **service**: sqlite-backed session (`sqlx`) with an event log table
//! - **bin**: the `chgrp` command-line tool

pub mod cache;
pub mod config;
#[cfg(all(feature = "service", not(target_arch = "wasm32")))]
pub mod db;
pub mod error;
pub mod event;
pub mod executor;
pub mod factory;
pub mod graphspec;
pub mod metadata;
pub mod properties;
pub mod session;
pub mod step;

pub use error::*;
