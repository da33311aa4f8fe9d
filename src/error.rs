use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, io,
};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

use serde_json::Error as JsonError;

use crate::{event::EventLogMessage, properties::RowId};

/// Referencing rows that would dangle outside the destination group after a chgrp.
///
/// Keyed by the referencing table name. `messages` keeps one human-readable line per
/// `(table, column)` check that produced hits, in the order the checks ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintViolations {
    pub by_table: BTreeMap<String, BTreeSet<RowId>>,
    pub messages: Vec<String>,
}

impl ConstraintViolations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<I>(&mut self, table: &str, ids: I)
    where
        I: IntoIterator<Item = RowId>,
    {
        self.by_table
            .entry(table.to_string())
            .or_default()
            .extend(ids);
    }

    pub fn push_message(&mut self, message: String) {
        self.messages.push(message);
    }

    pub fn merge(&mut self, other: ConstraintViolations) {
        for (table, ids) in other.by_table {
            self.record(&table, ids);
        }
        self.messages.extend(other.messages);
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.values().all(|ids| ids.is_empty())
    }

    /// Total number of offending rows across all tables.
    pub fn total(&self) -> usize {
        self.by_table.values().map(|ids| ids.len()).sum()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.by_table.keys().map(|t| t.as_str())
    }

    pub fn ids_for(&self, table: &str) -> Option<&BTreeSet<RowId>> {
        self.by_table.get(table)
    }
}

impl fmt::Display for ConstraintViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} constraint violation(s)", self.total())?;
        if !self.by_table.is_empty() {
            let breakdown = self
                .by_table
                .iter()
                .map(|(table, ids)| format!("{table}: {}", ids.len()))
                .collect::<Vec<String>>()
                .join(", ");
            write!(f, " [{breakdown}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum GraphOpError {
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Constraint violation: {0}")]
    Constraint(ConstraintViolations),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Graph step {step} failed: {message}")]
    Graph { step: usize, message: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl GraphOpError {
    /// Wrap a lower-level failure as a step failure, keeping the cause's message.
    pub fn step_failed<E: fmt::Display>(step: usize, cause: E) -> Self {
        GraphOpError::Graph {
            step,
            message: cause.to_string(),
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, GraphOpError::Constraint(_))
    }

    /// Process exit status for command-line callers: 2 for constraint violations, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_constraint() {
            2
        } else {
            1
        }
    }

    pub fn as_constraint(&self) -> Option<&ConstraintViolations> {
        match self {
            GraphOpError::Constraint(violations) => Some(violations),
            _ => None,
        }
    }
}

impl From<ConstraintViolations> for GraphOpError {
    fn from(src: ConstraintViolations) -> GraphOpError {
        GraphOpError::Constraint(src)
    }
}

impl From<toml::de::Error> for GraphOpError {
    fn from(src: toml::de::Error) -> GraphOpError {
        GraphOpError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for GraphOpError {
    fn from(src: toml::ser::Error) -> GraphOpError {
        GraphOpError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for GraphOpError {
    fn from(src: JsonError) -> GraphOpError {
        GraphOpError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for GraphOpError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => GraphOpError::NotFound(format!("{x}")),
            _ => GraphOpError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<RegexError> for GraphOpError {
    fn from(x: RegexError) -> Self {
        GraphOpError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<TokioSendError<EventLogMessage>> for GraphOpError {
    fn from(x: TokioSendError<EventLogMessage>) -> Self {
        GraphOpError::Io(format!(
            "Event bus send error, could not publish event log message {}",
            x.0
        ))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for GraphOpError {
    fn from(db_error: SqlxError) -> Self {
        GraphOpError::Database(format!("{db_error:?}"))
    }
}

#[cfg(feature = "service")]
impl From<sqlx::migrate::MigrateError> for GraphOpError {
    fn from(db_error: sqlx::migrate::MigrateError) -> Self {
        GraphOpError::Database(format!("migration failed: {db_error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn violations_merge_across_tables() {
        let mut first = ConstraintViolations::new();
        first.record("ImageAnnotationLink", [4, 5]);
        first.push_message("Annotation:3 improperly links to ImageAnnotationLink.child: 2".into());

        let mut second = ConstraintViolations::new();
        second.record("DatasetImageLink", [9]);
        second.record("ImageAnnotationLink", [5, 6]);

        first.merge(second);

        assert_eq!(first.total(), 4);
        assert_eq!(
            first.tables().collect::<Vec<_>>(),
            vec!["DatasetImageLink", "ImageAnnotationLink"]
        );
        assert_eq!(
            first.ids_for("ImageAnnotationLink"),
            Some(&BTreeSet::from([4, 5, 6]))
        );
        assert_eq!(first.messages.len(), 1);
    }

    #[test]
    fn constraint_error_exposes_payload() {
        let mut violations = ConstraintViolations::new();
        violations.record("DatasetImageLink", [11]);
        let err = GraphOpError::from(violations.clone());

        assert!(err.is_constraint());
        assert_eq!(err.as_constraint(), Some(&violations));
        assert_eq!(
            err.to_string(),
            "Constraint violation: 1 constraint violation(s) [DatasetImageLink: 1]"
        );
        assert_eq!(err.exit_code(), 2);
        assert_eq!(GraphOpError::NotFound("Image:1".to_string()).exit_code(), 1);
    }

    #[test]
    fn empty_violations_report_empty() {
        let mut violations = ConstraintViolations::new();
        assert!(violations.is_empty());
        violations.record("DatasetImageLink", std::iter::empty());
        assert!(violations.is_empty());
        assert_eq!(violations.total(), 0);
    }
}
