//! Core value types shared by planning, execution and caching.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::error::GraphOpError;

/// Database row identifier.
pub type RowId = i64;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

/// True if `name` is safe to splice into SQL as a table or column identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

pub fn check_identifier(name: &str) -> Result<(), GraphOpError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(GraphOpError::InvalidInput(format!(
            "'{name}' is not a valid table or column identifier"
        )))
    }
}

/// The mapped type (and backing table) of a row, e.g. `Image` or `DatasetImageLink`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectType(String);

impl ObjectType {
    pub fn new(name: &str) -> Result<ObjectType, GraphOpError> {
        check_identifier(name)?;
        Ok(ObjectType(name.to_string()))
    }

    /// Backing table name. Types map one-to-one onto tables.
    pub fn table(&self) -> &str {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectType {
    type Err = GraphOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::new(s)
    }
}

impl TryFrom<String> for ObjectType {
    type Error = GraphOpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check_identifier(&value)?;
        Ok(ObjectType(value))
    }
}

impl From<ObjectType> for String {
    fn from(value: ObjectType) -> Self {
        value.0
    }
}

impl TryFrom<&str> for ObjectType {
    type Error = GraphOpError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ObjectType::new(value)
    }
}

/// Permission group identifier.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl GroupId {
    /// The reserved system "user" group exempt from cross-group checks.
    pub const USER: GroupId = GroupId(1);
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for GroupId {
    fn from(value: i64) -> Self {
        GroupId(value)
    }
}

/// A foreign-key reference `table.column -> target.id` whose source rows must stay
/// co-located with the target after a chgrp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockCandidate {
    pub table: String,
    pub column: String,
}

impl LockCandidate {
    pub fn new(table: &str, column: &str) -> Result<LockCandidate, GraphOpError> {
        check_identifier(table)?;
        check_identifier(column)?;
        Ok(LockCandidate {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

impl Display for LockCandidate {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Operation-wide options.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOpts {
    /// Delete blocking references instead of failing validation.
    pub force: bool,
}

impl GraphOpts {
    pub fn forced() -> Self {
        GraphOpts { force: true }
    }

    pub fn is_force(&self) -> bool {
        self.force
    }
}

/// Which graph operation a plan is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Chgrp { target: GroupId },
    Delete,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OperationKind::Chgrp { target } => write!(f, "Chgrp(group: {target})"),
            OperationKind::Delete => write!(f, "Delete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn identifiers_reject_sql() {
        assert!(is_identifier("DatasetImageLink"));
        assert!(is_identifier("_child2"));
        assert!(!is_identifier("2child"));
        assert!(!is_identifier("Image; DROP TABLE Image"));
        assert!(!is_identifier(""));
        assert!(ObjectType::new("Image").is_ok());
        assert!(LockCandidate::new("ImageAnnotationLink", "parent id").is_err());
    }

    #[test]
    fn object_type_round_trips_through_serde() {
        let ty = ObjectType::new("Pixels").unwrap();
        let json = serde_json::to_string(&ty).unwrap();
        assert_eq!(json, "\"Pixels\"");
        assert_eq!(ty.table(), "Pixels");
        assert!(serde_json::from_str::<ObjectType>("\"Pixels\"").is_ok());
        assert!(serde_json::from_str::<ObjectType>("\"Pix els\"").is_err());
    }
}
