//! Lock-candidate registry: which `(table, column)` foreign keys point at each mapped type.

use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::GraphOpsConfig,
    error::GraphOpError,
    properties::{LockCandidate, ObjectType},
};

/// Thread-safe registry of lock candidates, keyed by the referenced type.
///
/// Cloning is cheap and clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct ExtendedMetadata(Arc<RwLock<BTreeMap<ObjectType, Vec<LockCandidate>>>>);

impl ExtendedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GraphOpsConfig) -> Result<Self, GraphOpError> {
        let metadata = ExtendedMetadata::new();
        for record in config.lock_candidates.iter() {
            let target = ObjectType::new(&record.target)?;
            let candidate = LockCandidate::new(&record.table, &record.column)?;
            metadata.register(target, candidate);
        }
        tracing::debug!(
            "[ExtendedMetadata] loaded lock candidates for {} types",
            metadata.0.read().len()
        );
        Ok(metadata)
    }

    /// Declare that `candidate.table.candidate.column` references `target.id`.
    pub fn register(&self, target: ObjectType, candidate: LockCandidate) {
        let mut writer = self.0.write();
        let entries = writer.entry(target).or_default();
        if !entries.contains(&candidate) {
            entries.push(candidate);
        }
    }

    /// All references that must not dangle when a row of `target` changes group.
    pub fn lock_candidate_checks(&self, target: &ObjectType) -> Vec<LockCandidate> {
        self.0.read().get(target).cloned().unwrap_or_default()
    }

    pub fn types(&self) -> Vec<ObjectType> {
        self.0.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockCandidateRecord;
    use test_log::test;

    #[test]
    fn registers_unique_candidates() {
        let image = ObjectType::new("Image").unwrap();
        let metadata = ExtendedMetadata::new();
        let link = LockCandidate::new("DatasetImageLink", "child").unwrap();
        metadata.register(image.clone(), link.clone());
        metadata.register(image.clone(), link.clone());
        metadata.register(
            image.clone(),
            LockCandidate::new("ImageAnnotationLink", "parent").unwrap(),
        );

        let checks = metadata.lock_candidate_checks(&image);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0], link);
        assert!(metadata
            .lock_candidate_checks(&ObjectType::new("Pixels").unwrap())
            .is_empty());
    }

    #[test]
    fn from_config_validates_identifiers() {
        let mut config = GraphOpsConfig::default();
        config.lock_candidates.push(LockCandidateRecord {
            target: "Image".to_string(),
            table: "DatasetImageLink".to_string(),
            column: "child".to_string(),
        });
        let metadata = ExtendedMetadata::from_config(&config).unwrap();
        assert_eq!(metadata.types().len(), 1);

        config.lock_candidates.push(LockCandidateRecord {
            target: "Image".to_string(),
            table: "Dataset ImageLink".to_string(),
            column: "child".to_string(),
        });
        assert!(ExtendedMetadata::from_config(&config).is_err());
    }
}
