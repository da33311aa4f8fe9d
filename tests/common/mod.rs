//! Shared fixtures for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use chgrp_core::{
    metadata::ExtendedMetadata,
    properties::{GroupId, LockCandidate, ObjectType},
    session::MemorySession,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Group the fixture image starts in.
#[allow(dead_code)]
pub const SOURCE_GROUP: GroupId = GroupId(3);
/// Group the fixture image is moved to.
#[allow(dead_code)]
pub const TARGET_GROUP: GroupId = GroupId(4);
/// A third group that is neither the source, the target nor the user group.
#[allow(dead_code)]
pub const OTHER_GROUP: GroupId = GroupId(5);

/// Image 1 in [`SOURCE_GROUP`] with no references.
///
/// Lock candidates `DatasetImageLink.child -> Image` and `ImageAnnotationLink.parent -> Image`
/// are registered, so tests only need to add the referencing rows they care about.
#[allow(dead_code)]
pub fn image_fixture() -> (MemorySession, ExtendedMetadata) {
    let session = MemorySession::new();
    session.insert("Image", 1, SOURCE_GROUP);

    let metadata = ExtendedMetadata::new();
    let image = ObjectType::new("Image").unwrap();
    metadata.register(
        image.clone(),
        LockCandidate::new("DatasetImageLink", "child").unwrap(),
    );
    metadata.register(
        image,
        LockCandidate::new("ImageAnnotationLink", "parent").unwrap(),
    );
    (session, metadata)
}

/// Add a `table` row `id` in `group` whose `column` references image `target`.
#[allow(dead_code)]
pub fn add_reference(
    session: &MemorySession,
    table: &str,
    column: &str,
    id: i64,
    group: GroupId,
    target: i64,
) {
    session.insert(table, id, group);
    session.link(table, id, column, target).unwrap();
}
