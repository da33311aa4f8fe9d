//! Benchmarks for planning and executing graph operations
//!
//! - Planning chgrp and delete stacks over wide graph specs
//! - Executing a forced chgrp against the in-memory session
//!
//! Run with: cargo bench

use chgrp_core::{
    executor::GraphExecutor,
    factory::plan_operation,
    graphspec::GraphSpec,
    metadata::ExtendedMetadata,
    properties::{GraphOpts, GroupId, LockCandidate, ObjectType, OperationKind, RowId},
    session::MemorySession,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

const IDS_PER_ENTRY: i64 = 100;

/// `/Root` plus `width` link types hanging off it, each reaching a leaf type.
fn wide_spec(width: usize) -> Arc<GraphSpec> {
    let mut entries = vec!["/Root".to_string()];
    for i in 0..width {
        entries.push(format!("/Root/Link{i}"));
        entries.push(format!("/Root/Link{i}/Leaf{i}"));
    }
    Arc::new(GraphSpec::parse("/Root", &entries).unwrap())
}

fn selections(spec: &GraphSpec) -> Vec<(usize, Vec<RowId>)> {
    (0..spec.entries().len())
        .map(|entry| {
            let base = entry as i64 * IDS_PER_ENTRY;
            (entry, (base..base + IDS_PER_ENTRY).collect())
        })
        .collect()
}

// Benchmark: planning with validation steps appended
fn bench_plan_chgrp(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_chgrp");
    for width in [4usize, 16, 64] {
        let spec = wide_spec(width);
        let selected = selections(&spec);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                plan_operation(
                    OperationKind::Chgrp { target: GroupId(4) },
                    &spec,
                    &selected,
                    GroupId::USER,
                )
                .unwrap()
                .len()
            });
        });
    }
    group.finish();
}

// Benchmark: planning in reverse dependency order
fn bench_plan_delete(c: &mut Criterion) {
    let spec = wide_spec(16);
    let selected = selections(&spec);
    c.bench_function("plan_delete", |b| {
        b.iter(|| {
            plan_operation(OperationKind::Delete, &spec, &selected, GroupId::USER)
                .unwrap()
                .len()
        });
    });
}

// Benchmark: forced move of images that each carry one out-of-group link
fn bench_forced_chgrp(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let spec = Arc::new(GraphSpec::parse("/Image", &["/Image"]).unwrap());
    let ids = (0..IDS_PER_ENTRY).collect::<Vec<RowId>>();
    let metadata = ExtendedMetadata::new();
    metadata.register(
        ObjectType::new("Image").unwrap(),
        LockCandidate::new("DatasetImageLink", "child").unwrap(),
    );
    let plan = plan_operation(
        OperationKind::Chgrp { target: GroupId(4) },
        &spec,
        &[(0, ids.clone())],
        GroupId::USER,
    )
    .unwrap();

    c.bench_function("forced_chgrp", |b| {
        b.to_async(&rt).iter(|| async {
            let session = MemorySession::new();
            for id in ids.iter() {
                session.insert("Image", *id, GroupId(3));
                session.insert("DatasetImageLink", *id, GroupId(3));
                session.link("DatasetImageLink", *id, "child", *id).unwrap();
            }
            GraphExecutor::new(&session, &metadata, GraphOpts::forced())
                .run(&plan)
                .await
                .unwrap()
                .rows_force_deleted
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(50);
    targets =
        bench_plan_chgrp,
        bench_plan_delete,
        bench_forced_chgrp
}

criterion_main!(benches);
