// tests/property_termination.rs

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use assetflow::dag::{Pipeline, TaskSpec};
use assetflow::errors::AssetflowError;
use assetflow::fs::FileSystem;
use assetflow::fs::mock::MockFileSystem;
use assetflow::scheduler::Scheduler;
use assetflow_test_utils::{FakeTransform, Journal};

/// A random acyclic task graph: `leaves` transforms, then composites that
/// only reference earlier nodes (leaves or composites), so there can be no
/// cycle.
#[derive(Debug, Clone)]
struct GraphShape {
    leaves: usize,
    failing: BTreeSet<usize>,
    composites: Vec<(bool, Vec<usize>)>,
}

fn graph_strategy() -> impl Strategy<Value = GraphShape> {
    (1..=6usize).prop_flat_map(|leaves| {
        let failing = proptest::collection::btree_set(0..leaves, 0..=leaves.min(2));
        let composites = proptest::collection::vec(
            (any::<bool>(), proptest::collection::vec(any::<usize>(), 1..4)),
            1..6,
        );
        (Just(leaves), failing, composites).prop_map(|(leaves, failing, raw)| {
            let composites = raw
                .into_iter()
                .enumerate()
                .map(|(i, (concurrent, picks))| {
                    // Node ids: 0..leaves are transforms, leaves+j is composite j.
                    let available = leaves + i;
                    let mut children: Vec<usize> = picks.into_iter().map(|p| p % available).collect();
                    children.dedup();
                    (concurrent, children)
                })
                .collect();
            GraphShape {
                leaves,
                failing,
                composites,
            }
        })
    })
}

fn node_name(shape: &GraphShape, id: usize) -> String {
    if id < shape.leaves {
        format!("t{id}")
    } else {
        format!("c{}", id - shape.leaves)
    }
}

fn build(shape: &GraphShape, journal: &Journal) -> Result<Pipeline, AssetflowError> {
    let mut builder = Pipeline::builder();
    for i in 0..shape.leaves {
        let mut t = FakeTransform::new(&format!("t{i}"), "app/*.txt", &format!("out/t{i}"))
            .with_journal(journal)
            .with_delay(Duration::from_millis(1));
        if shape.failing.contains(&i) {
            t = t.failing("planned failure");
        }
        builder = builder.transform(t.into_arc());
    }
    for (j, (concurrent, children)) in shape.composites.iter().enumerate() {
        let names: Vec<String> = children.iter().map(|c| node_name(shape, *c)).collect();
        let spec = if *concurrent {
            TaskSpec::concurrent(names)
        } else {
            TaskSpec::sequential(names)
        };
        builder = builder.task(format!("c{j}"), spec);
    }
    builder.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_acyclic_graph_terminates(shape in graph_strategy()) {
        let journal = Journal::new();
        let pipeline = match build(&shape, &journal) {
            Ok(p) => p,
            // Rejected graphs (e.g. a transform shared by concurrent
            // branches) never run.
            Err(AssetflowError::Configuration(_)) => return Ok(()),
            Err(e) => panic!("unexpected build error: {e:?}"),
        };

        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("./app/a.txt", "a");
        let scheduler = Scheduler::new(Arc::new(pipeline), ".")
            .with_fs(fs as Arc<dyn FileSystem>);
        let top = format!("c{}", shape.composites.len() - 1);

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let result = rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), scheduler.run_once(&top)).await
        });

        let result = result.expect("graph run did not terminate");
        let reaches_failure = journal.entries().iter().any(|e| e.starts_with("fail:"));
        prop_assert_eq!(result.is_err(), reaches_failure);

        // Every started transform finished (or failed); nothing is left
        // half-run.
        let entries = journal.entries();
        let started = entries.iter().filter(|e| e.starts_with("start:")).count();
        let finished = entries
            .iter()
            .filter(|e| e.starts_with("end:") || e.starts_with("fail:"))
            .count();
        prop_assert_eq!(started, finished);
    }
}
