//! Property-based tests for ordering and limit invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated generator graphs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;
use tokio_test::block_on;
use tokio_util::sync::CancellationToken;

use ferry_core::GeneratorId;
use ferry_flow::prelude::*;
use ferry_test_utils::{ScriptedGenerator, TestEnv, generators};

/// Generates a DAG as, for each node, the indices of earlier nodes it depends on.
fn arb_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|size| {
        (0..size)
            .map(|index| {
                if index == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::btree_set(0..index, 0..=index.min(3))
                        .prop_map(|deps| deps.into_iter().collect())
                        .boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn node(index: usize) -> String {
    format!("g{index}")
}

proptest! {
    #[test]
    fn toposort_places_dependencies_first(dag in arb_dag()) {
        let graph = DependencyGraph::new();
        for (index, deps) in dag.iter().enumerate() {
            let edges: DependencyEdges = deps.iter().map(|dep| GeneratorId::new(node(*dep))).collect();
            graph.add(GeneratorId::new(node(index)), edges).unwrap();
        }

        let order = graph.toposort().unwrap();
        prop_assert_eq!(order.len(), dag.len());

        let position: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(position, id)| (id.to_string(), position))
            .collect();
        for (index, deps) in dag.iter().enumerate() {
            for dep in deps {
                prop_assert!(position[&node(*dep)] < position[&node(index)]);
            }
        }
    }

    #[test]
    fn toposort_without_edges_keeps_registration_order(size in 1usize..20) {
        let graph = DependencyGraph::new();
        for index in (0..size).rev() {
            graph.add(GeneratorId::new(node(index)), DependencyEdges::none()).unwrap();
        }

        let order: Vec<String> = graph.toposort().unwrap().iter().map(ToString::to_string).collect();
        let expected: Vec<String> = (0..size).rev().map(node).collect();
        prop_assert_eq!(order, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn limit_caps_submissions_to_a_harvest_prefix(
        counts in prop::collection::vec(0usize..5, 1..4),
        limit in 0usize..15,
    ) {
        let ctx = TestEnv::new(4);
        let built: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(index, count)| ScriptedGenerator::new(&node(index)).yields(*count).build())
            .collect();
        let options = ApplicationOptions { dry_run: false, limit };
        let mut app = Application::new(generators(&built), options)
            .with_poll_interval(Duration::from_millis(5));
        app.setup(&ctx.env).unwrap();

        let summary = block_on(app.run(&CancellationToken::new())).unwrap();

        let total: usize = counts.iter().sum();
        let expected_count = if limit == 0 { total } else { limit.min(total) };
        prop_assert_eq!(summary.generated, total);
        prop_assert_eq!(summary.submitted, expected_count);

        let harvest_order: Vec<String> = counts
            .iter()
            .enumerate()
            .flat_map(|(index, count)| (0..*count).map(move |i| format!("mig/{}/{i}", node(index))))
            .collect();
        prop_assert_eq!(
            ctx.queue.submitted_migrations(),
            harvest_order[..expected_count].to_vec()
        );
    }
}
