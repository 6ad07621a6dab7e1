//! Parallel execution: order-preserving collection and bounded concurrency

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use specrun_engine::{Report, RunConfig, Runner, Status, Suite, SuiteTree};

fn parallel(max: usize) -> RunConfig {
    RunConfig {
        parallel: true,
        max_parallelism: max,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_report_order_matches_declaration_order_under_parallelism() {
    let tree = Suite::describe("root", |cx| {
        for n in 0..20u64 {
            // Scrambled sleep times so completion order differs from
            // declaration order.
            let delay = Duration::from_millis((20 - n) % 7 * 3);
            cx.spec(format!("spec {n:02}"), move |_| async move {
                tokio::time::sleep(delay).await;
                Ok(())
            });
        }
    })
    .build()
    .unwrap();

    let report = Runner::new(parallel(4)).run(tree).await;
    assert!(report.success());

    let order: Vec<String> = report
        .all_results()
        .iter()
        .map(|r| r.description.clone())
        .collect();
    let declared: Vec<String> = (0..20).map(|n| format!("spec {n:02}")).collect();
    assert_eq!(order, declared);
}

#[tokio::test]
async fn test_parallelism_is_bounded_by_the_configured_degree() {
    let current = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let tree = {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        Suite::describe("root", move |cx| {
            for n in 0..12 {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                cx.spec(format!("spec {n}"), move |_| {
                    let current = Arc::clone(&current);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                });
            }
        })
    }
    .build()
    .unwrap();

    let report = Runner::new(parallel(4)).run(tree).await;
    assert!(report.success());

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "parallelism exceeded the bound: {peak}");
    assert!(peak >= 2, "specs never actually overlapped: {peak}");
}

fn mixed_suite() -> SuiteTree {
    Suite::describe("root", |cx| {
        cx.spec("passes", |_| async { Ok(()) });
        cx.spec("fails", |_| async { anyhow::bail!("nope") });
        cx.pending("pending");
        cx.context("empty branch", |cx| {
            cx.context("leaf", |cx| {
                cx.spec("nested", |_| async { Ok(()) });
            });
        });
        cx.xspec("skipped", |_| async { Ok(()) });
    })
    .build()
    .unwrap()
}

fn identities(report: &Report) -> Vec<String> {
    let mut names: Vec<String> = report
        .all_results()
        .iter()
        .map(|r| r.full_name())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_completeness_no_spec_lost_or_duplicated() {
    let tree = mixed_suite();
    let mut declared: Vec<String> = tree
        .specs()
        .map(|spec| {
            let mut parts = tree.spec_path_names(spec.id());
            parts.push(spec.description().to_string());
            parts.join(" ")
        })
        .collect();
    declared.sort();

    let sequential = Runner::default().run(mixed_suite()).await;
    assert_eq!(identities(&sequential), declared);

    let concurrent = Runner::new(parallel(4)).run(tree).await;
    assert_eq!(identities(&concurrent), declared);
}

#[tokio::test]
async fn test_sequential_runs_are_deterministic() {
    let first = Runner::default().run(mixed_suite()).await;
    let second = Runner::default().run(mixed_suite()).await;

    let snapshot = |report: &Report| -> Vec<(String, Status)> {
        report
            .all_results()
            .iter()
            .map(|r| (r.full_name(), r.status))
            .collect()
    };
    assert_eq!(snapshot(&first), snapshot(&second));
}

#[tokio::test]
async fn test_report_preserves_shape_of_spec_free_contexts() {
    let report = Runner::default().run(mixed_suite()).await;

    assert_eq!(report.root.description, "root");
    assert_eq!(report.root.specs.len(), 4);

    // "empty branch" holds no specs of its own but is still represented,
    // with its spec-bearing child beneath it.
    let branch = &report.root.contexts[0];
    assert_eq!(branch.description, "empty branch");
    assert!(branch.specs.is_empty());
    assert_eq!(branch.contexts[0].description, "leaf");
    assert_eq!(branch.contexts[0].specs[0].description, "nested");
}

#[tokio::test]
async fn test_failure_isolation_under_parallelism() {
    let tree = Suite::describe("root", |cx| {
        for n in 0..10 {
            if n % 3 == 0 {
                cx.spec(format!("bad {n}"), |_| async {
                    panic!("spec exploded");
                });
            } else {
                cx.spec(format!("good {n}"), |_| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                });
            }
        }
    })
    .build()
    .unwrap();

    let report = Runner::new(parallel(4)).run(tree).await;
    assert_eq!(report.summary.total, 10);
    assert_eq!(report.summary.failed, 4);
    assert_eq!(report.summary.passed, 6);

    for result in report.all_results() {
        if result.description.starts_with("bad") {
            assert_eq!(result.error.as_ref().unwrap().kind, "panic");
        } else {
            assert_eq!(result.status, Status::Passed);
            assert!(result.error.is_none());
        }
    }
}
