use std::sync::mpsc;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use super::MatchingRunner;
use crate::algorithm::AlgorithmConfig;
use crate::collect::collect_students;
use crate::solver::{MatchedPair, MatchingSolver, SolverError, SolverOutcome};
use crate::store::{
    AllocationRow, InstanceData, InstanceRow, MemoryStore, PreferenceRow, ProjectRow, Store,
    StoreError, StudentRow, SupervisorRow,
};
use crate::{MatchError, MatchingProblem};

const INSTANCE: &str = "socs-2026";

/// Two eligible students (s1: p1 > p2 > p3, s2: p2 > p1), three open projects under v1 and
/// one project pre-allocated to s6 under v2. Generous and Greedy are registered.
fn seed_store() -> MemoryStore {
    let submitted = Some(Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap());
    let store = MemoryStore::new();
    store.insert(InstanceData {
        instance: InstanceRow {
            id: String::from(INSTANCE),
            display_name: String::from("Final year projects 2026"),
            min_student_preferences: 2,
            max_student_preferences: 5,
            selected_alg_id: None,
        },
        students: vec![
            StudentRow {
                id: String::from("s1"),
                latest_submission: submitted,
            },
            StudentRow {
                id: String::from("s2"),
                latest_submission: submitted,
            },
        ],
        preferences: vec![
            PreferenceRow {
                student_id: String::from("s1"),
                project_id: String::from("p1"),
                rank: 1,
            },
            PreferenceRow {
                student_id: String::from("s1"),
                project_id: String::from("p2"),
                rank: 2,
            },
            PreferenceRow {
                student_id: String::from("s1"),
                project_id: String::from("p3"),
                rank: 3,
            },
            PreferenceRow {
                student_id: String::from("s2"),
                project_id: String::from("p2"),
                rank: 1,
            },
            PreferenceRow {
                student_id: String::from("s2"),
                project_id: String::from("p1"),
                rank: 2,
            },
        ],
        supervisors: vec![
            SupervisorRow {
                id: String::from("v1"),
                lower_bound: 0,
                target: 3,
                upper_bound: 5,
            },
            SupervisorRow {
                id: String::from("v2"),
                lower_bound: 0,
                target: 1,
                upper_bound: 2,
            },
        ],
        projects: vec![
            ProjectRow {
                id: String::from("p1"),
                capacity_lower_bound: 0,
                capacity_upper_bound: 1,
                supervisor_id: String::from("v1"),
                pre_allocated_student_id: None,
            },
            ProjectRow {
                id: String::from("p2"),
                capacity_lower_bound: 0,
                capacity_upper_bound: 1,
                supervisor_id: String::from("v1"),
                pre_allocated_student_id: None,
            },
            ProjectRow {
                id: String::from("p3"),
                capacity_lower_bound: 0,
                capacity_upper_bound: 1,
                supervisor_id: String::from("v1"),
                pre_allocated_student_id: None,
            },
            ProjectRow {
                id: String::from("p4"),
                capacity_lower_bound: 0,
                capacity_upper_bound: 1,
                supervisor_id: String::from("v2"),
                pre_allocated_student_id: Some(String::from("s6")),
            },
        ],
        allocations: vec![AllocationRow {
            student_id: String::from("s6"),
            project_id: String::from("p4"),
            rank: 0,
        }],
    });
    store
        .create_algorithm(INSTANCE, AlgorithmConfig::generous())
        .unwrap();
    store
        .create_algorithm(INSTANCE, AlgorithmConfig::greedy())
        .unwrap();
    store
}

/// Solver stub answering every invocation with the same canned outcome.
struct FixedSolver {
    outcome: SolverOutcome,
}

impl MatchingSolver for FixedSolver {
    fn solve(
        &self,
        _problem: &MatchingProblem,
        _config: &AlgorithmConfig,
    ) -> Result<SolverOutcome, SolverError> {
        Ok(self.outcome.clone())
    }
}

fn matched(pairs: &[(&str, &str)]) -> SolverOutcome {
    SolverOutcome::Matched(
        pairs
            .iter()
            .map(|(student_id, project_id)| MatchedPair {
                student_id: String::from(*student_id),
                project_id: String::from(*project_id),
            })
            .collect(),
    )
}

struct FailingSolver;

impl MatchingSolver for FailingSolver {
    fn solve(
        &self,
        _problem: &MatchingProblem,
        _config: &AlgorithmConfig,
    ) -> Result<SolverOutcome, SolverError> {
        Err(SolverError::Connection(String::from("connection refused")))
    }
}

/// Solver stub that signals when it is entered and blocks until released, to hold a run
/// open while the test probes the in-flight guard.
struct BlockingSolver {
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl MatchingSolver for BlockingSolver {
    fn solve(
        &self,
        _problem: &MatchingProblem,
        _config: &AlgorithmConfig,
    ) -> Result<SolverOutcome, SolverError> {
        self.started.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(SolverOutcome::Matched(Vec::new()))
    }
}

#[test]
fn run_stores_result_and_reports_summary() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p1"), ("s2", "p2")]),
    };
    let runner = MatchingRunner::new(&store, &solver);

    let summary = runner.run(INSTANCE, "generous").unwrap();
    assert_eq!((summary.matched, summary.total), (2, 2));

    let result = store.result(INSTANCE, "generous").unwrap().unwrap();
    assert_eq!(result.size, 2);
    // Both students got their first choice
    assert_eq!(result.weight, 2);
    assert_eq!(result.profile, vec![2]);
    assert!(result
        .pairs
        .iter()
        .any(|p| p.student_id == "s1" && p.project_id == "p1" && p.rank == 1));
    assert!(result
        .pairs
        .iter()
        .any(|p| p.student_id == "s2" && p.project_id == "p2" && p.rank == 1));
}

#[test]
fn second_choices_shift_the_profile() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p2"), ("s2", "p1")]),
    };
    let runner = MatchingRunner::new(&store, &solver);

    runner.run(INSTANCE, "generous").unwrap();
    let result = store.result(INSTANCE, "generous").unwrap().unwrap();
    assert_eq!(result.weight, 4);
    assert_eq!(result.profile, vec![0, 2]);
}

#[test]
fn unmatched_sentinel_entries_are_dropped() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p1"), ("s2", "0")]),
    };
    let runner = MatchingRunner::new(&store, &solver);

    let summary = runner.run(INSTANCE, "generous").unwrap();
    assert_eq!((summary.matched, summary.total), (1, 2));

    let result = store.result(INSTANCE, "generous").unwrap().unwrap();
    assert_eq!(result.size, 1);
    assert!(result.pairs.iter().all(|p| p.project_id != "0"));
}

#[test]
fn off_list_assignments_get_rank_zero() {
    let store = seed_store();
    // p4 is not on s1's preference list
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p4")]),
    };
    let runner = MatchingRunner::new(&store, &solver);

    runner.run(INSTANCE, "generous").unwrap();
    let result = store.result(INSTANCE, "generous").unwrap().unwrap();
    assert_eq!(result.size, 1);
    assert_eq!(result.pairs[0].rank, 0);
    assert_eq!(result.weight, 0);
    assert_eq!(result.profile, Vec::<u32>::new());
}

#[test]
fn infeasible_run_stores_nothing_and_is_repeatable() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: SolverOutcome::Infeasible,
    };
    let runner = MatchingRunner::new(&store, &solver);

    for _ in 0..2 {
        match runner.run(INSTANCE, "generous") {
            Err(MatchError::Infeasible) => (),
            _ => panic!("expected an infeasible run"),
        }
        assert_eq!(store.result(INSTANCE, "generous").unwrap(), None);
    }
}

#[test]
fn rerun_overwrites_the_stored_result() {
    let store = seed_store();

    let first = FixedSolver {
        outcome: matched(&[("s1", "p1"), ("s2", "p2")]),
    };
    MatchingRunner::new(&store, &first)
        .run(INSTANCE, "generous")
        .unwrap();

    let second = FixedSolver {
        outcome: matched(&[("s1", "p2"), ("s2", "0")]),
    };
    MatchingRunner::new(&store, &second)
        .run(INSTANCE, "generous")
        .unwrap();

    let result = store.result(INSTANCE, "generous").unwrap().unwrap();
    assert_eq!(result.size, 1);
    assert_eq!(result.pairs[0].project_id, "p2");
    assert_eq!(result.pairs[0].rank, 2);
}

#[test]
fn select_commits_result_and_shrinks_the_pool() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p1"), ("s2", "p2")]),
    };
    let runner = MatchingRunner::new(&store, &solver);

    runner.run(INSTANCE, "generous").unwrap();
    runner.select(INSTANCE, "generous").unwrap();

    let instance = store.instance(INSTANCE).unwrap();
    assert_eq!(instance.selected_alg_id.as_deref(), Some("generous"));

    let allocations = store.allocations(INSTANCE).unwrap();
    assert_eq!(allocations.len(), 3);
    assert!(allocations
        .iter()
        .any(|a| a.student_id == "s6" && a.project_id == "p4"));
    assert!(allocations
        .iter()
        .any(|a| a.student_id == "s1" && a.project_id == "p1" && a.rank == 1));
    assert!(allocations
        .iter()
        .any(|a| a.student_id == "s2" && a.project_id == "p2" && a.rank == 1));

    // The matched students are gone from any future run's problem
    let config = store.algorithm(INSTANCE, "generous").unwrap();
    let students = collect_students(&store, INSTANCE, &config).unwrap();
    assert!(students.is_empty());
}

#[test]
fn selecting_another_result_replaces_algorithm_allocations() {
    let store = seed_store();

    let generous = FixedSolver {
        outcome: matched(&[("s1", "p1"), ("s2", "p2")]),
    };
    MatchingRunner::new(&store, &generous)
        .run(INSTANCE, "generous")
        .unwrap();

    let greedy = FixedSolver {
        outcome: matched(&[("s1", "p2")]),
    };
    MatchingRunner::new(&store, &greedy)
        .run(INSTANCE, "greedy")
        .unwrap();

    let solver = FixedSolver {
        outcome: SolverOutcome::Infeasible,
    };
    let runner = MatchingRunner::new(&store, &solver);
    runner.select(INSTANCE, "generous").unwrap();
    runner.select(INSTANCE, "greedy").unwrap();

    let instance = store.instance(INSTANCE).unwrap();
    assert_eq!(instance.selected_alg_id.as_deref(), Some("greedy"));

    let allocations = store.allocations(INSTANCE).unwrap();
    assert_eq!(allocations.len(), 2);
    assert!(allocations
        .iter()
        .any(|a| a.student_id == "s6" && a.project_id == "p4"));
    assert!(allocations
        .iter()
        .any(|a| a.student_id == "s1" && a.project_id == "p2" && a.rank == 2));
}

#[test]
fn clearing_the_selection_keeps_pre_allocations() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p1")]),
    };
    let runner = MatchingRunner::new(&store, &solver);

    runner.run(INSTANCE, "generous").unwrap();
    runner.select(INSTANCE, "generous").unwrap();
    runner.clear_selection(INSTANCE).unwrap();

    assert_eq!(store.instance(INSTANCE).unwrap().selected_alg_id, None);
    let allocations = store.allocations(INSTANCE).unwrap();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].student_id, "s6");

    // The stored result survived a cleared selection
    assert!(store.result(INSTANCE, "generous").unwrap().is_some());

    runner.run(INSTANCE, "generous").unwrap();
    runner.select(INSTANCE, "generous").unwrap();
    runner.clear_all_results(INSTANCE).unwrap();
    assert_eq!(store.result(INSTANCE, "generous").unwrap(), None);
    assert_eq!(store.instance(INSTANCE).unwrap().selected_alg_id, None);
}

#[test]
fn selecting_without_a_stored_result_fails() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: SolverOutcome::Infeasible,
    };
    let runner = MatchingRunner::new(&store, &solver);

    match runner.select(INSTANCE, "generous") {
        Err(MatchError::Store(StoreError::NoResult { algorithm, .. })) => {
            assert_eq!(algorithm, "generous")
        }
        _ => panic!("expected a missing result error"),
    }
}

#[test]
fn overlapping_runs_for_the_same_pair_conflict() {
    let store = seed_store();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let solver = BlockingSolver {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    };
    let runner = MatchingRunner::new(&store, &solver);

    std::thread::scope(|scope| {
        let first = scope.spawn(|| runner.run(INSTANCE, "generous"));
        started_rx.recv().unwrap();

        // The second trigger for the same pair fails fast while the first is in flight
        match runner.run(INSTANCE, "generous") {
            Err(MatchError::ConcurrentRun { algorithm, .. }) => {
                assert_eq!(algorithm, "generous")
            }
            _ => panic!("expected a concurrent run conflict"),
        }

        release_tx.send(()).unwrap();
        first.join().unwrap().unwrap();
    });

    // Once the first run finished, the pair is free again
    release_tx.send(()).unwrap();
    runner.run(INSTANCE, "generous").unwrap();
}

#[test]
fn a_failed_run_releases_the_in_flight_marker() {
    let store = seed_store();
    let solver = FailingSolver;
    let runner = MatchingRunner::new(&store, &solver);

    for _ in 0..2 {
        match runner.run(INSTANCE, "generous") {
            Err(MatchError::Solver(_)) => (),
            Err(MatchError::ConcurrentRun { .. }) => {
                panic!("in-flight marker leaked from the previous failed run")
            }
            _ => panic!("expected a solver failure"),
        }
    }
}

#[test]
fn supervisor_report_compares_algorithm_and_configured_capacities() {
    let store = seed_store();
    let solver = FixedSolver {
        outcome: matched(&[("s1", "p1"), ("s2", "p2")]),
    };
    let runner = MatchingRunner::new(&store, &solver);
    runner.run(INSTANCE, "generous").unwrap();

    let report = runner.supervisor_report(INSTANCE, "generous").unwrap();
    // Only v1 received allocations from this result
    assert_eq!(report.len(), 1);
    let v1 = &report[0];
    assert_eq!(v1.supervisor_id, "v1");
    assert_eq!(v1.algorithm_target, 3);
    assert_eq!(v1.configured_target, 3);
    assert_eq!(v1.algorithm_upper_bound, 5);
    assert_eq!(v1.configured_upper_bound, 5);
    assert_eq!(v1.allocation_count, 2);
    assert_eq!(v1.pre_allocated_count, 0);
    assert_eq!(v1.algorithm_target_difference, -1);
    assert_eq!(v1.total_target_difference, -1);
}
