//! Run lifecycle for matching algorithms.
//!
//! A run is one synchronous collect → assemble → solve → interpret cycle for an (instance,
//! algorithm configuration) pair. Feasible outcomes are interpreted into a `MatchingResult`
//! and stored, replacing any previous result of the same configuration; an infeasibility
//! verdict stores nothing and surfaces as `MatchError::Infeasible`. An administrator may
//! afterwards commit one stored result as the instance's canonical allocation (`select`),
//! which removes the matched students from the pool of every future run.
//!
//! Overlapping runs for the same pair would race to overwrite the same stored result, so the
//! runner tracks in-flight pairs and fails the later run fast with
//! `MatchError::ConcurrentRun`. Runs for different pairs proceed independently.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::{info, warn};

use crate::collect;
use crate::modifiers::{adjust_target, adjust_upper_bound};
use crate::solver::{MatchedPair, MatchingSolver, SolverOutcome};
use crate::store::{Store, StoreError};
use crate::{MatchError, MatchPair, MatchingProblem, MatchingResult};

#[cfg(test)]
mod tests;

/// What the administrator sees right after a run: how many of the eligible students the
/// algorithm managed to place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub matched: usize,
    pub total: usize,
}

/// Per-supervisor breakdown of a stored result, comparing the capacities the algorithm was
/// given with the configured ones and the achieved allocation counts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorMatchingDetails {
    pub supervisor_id: String,
    /// Target handed to the algorithm (configuration modifier applied).
    pub algorithm_target: i32,
    /// Target configured in the instance.
    pub configured_target: i32,
    /// Upper bound handed to the algorithm (configuration modifier applied).
    pub algorithm_upper_bound: i32,
    /// Upper bound configured in the instance.
    pub configured_upper_bound: i32,
    /// Students this result allocates to the supervisor.
    pub allocation_count: i32,
    /// Students pre-allocated to the supervisor outside the algorithm's control.
    pub pre_allocated_count: i32,
    pub algorithm_target_difference: i32,
    pub total_target_difference: i32,
}

/// Orchestrates matching runs against a data store and a solver backend.
pub struct MatchingRunner<'a> {
    store: &'a dyn Store,
    solver: &'a dyn MatchingSolver,
    /// (instance id, algorithm configuration id) pairs with a run in progress.
    in_flight: Mutex<HashSet<(String, String)>>,
}

/// Releases the in-flight marker when a run ends, successfully or not.
struct RunGuard<'a> {
    in_flight: &'a Mutex<HashSet<(String, String)>>,
    key: (String, String),
}

impl<'a> Drop for RunGuard<'a> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.key);
    }
}

impl<'a> MatchingRunner<'a> {
    pub fn new(store: &'a dyn Store, solver: &'a dyn MatchingSolver) -> Self {
        MatchingRunner {
            store,
            solver,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn begin(&self, instance_id: &str, alg_id: &str) -> Result<RunGuard, MatchError> {
        let key = (instance_id.to_owned(), alg_id.to_owned());
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(key.clone()) {
            return Err(MatchError::ConcurrentRun {
                instance: key.0,
                algorithm: key.1,
            });
        }
        Ok(RunGuard {
            in_flight: &self.in_flight,
            key,
        })
    }

    /// Execute one matching run and store its result.
    ///
    /// # Errors
    ///
    /// * `MatchError::Infeasible` if the solver reports the problem infeasible. Nothing is
    ///   stored; the same call can be retried after adjusting the configuration.
    /// * `MatchError::ConcurrentRun` if a run for the same pair is still in progress.
    /// * `MatchError::DataIntegrity` if the assembled problem contains dangling references.
    /// * Solver and store failures propagate unchanged.
    pub fn run(&self, instance_id: &str, alg_id: &str) -> Result<RunSummary, MatchError> {
        let _guard = self.begin(instance_id, alg_id)?;

        let config = self.store.algorithm(instance_id, alg_id)?;
        let problem = collect::assemble_problem(self.store, instance_id, &config)?;
        problem
            .check_consistency()
            .map_err(MatchError::DataIntegrity)?;
        info!(
            "Running algorithm '{}' on instance '{}': {} students, {} projects, {} supervisors",
            config.display_name,
            instance_id,
            problem.students.len(),
            problem.projects.len(),
            problem.supervisors.len()
        );

        let raw = match self.solver.solve(&problem, &config)? {
            SolverOutcome::Matched(raw) => raw,
            SolverOutcome::Infeasible => {
                warn!(
                    "Algorithm '{}' on instance '{}': no feasible assignment",
                    config.display_name, instance_id
                );
                return Err(MatchError::Infeasible);
            }
        };

        let result = interpret_pairs(&problem, &raw);
        let summary = RunSummary {
            matched: result.pairs.len(),
            total: problem.students.len(),
        };
        self.store.save_result(instance_id, alg_id, &result)?;
        info!(
            "Algorithm '{}' on instance '{}' matched {} of {} students (weight {})",
            config.display_name, instance_id, summary.matched, summary.total, result.weight
        );
        Ok(summary)
    }

    /// Commit the stored result of `alg_id` as the instance's canonical allocation.
    ///
    /// Atomic: the result's pairs become committed allocations (replacing earlier
    /// algorithm-made allocations, keeping pre-allocations) and the instance records the
    /// configuration as selected, in one store transaction. The matched students drop out
    /// of the preference collector from now on.
    pub fn select(&self, instance_id: &str, alg_id: &str) -> Result<(), MatchError> {
        self.store.apply_selection(instance_id, alg_id)?;
        info!(
            "Selected result of algorithm '{}' for instance '{}'",
            alg_id, instance_id
        );
        Ok(())
    }

    /// Undo `select`: drop algorithm-made allocations and the selection marker.
    pub fn clear_selection(&self, instance_id: &str) -> Result<(), MatchError> {
        self.store.clear_selection(instance_id)?;
        info!("Cleared algorithm selection for instance '{}'", instance_id);
        Ok(())
    }

    /// `clear_selection` plus deletion of every stored result.
    pub fn clear_all_results(&self, instance_id: &str) -> Result<(), MatchError> {
        self.store.clear_all_results(instance_id)?;
        info!("Cleared all matching results for instance '{}'", instance_id);
        Ok(())
    }

    /// Per-supervisor breakdown of the stored result of `alg_id`, one row per supervisor
    /// that received at least one allocation, ordered by supervisor id.
    pub fn supervisor_report(
        &self,
        instance_id: &str,
        alg_id: &str,
    ) -> Result<Vec<SupervisorMatchingDetails>, MatchError> {
        let config = self.store.algorithm(instance_id, alg_id)?;
        let result = self
            .store
            .result(instance_id, alg_id)?
            .ok_or_else(|| StoreError::NoResult {
                instance: instance_id.to_owned(),
                algorithm: alg_id.to_owned(),
            })?;

        let projects = self.store.projects(instance_id)?;

        // One entry per project id
        let supervisor_of_project: HashMap<&str, &str> = projects
            .iter()
            .map(|p| (p.id.as_str(), p.supervisor_id.as_str()))
            .collect();

        let mut pre_allocated: HashMap<&str, i32> = HashMap::new();
        for project in projects.iter() {
            if project.pre_allocated_student_id.is_some() {
                *pre_allocated
                    .entry(project.supervisor_id.as_str())
                    .or_insert(0) += 1;
            }
        }

        // One entry per supervisor id receiving allocations from this result
        let mut allocation_counts: HashMap<&str, i32> = HashMap::new();
        for pair in result.pairs.iter() {
            let supervisor_id = supervisor_of_project
                .get(pair.project_id.as_str())
                .copied()
                .ok_or_else(|| {
                    MatchError::DataIntegrity(format!(
                        "stored pair references unknown project '{}'",
                        pair.project_id
                    ))
                })?;
            *allocation_counts.entry(supervisor_id).or_insert(0) += 1;
        }

        let mut report = Vec::new();
        for row in self.store.supervisors(instance_id)? {
            let allocation_count = match allocation_counts.get(row.id.as_str()) {
                Some(count) => *count,
                None => continue,
            };
            let pre_allocated_count = pre_allocated.get(row.id.as_str()).copied().unwrap_or(0);
            report.push(SupervisorMatchingDetails {
                algorithm_target: adjust_target(row.target, config.target_modifier),
                configured_target: row.target,
                algorithm_upper_bound: adjust_upper_bound(
                    row.upper_bound,
                    config.upper_bound_modifier,
                ),
                configured_upper_bound: row.upper_bound,
                allocation_count,
                pre_allocated_count,
                algorithm_target_difference: allocation_count - row.target,
                total_target_difference: allocation_count + pre_allocated_count - row.target,
                supervisor_id: row.id,
            });
        }
        report.sort_by(|a, b| a.supervisor_id.cmp(&b.supervisor_id));
        Ok(report)
    }
}

/// Interpret the solver's raw assignment list against the problem it was computed from.
///
/// The server marks unmatched students with project id `"0"`; those entries are dropped.
/// Every kept pair is annotated with the 1-based rank of the assigned project on the
/// student's (truncated) preference list, or rank 0 for assignments outside the list, and
/// the summary statistics are derived from those ranks.
fn interpret_pairs(problem: &MatchingProblem, raw: &[MatchedPair]) -> MatchingResult {
    // One entry per student id
    let preferences_of: HashMap<&str, &Vec<String>> = problem
        .students
        .iter()
        .map(|s| (s.id.as_str(), &s.preferences))
        .collect();

    let mut pairs = Vec::new();
    for entry in raw.iter() {
        if entry.project_id == "0" {
            continue;
        }
        let rank = preferences_of
            .get(entry.student_id.as_str())
            .and_then(|preferences| {
                preferences.iter().position(|p| *p == entry.project_id)
            })
            .map(|position| position as u32 + 1)
            .unwrap_or(0);
        pairs.push(MatchPair {
            student_id: entry.student_id.clone(),
            project_id: entry.project_id.clone(),
            rank,
        });
    }

    let size = pairs.len() as u32;
    let weight = pairs.iter().map(|p| p.rank).sum();
    let max_rank = pairs.iter().map(|p| p.rank).max().unwrap_or(0);
    let mut profile = vec![0u32; max_rank as usize];
    for pair in pairs.iter() {
        if pair.rank >= 1 {
            profile[pair.rank as usize - 1] += 1;
        }
    }

    MatchingResult {
        pairs,
        weight,
        size,
        profile,
    }
}
