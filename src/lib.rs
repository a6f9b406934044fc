pub mod algorithm;
pub mod collect;
pub mod io;
pub mod modifiers;
pub mod run;
pub mod solver;
pub mod store;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Matching view of a student: their id and the ranked project ids they may be assigned to.
///
/// The preference list is ordered best-first and already truncated to the algorithm
/// configuration's maximum rank (see `collect::collect_students`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub preferences: Vec<String>,
}

/// Matching view of a project: its capacity bounds and the supervisor offering it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub lower_bound: i32,
    pub upper_bound: i32,
    pub supervisor_id: String,
}

/// Matching view of a supervisor: workload bounds after pre-allocation subtraction and
/// modifier application (see `collect::collect_supervisors`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supervisor {
    pub id: String,
    pub lower_bound: i32,
    pub target: i32,
    pub upper_bound: i32,
}

/// One matching problem, assembled fresh for every algorithm run and handed to the
/// matching server as-is. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingProblem {
    pub students: Vec<Student>,
    pub projects: Vec<Project>,
    pub supervisors: Vec<Supervisor>,
}

impl MatchingProblem {
    /// Verify the internal references of the aggregate: every project must belong to a known
    /// supervisor and every preference must point to a known project.
    ///
    /// A violation means the upstream data maintenance is broken, so callers should abort the
    /// run rather than try to repair the problem.
    pub fn check_consistency(&self) -> Result<(), String> {
        let supervisor_ids: HashSet<&str> =
            self.supervisors.iter().map(|s| s.id.as_str()).collect();
        for project in self.projects.iter() {
            if !supervisor_ids.contains(project.supervisor_id.as_str()) {
                return Err(format!(
                    "project '{}' references unknown supervisor '{}'",
                    project.id, project.supervisor_id
                ));
            }
        }

        let project_ids: HashSet<&str> = self.projects.iter().map(|p| p.id.as_str()).collect();
        for student in self.students.iter() {
            for preference in student.preferences.iter() {
                if !project_ids.contains(preference.as_str()) {
                    return Err(format!(
                        "student '{}' ranks unknown project '{}'",
                        student.id, preference
                    ));
                }
            }
        }

        Ok(())
    }
}

/// One committed student→project assignment, as stored with a matching result.
///
/// `rank` is the 1-based position of the project on the student's submitted preference list.
/// Rank 0 marks an assignment outside the list (e.g. a self-defined project).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub student_id: String,
    pub project_id: String,
    pub rank: u32,
}

/// The interpreted outcome of one algorithm run: the assignment itself plus the summary
/// statistics derived from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    pub pairs: Vec<MatchPair>,
    /// Sum of the matched ranks. Rank-0 (unranked) pairs contribute nothing.
    pub weight: u32,
    /// Number of matched pairs.
    pub size: u32,
    /// Histogram of matched ranks: `profile[r - 1]` students received their rank-`r` choice.
    pub profile: Vec<u32>,
}

/// Error taxonomy of the matching pipeline.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The configured bounds admit no feasible assignment. The administrator may adjust the
    /// algorithm configuration's modifiers or maximum rank and retry.
    #[error("Matching is infeasible with current configuration")]
    Infeasible,

    /// A referenced entity is missing from the collected data. Indicates broken upstream data
    /// maintenance, not a recoverable runtime condition.
    #[error("data integrity fault: {0}")]
    DataIntegrity(String),

    /// Another run for the same instance and algorithm configuration is still in progress.
    #[error("a run for algorithm '{algorithm}' on instance '{instance}' is already in progress")]
    ConcurrentRun { instance: String, algorithm: String },

    #[error("matching server failure: {0}")]
    Solver(#[from] solver::SolverError),

    #[error(transparent)]
    Store(#[from] store::StoreError),
}
