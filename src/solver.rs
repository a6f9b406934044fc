//! Interface to the external matching server.
//!
//! The server is an opaque black box: it receives the assembled problem (plus, for
//! user-created configurations, an argument vector describing the solver flags) and answers
//! with either a list of student→project assignments or an infeasibility verdict. Everything
//! else (transport trouble, malformed bodies, rejected requests) is a `SolverError` and
//! surfaces as a generic run failure.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmConfig;
use crate::{MatchingProblem, Project, Student, Supervisor};

/// Solver invocation failures that are not an infeasibility verdict.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("unable to connect to the matching server: {0}")]
    Connection(String),

    #[error("matching server returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("matching server rejected the request: {0}")]
    Rejected(String),
}

/// One student→project assignment as reported by the matching server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub student_id: String,
    pub project_id: String,
}

/// Verdict of one solver invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum SolverOutcome {
    /// The raw assignment list. May contain sentinel entries for unmatched students; the
    /// run boundary filters those out.
    Matched(Vec<MatchedPair>),
    /// The problem's bounds admit no assignment.
    Infeasible,
}

/// The solver backend a matching run invokes. Implemented over HTTP in production
/// (`HttpSolver`) and by canned stubs in the test suites.
pub trait MatchingSolver: Send + Sync {
    fn solve(
        &self,
        problem: &MatchingProblem,
        config: &AlgorithmConfig,
    ) -> Result<SolverOutcome, SolverError>;
}

/// Request body for the matching server: the problem, flattened, plus the argument vector
/// for user-created configurations.
#[derive(Serialize)]
struct SolveRequest<'a> {
    students: &'a [Student],
    projects: &'a [Project],
    supervisors: &'a [Supervisor],
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Vec<String>>,
}

/// Response envelope of the matching server. An application-level `status` of 400 signals
/// infeasibility; any 2xx status must carry the assignment data.
#[derive(Deserialize)]
struct SolveResponse {
    status: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<SolveResponseData>,
}

#[derive(Deserialize)]
struct SolveResponseData {
    matching: Vec<MatchedPair>,
}

fn interpret_response(response: SolveResponse) -> Result<SolverOutcome, SolverError> {
    if response.status == 400 {
        return Ok(SolverOutcome::Infeasible);
    }
    match response.data {
        Some(data) => Ok(SolverOutcome::Matched(data.matching)),
        None => Err(SolverError::InvalidResponse(format!(
            "status {} without assignment data: {}",
            response.status, response.message
        ))),
    }
}

/// Production solver backend: POSTs the problem as JSON to the matching server.
///
/// Built-in configurations address their dedicated endpoint below `base_url`; user-created
/// ones hit `base_url` itself with their argument vector attached to the request body.
pub struct HttpSolver {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpSolver {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        HttpSolver {
            base_url,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl MatchingSolver for HttpSolver {
    fn solve(
        &self,
        problem: &MatchingProblem,
        config: &AlgorithmConfig,
    ) -> Result<SolverOutcome, SolverError> {
        let request = SolveRequest {
            students: &problem.students,
            projects: &problem.projects,
            supervisors: &problem.supervisors,
            args: if config.built_in {
                None
            } else {
                Some(config.solver_args())
            },
        };

        let url = format!("{}/{}", self.base_url, config.endpoint());
        debug!("Posting problem for algorithm '{}' to {}", config.id, url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| SolverError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SolverError::Rejected(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: SolveResponse = response
            .json()
            .map_err(|e| SolverError::InvalidResponse(e.to_string()))?;
        interpret_response(body)
    }
}
