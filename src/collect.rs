//! Data collection for a matching run.
//!
//! The three collectors read the entity sets a matching problem is built from and apply the
//! algorithm configuration's adjustments: the preference collector filters and truncates
//! student preference lists, the capacity collector turns configured supervisor bounds into
//! the bounds the solver may use, and the project collector passes project capacities
//! through. They derive from disjoint entity sets, share no mutable state and may run in any
//! order; `assemble_problem` merely composes their outputs.

use std::cmp::max;
use std::collections::{HashMap, HashSet};

use log::debug;

use crate::algorithm::AlgorithmConfig;
use crate::modifiers::{adjust_target, adjust_upper_bound};
use crate::store::Store;
use crate::{MatchError, MatchingProblem, Project, Student, Supervisor};


/// Collect the students eligible for matching, with their truncated preference lists.
///
/// A student participates iff they have finalized their preference list, have no committed
/// allocation yet, and the length of their submitted list lies within the instance's
/// configured window. Students outside the window are not an error, just not yet eligible.
/// Kept lists are ordered by ascending rank and cut off after the configuration's maximum
/// rank (`-1` disables truncation).
pub fn collect_students(
    store: &dyn Store,
    instance_id: &str,
    config: &AlgorithmConfig,
) -> Result<Vec<Student>, MatchError> {
    let instance = store.instance(instance_id)?;

    let allocated: HashSet<String> = store
        .allocations(instance_id)?
        .into_iter()
        .map(|a| a.student_id)
        .collect();

    let known_projects: HashSet<String> = store
        .projects(instance_id)?
        .into_iter()
        .map(|p| p.id)
        .collect();

    // One entry per student id; ranks are unique per student, so sorting the bucket restores
    // the submission order.
    let mut preferences_by_student: HashMap<String, Vec<(u32, String)>> = HashMap::new();
    for row in store.preferences(instance_id)? {
        if !known_projects.contains(&row.project_id) {
            return Err(MatchError::DataIntegrity(format!(
                "preference of student '{}' references unknown project '{}'",
                row.student_id, row.project_id
            )));
        }
        preferences_by_student
            .entry(row.student_id)
            .or_insert_with(Vec::new)
            .push((row.rank, row.project_id));
    }

    let mut students = Vec::new();
    for student in store.students(instance_id)? {
        if student.latest_submission.is_none() || allocated.contains(&student.id) {
            continue;
        }

        let mut submitted = preferences_by_student
            .remove(&student.id)
            .unwrap_or_default();
        submitted.sort_by_key(|(rank, _)| *rank);

        // The eligibility window applies to the full submitted list, before truncation
        if submitted.len() < instance.min_student_preferences
            || submitted.len() > instance.max_student_preferences
        {
            debug!(
                "Skipping student '{}': {} preferences outside window [{}, {}]",
                student.id,
                submitted.len(),
                instance.min_student_preferences,
                instance.max_student_preferences
            );
            continue;
        }

        let mut preferences: Vec<String> =
            submitted.into_iter().map(|(_, project_id)| project_id).collect();
        if config.max_rank >= 0 {
            preferences.truncate(config.max_rank as usize);
        }

        students.push(Student {
            id: student.id,
            preferences,
        });
    }

    Ok(students)
}

/// Collect the supervisor capacities the solver may use.
///
/// Pre-allocated projects already consume their supervisor's capacity, so their count is
/// subtracted from both target and upper bound before the configuration's modifiers are
/// applied. The subtraction may drop below zero; the modifier arithmetic floors at zero.
/// The final upper bound is never allowed to undercut the (possibly boosted) target.
pub fn collect_supervisors(
    store: &dyn Store,
    instance_id: &str,
    config: &AlgorithmConfig,
) -> Result<Vec<Supervisor>, MatchError> {
    // One entry per supervisor id owning at least one pre-allocated project
    let mut pre_allocations: HashMap<String, i32> = HashMap::new();
    for project in store.projects(instance_id)? {
        if project.pre_allocated_student_id.is_some() {
            *pre_allocations.entry(project.supervisor_id).or_insert(0) += 1;
        }
    }

    let mut supervisors = Vec::new();
    for row in store.supervisors(instance_id)? {
        let committed = pre_allocations.get(&row.id).copied().unwrap_or(0);
        let target = adjust_target(row.target - committed, config.target_modifier);
        let upper_bound =
            adjust_upper_bound(row.upper_bound - committed, config.upper_bound_modifier);

        supervisors.push(Supervisor {
            id: row.id,
            lower_bound: row.lower_bound,
            target,
            upper_bound: max(target, upper_bound),
        });
    }

    Ok(supervisors)
}

/// Collect every project of the instance with its capacity bounds.
///
/// Pre-allocated projects are included: their capacity footprint must be visible to the
/// solver even though their students were never offered for matching.
pub fn collect_projects(
    store: &dyn Store,
    instance_id: &str,
) -> Result<Vec<Project>, MatchError> {
    Ok(store
        .projects(instance_id)?
        .into_iter()
        .map(|p| Project {
            id: p.id,
            lower_bound: p.capacity_lower_bound,
            upper_bound: p.capacity_upper_bound,
            supervisor_id: p.supervisor_id,
        })
        .collect())
}

/// Assemble the complete matching problem for one run of the given configuration.
///
/// This is the single entry point a solver invocation wraps. The collectors' outputs are
/// composed unchanged; cross-reference validation is the run boundary's concern (see
/// `MatchingProblem::check_consistency`).
pub fn assemble_problem(
    store: &dyn Store,
    instance_id: &str,
    config: &AlgorithmConfig,
) -> Result<MatchingProblem, MatchError> {
    Ok(MatchingProblem {
        students: collect_students(store, instance_id, config)?,
        projects: collect_projects(store, instance_id)?,
        supervisors: collect_supervisors(store, instance_id, config)?,
    })
}
