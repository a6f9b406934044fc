pub mod snapshot;

use std::fmt::Write;

use crate::store::ProjectRow;
use crate::MatchPair;

/// Format a set of committed student→project pairs into a human readable String (e.g. to
/// print it to stdout).
///
/// The output format will look like
/// ```text
/// ===== p1 (supervisor v1) =====
/// s1 (choice 1)
///
/// ===== p2 (supervisor v1) =====
///
/// ===== p3 (supervisor v2) =====
/// s4 (self-defined)
/// ```
pub fn format_allocation(pairs: &[MatchPair], projects: &[ProjectRow]) -> String {
    let mut result = String::new();
    for project in projects.iter() {
        write!(
            result,
            "\n===== {} (supervisor {}) =====\n",
            project.id, project.supervisor_id
        )
        .unwrap();
        for pair in pairs.iter() {
            if pair.project_id == project.id {
                if pair.rank > 0 {
                    write!(result, "{} (choice {})\n", pair.student_id, pair.rank).unwrap();
                } else {
                    write!(result, "{} (self-defined)\n", pair.student_id).unwrap();
                }
            }
        }
    }
    result
}
