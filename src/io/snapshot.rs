//! IO functionality for loading a complete allocation instance dataset from a JSON snapshot
//! file and writing the committed allocation back out.

use std::collections::HashSet;

use log::warn;
use serde_json::json;

use crate::store::{AllocationRow, InstanceData};

const SNAPSHOT_FORMAT: &str = "X-allocation-instance";
const SUPPORTED_VERSION: &str = "1.0";

/// Read an allocation instance dataset from its JSON snapshot representation (canonical
/// serde_json serialization of `InstanceData`, wrapped in a format/version envelope).
///
/// Rows that cannot participate in matching are cleaned up on the way in: preference and
/// allocation entries referencing a project that is not part of the snapshot are dropped
/// with a warning, and pre-allocated projects missing their committed allocation row get
/// one added, so the loaded dataset always treats pre-allocated students as allocated.
///
/// # Errors
///
/// Fails with a string error message to be displayed to the user, if
/// * the file has invalid JSON syntax (the string representation of the serde_json error is
///   returned)
/// * the file is not an allocation instance snapshot or has an unsupported version
/// * the instance's preference window is empty (min > max)
pub fn read<R: std::io::Read>(reader: R) -> Result<InstanceData, String> {
    let document: serde_json::Value =
        serde_json::from_reader(reader).map_err(|err| err.to_string())?;

    let format = document
        .get("format")
        .and_then(|v| v.as_str())
        .ok_or("No 'format' field found in data. Is this an allocation instance snapshot?")?;
    if format != SNAPSHOT_FORMAT {
        return Err(format!(
            "The given JSON file is no allocation instance snapshot (format '{}')",
            format
        ));
    }
    let version = document
        .get("version")
        .and_then(|v| v.as_str())
        .ok_or("No 'version' field found in data.")?;
    if version != SUPPORTED_VERSION {
        return Err(format!(
            "Snapshot version '{}' is not supported (expected '{}')",
            version, SUPPORTED_VERSION
        ));
    }

    let mut data: InstanceData =
        serde_json::from_value(document).map_err(|e| format!("{}", e))?;

    if data.instance.min_student_preferences > data.instance.max_student_preferences {
        return Err(format!(
            "Min preferences > max preferences for instance '{}'",
            data.instance.id
        ));
    }

    let known_projects: HashSet<String> =
        data.projects.iter().map(|p| p.id.clone()).collect();

    data.preferences.retain(|p| {
        let known = known_projects.contains(&p.project_id);
        if !known {
            warn!(
                "Dropping preference of student '{}' for unknown project '{}'.",
                p.student_id, p.project_id
            );
        }
        known
    });
    data.allocations.retain(|a| {
        let known = known_projects.contains(&a.project_id);
        if !known {
            warn!(
                "Dropping allocation of student '{}' to unknown project '{}'.",
                a.student_id, a.project_id
            );
        }
        known
    });

    // Pre-allocated students must count as allocated, with or without an explicit row
    let allocated: HashSet<String> = data
        .allocations
        .iter()
        .map(|a| a.student_id.clone())
        .collect();
    let mut missing = Vec::new();
    for project in data.projects.iter() {
        if let Some(student_id) = &project.pre_allocated_student_id {
            if !allocated.contains(student_id) {
                warn!(
                    "Adding missing allocation row for student '{}' pre-allocated to project '{}'.",
                    student_id, project.id
                );
                missing.push(AllocationRow {
                    student_id: student_id.clone(),
                    project_id: project.id.clone(),
                    rank: 0,
                });
            }
        }
    }
    data.allocations.extend(missing);

    Ok(data)
}

/// Write a set of committed allocations as simple JSON representation (canonical serde_json
/// serialization of `AllocationRow` objects) to a Writer (e.g. an output file).
pub fn write_allocation<W: std::io::Write>(
    writer: W,
    allocations: &[AllocationRow],
) -> Result<(), String> {
    let a: serde_json::Value =
        serde_json::to_value(allocations).map_err(|e| format!("{}", e))?;
    let data = json!({
        "format": "X-allocation-result",
        "version": "1.0",
        "allocations": a
    });
    serde_json::to_writer(writer, &data).map_err(|e| format!("{}", e))?;

    Ok(())
}
