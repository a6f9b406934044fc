//! Persistence seam of the matching core.
//!
//! The matching pipeline only ever touches the data store through the `Store` trait, so the
//! real database stays outside this crate. `MemoryStore` is the bundled implementation,
//! backed by a single mutex: every trait method runs under one lock acquisition, which makes
//! the multi-step write operations (result storage, selection) atomic the same way the
//! original transactions are.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmConfig;
use crate::{MatchPair, MatchingResult};

/// An allocation instance: one run of the allocation process for a cohort.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRow {
    pub id: String,
    pub display_name: String,
    /// Students must rank at least this many projects to participate.
    pub min_student_preferences: usize,
    /// Students must rank at most this many projects to participate.
    pub max_student_preferences: usize,
    /// Id of the algorithm configuration whose result is the committed allocation, if any.
    #[serde(default)]
    pub selected_alg_id: Option<String>,
}

/// A student registered in an instance. Only students with a `latest_submission` timestamp
/// have finalized their preference list; the rest are drafts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    #[serde(default)]
    pub latest_submission: Option<DateTime<Utc>>,
}

/// One submitted preference entry. Ranks start at 1 and are unique per student.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRow {
    pub student_id: String,
    pub project_id: String,
    pub rank: u32,
}

/// A supervisor's configured workload bounds. Seed data guarantees
/// `lower_bound <= target <= upper_bound`; this crate does not re-validate that.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorRow {
    pub id: String,
    pub lower_bound: i32,
    pub target: i32,
    pub upper_bound: i32,
}

/// A project offered in an instance. A non-empty `pre_allocated_student_id` marks a
/// self-defined project already committed to that student outside the algorithm's control.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub capacity_lower_bound: i32,
    pub capacity_upper_bound: i32,
    pub supervisor_id: String,
    #[serde(default)]
    pub pre_allocated_student_id: Option<String>,
}

/// A committed student→project allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRow {
    pub student_id: String,
    pub project_id: String,
    /// 1-based matched rank; 0 for allocations outside the student's preference list.
    pub rank: u32,
}

/// Complete dataset of one allocation instance, e.g. as loaded from a snapshot file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    pub instance: InstanceRow,
    #[serde(default)]
    pub students: Vec<StudentRow>,
    #[serde(default)]
    pub preferences: Vec<PreferenceRow>,
    #[serde(default)]
    pub supervisors: Vec<SupervisorRow>,
    #[serde(default)]
    pub projects: Vec<ProjectRow>,
    #[serde(default)]
    pub allocations: Vec<AllocationRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),

    #[error("unknown algorithm configuration '{algorithm}' in instance '{instance}'")]
    UnknownAlgorithm { instance: String, algorithm: String },

    #[error("an algorithm configuration named '{display_name}' already exists in instance '{instance}'")]
    DuplicateAlgorithmName {
        instance: String,
        display_name: String,
    },

    #[error("algorithm configuration '{algorithm}' has no stored result in instance '{instance}'")]
    NoResult { instance: String, algorithm: String },
}

/// Read/write access to the entity sets the matching core works on.
///
/// Write operations that touch several entity sets (`save_result`, `apply_selection`,
/// `clear_selection`, `clear_all_results`) must be atomic: a crash or a concurrent reader
/// must never observe allocations without the matching selection marker, or vice versa.
pub trait Store: Send + Sync {
    fn instance(&self, instance_id: &str) -> Result<InstanceRow, StoreError>;

    /// Students of the instance, drafts included; callers filter.
    fn students(&self, instance_id: &str) -> Result<Vec<StudentRow>, StoreError>;

    /// All submitted preference rows of the instance, in no particular order.
    fn preferences(&self, instance_id: &str) -> Result<Vec<PreferenceRow>, StoreError>;

    fn supervisors(&self, instance_id: &str) -> Result<Vec<SupervisorRow>, StoreError>;

    fn projects(&self, instance_id: &str) -> Result<Vec<ProjectRow>, StoreError>;

    /// Currently committed allocations, pre-allocated ones included.
    fn allocations(&self, instance_id: &str) -> Result<Vec<AllocationRow>, StoreError>;

    fn algorithm(&self, instance_id: &str, alg_id: &str)
        -> Result<AlgorithmConfig, StoreError>;

    /// All algorithm configurations of the instance, ordered by creation time.
    fn algorithms(&self, instance_id: &str) -> Result<Vec<AlgorithmConfig>, StoreError>;

    /// Register a new configuration. Fails if its display name (case-sensitive) is taken.
    fn create_algorithm(
        &self,
        instance_id: &str,
        config: AlgorithmConfig,
    ) -> Result<(), StoreError>;

    /// Remove a configuration and its stored result, if any. Other configurations' results
    /// are unaffected.
    fn delete_algorithm(&self, instance_id: &str, alg_id: &str) -> Result<(), StoreError>;

    fn result(
        &self,
        instance_id: &str,
        alg_id: &str,
    ) -> Result<Option<MatchingResult>, StoreError>;

    /// Every configuration with its stored result (if any), ordered by creation time.
    fn results(
        &self,
        instance_id: &str,
    ) -> Result<Vec<(AlgorithmConfig, Option<MatchingResult>)>, StoreError>;

    /// Store a run's result, replacing any previous result for the same configuration.
    fn save_result(
        &self,
        instance_id: &str,
        alg_id: &str,
        result: &MatchingResult,
    ) -> Result<(), StoreError>;

    /// Commit the stored result of `alg_id` as the instance's canonical allocation:
    /// algorithm-made allocations are replaced by the result's pairs (pre-allocations stay)
    /// and the instance records `alg_id` as selected. Atomic.
    fn apply_selection(&self, instance_id: &str, alg_id: &str) -> Result<(), StoreError>;

    /// Drop all algorithm-made allocations (pre-allocations stay) and the selection marker.
    fn clear_selection(&self, instance_id: &str) -> Result<(), StoreError>;

    /// `clear_selection` plus deletion of every stored result.
    fn clear_all_results(&self, instance_id: &str) -> Result<(), StoreError>;
}

struct InstanceState {
    data: InstanceData,
    algorithms: Vec<AlgorithmConfig>,
    /// One stored result per algorithm configuration id.
    results: HashMap<String, MatchingResult>,
}

impl InstanceState {
    /// Student ids bound to a project outside the algorithm's control.
    fn pre_allocated_student_ids(&self) -> HashSet<String> {
        self.data
            .projects
            .iter()
            .filter_map(|p| p.pre_allocated_student_id.clone())
            .collect()
    }

    fn drop_algorithm_allocations(&mut self) {
        let keep = self.pre_allocated_student_ids();
        self.data
            .allocations
            .retain(|a| keep.contains(&a.student_id));
    }
}

/// In-memory `Store` implementation backing the CLI and the test suites.
pub struct MemoryStore {
    instances: Mutex<HashMap<String, InstanceState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Add (or replace) an instance dataset.
    pub fn insert(&self, data: InstanceData) {
        let mut instances = self.instances.lock().unwrap();
        instances.insert(
            data.instance.id.clone(),
            InstanceState {
                data,
                algorithms: Vec::new(),
                results: HashMap::new(),
            },
        );
    }

    fn with_state<T, F>(&self, instance_id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut InstanceState) -> Result<T, StoreError>,
    {
        let mut instances = self.instances.lock().unwrap();
        let state = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::UnknownInstance(instance_id.to_owned()))?;
        f(state)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl Store for MemoryStore {
    fn instance(&self, instance_id: &str) -> Result<InstanceRow, StoreError> {
        self.with_state(instance_id, |state| Ok(state.data.instance.clone()))
    }

    fn students(&self, instance_id: &str) -> Result<Vec<StudentRow>, StoreError> {
        self.with_state(instance_id, |state| Ok(state.data.students.clone()))
    }

    fn preferences(&self, instance_id: &str) -> Result<Vec<PreferenceRow>, StoreError> {
        self.with_state(instance_id, |state| Ok(state.data.preferences.clone()))
    }

    fn supervisors(&self, instance_id: &str) -> Result<Vec<SupervisorRow>, StoreError> {
        self.with_state(instance_id, |state| Ok(state.data.supervisors.clone()))
    }

    fn projects(&self, instance_id: &str) -> Result<Vec<ProjectRow>, StoreError> {
        self.with_state(instance_id, |state| Ok(state.data.projects.clone()))
    }

    fn allocations(&self, instance_id: &str) -> Result<Vec<AllocationRow>, StoreError> {
        self.with_state(instance_id, |state| Ok(state.data.allocations.clone()))
    }

    fn algorithm(
        &self,
        instance_id: &str,
        alg_id: &str,
    ) -> Result<AlgorithmConfig, StoreError> {
        self.with_state(instance_id, |state| {
            state
                .algorithms
                .iter()
                .find(|a| a.id == alg_id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownAlgorithm {
                    instance: instance_id.to_owned(),
                    algorithm: alg_id.to_owned(),
                })
        })
    }

    fn algorithms(&self, instance_id: &str) -> Result<Vec<AlgorithmConfig>, StoreError> {
        self.with_state(instance_id, |state| {
            let mut configs = state.algorithms.clone();
            configs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(configs)
        })
    }

    fn create_algorithm(
        &self,
        instance_id: &str,
        config: AlgorithmConfig,
    ) -> Result<(), StoreError> {
        self.with_state(instance_id, |state| {
            if state
                .algorithms
                .iter()
                .any(|a| a.display_name == config.display_name)
            {
                return Err(StoreError::DuplicateAlgorithmName {
                    instance: instance_id.to_owned(),
                    display_name: config.display_name,
                });
            }
            state.algorithms.push(config);
            Ok(())
        })
    }

    fn delete_algorithm(&self, instance_id: &str, alg_id: &str) -> Result<(), StoreError> {
        self.with_state(instance_id, |state| {
            let before = state.algorithms.len();
            state.algorithms.retain(|a| a.id != alg_id);
            if state.algorithms.len() == before {
                return Err(StoreError::UnknownAlgorithm {
                    instance: instance_id.to_owned(),
                    algorithm: alg_id.to_owned(),
                });
            }
            state.results.remove(alg_id);
            Ok(())
        })
    }

    fn result(
        &self,
        instance_id: &str,
        alg_id: &str,
    ) -> Result<Option<MatchingResult>, StoreError> {
        self.with_state(instance_id, |state| Ok(state.results.get(alg_id).cloned()))
    }

    fn results(
        &self,
        instance_id: &str,
    ) -> Result<Vec<(AlgorithmConfig, Option<MatchingResult>)>, StoreError> {
        self.with_state(instance_id, |state| {
            let mut configs = state.algorithms.clone();
            configs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(configs
                .into_iter()
                .map(|config| {
                    let result = state.results.get(&config.id).cloned();
                    (config, result)
                })
                .collect())
        })
    }

    fn save_result(
        &self,
        instance_id: &str,
        alg_id: &str,
        result: &MatchingResult,
    ) -> Result<(), StoreError> {
        self.with_state(instance_id, |state| {
            if !state.algorithms.iter().any(|a| a.id == alg_id) {
                return Err(StoreError::UnknownAlgorithm {
                    instance: instance_id.to_owned(),
                    algorithm: alg_id.to_owned(),
                });
            }
            state.results.insert(alg_id.to_owned(), result.clone());
            Ok(())
        })
    }

    fn apply_selection(&self, instance_id: &str, alg_id: &str) -> Result<(), StoreError> {
        self.with_state(instance_id, |state| {
            let pairs: Vec<MatchPair> = state
                .results
                .get(alg_id)
                .ok_or_else(|| StoreError::NoResult {
                    instance: instance_id.to_owned(),
                    algorithm: alg_id.to_owned(),
                })?
                .pairs
                .clone();

            state.drop_algorithm_allocations();
            state
                .data
                .allocations
                .extend(pairs.into_iter().map(|p| AllocationRow {
                    student_id: p.student_id,
                    project_id: p.project_id,
                    rank: p.rank,
                }));
            state.data.instance.selected_alg_id = Some(alg_id.to_owned());
            Ok(())
        })
    }

    fn clear_selection(&self, instance_id: &str) -> Result<(), StoreError> {
        self.with_state(instance_id, |state| {
            state.drop_algorithm_allocations();
            state.data.instance.selected_alg_id = None;
            Ok(())
        })
    }

    fn clear_all_results(&self, instance_id: &str) -> Result<(), StoreError> {
        self.with_state(instance_id, |state| {
            state.drop_algorithm_allocations();
            state.data.instance.selected_alg_id = None;
            state.results.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn empty_instance(id: &str) -> InstanceData {
        InstanceData {
            instance: InstanceRow {
                id: String::from(id),
                display_name: String::from("Test instance"),
                min_student_preferences: 1,
                max_student_preferences: 10,
                selected_alg_id: None,
            },
            students: Vec::new(),
            preferences: Vec::new(),
            supervisors: Vec::new(),
            projects: Vec::new(),
            allocations: Vec::new(),
        }
    }

    #[test]
    fn display_names_are_unique_case_sensitive() {
        let store = MemoryStore::new();
        store.insert(empty_instance("i1"));

        store
            .create_algorithm("i1", AlgorithmConfig::generous())
            .unwrap();

        let mut clash = AlgorithmConfig::greedy();
        clash.display_name = String::from("Generous");
        match store.create_algorithm("i1", clash) {
            Err(StoreError::DuplicateAlgorithmName { display_name, .. }) => {
                assert_eq!(display_name, "Generous")
            }
            Ok(()) => panic!("expected a duplicate name error"),
            Err(other) => panic!("expected a duplicate name error, got: {}", other),
        }

        // A different capitalisation is a different name
        let mut lowercase = AlgorithmConfig::minimum_cost();
        lowercase.display_name = String::from("generous");
        assert!(store.create_algorithm("i1", lowercase).is_ok());
    }

    #[test]
    fn deleting_a_config_removes_only_its_result() {
        let store = MemoryStore::new();
        store.insert(empty_instance("i1"));
        store
            .create_algorithm("i1", AlgorithmConfig::generous())
            .unwrap();
        store
            .create_algorithm("i1", AlgorithmConfig::greedy())
            .unwrap();

        let result = MatchingResult {
            pairs: Vec::new(),
            weight: 0,
            size: 0,
            profile: Vec::new(),
        };
        store.save_result("i1", "generous", &result).unwrap();
        store.save_result("i1", "greedy", &result).unwrap();

        store.delete_algorithm("i1", "generous").unwrap();
        assert_eq!(store.result("i1", "generous").unwrap(), None);
        assert!(store.algorithm("i1", "generous").is_err());
        assert_eq!(store.result("i1", "greedy").unwrap(), Some(result));
    }

    #[test]
    fn results_overview_follows_creation_order() {
        let store = MemoryStore::new();
        store.insert(empty_instance("i1"));
        // Inserted out of creation order on purpose
        store
            .create_algorithm("i1", AlgorithmConfig::greedy())
            .unwrap();
        store
            .create_algorithm("i1", AlgorithmConfig::generous())
            .unwrap();

        let result = MatchingResult {
            pairs: Vec::new(),
            weight: 0,
            size: 0,
            profile: Vec::new(),
        };
        store.save_result("i1", "greedy", &result).unwrap();

        let overview = store.results("i1").unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].0.id, "generous");
        assert!(overview[0].1.is_none());
        assert_eq!(overview[1].0.id, "greedy");
        assert_eq!(overview[1].1, Some(result));
    }

    #[test]
    fn unknown_instance_is_reported() {
        let store = MemoryStore::new();
        match store.instance("nope") {
            Err(StoreError::UnknownInstance(id)) => assert_eq!(id, "nope"),
            _ => panic!("expected unknown instance error"),
        }
    }
}
