//! Algorithm configurations: named, immutable bundles of solver flags and capacity modifiers
//! that define one matching attempt.
//!
//! Four built-in configurations mirror the canned matching-server endpoints. User-created
//! configurations address the server's generic endpoint instead and carry their flags as a
//! command-line-style argument vector (see `solver_args`).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Qualitative solver flag. Opaque to this crate; passed through to the matching server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlgorithmFlag {
    Maxsize,
    Gen,
    Gre,
    Mincost,
    Lsb,
}

impl AlgorithmFlag {
    fn name(&self) -> &'static str {
        match self {
            AlgorithmFlag::Maxsize => "maxsize",
            AlgorithmFlag::Gen => "gen",
            AlgorithmFlag::Gre => "gre",
            AlgorithmFlag::Mincost => "mincost",
            AlgorithmFlag::Lsb => "lsb",
        }
    }

    /// Command line form of the flag, e.g. `-maxsize`.
    pub fn as_arg(&self) -> String {
        format!("-{}", self.name())
    }
}

/// A named matching-run configuration. Immutable once created; deleting one also deletes its
/// stored result, but no other configuration's.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmConfig {
    pub id: String,
    /// Unique (case-sensitive) within an instance.
    pub display_name: String,
    pub description: Option<String>,
    pub flag1: AlgorithmFlag,
    pub flag2: Option<AlgorithmFlag>,
    pub flag3: Option<AlgorithmFlag>,
    /// Signed shift applied to every supervisor's target.
    pub target_modifier: i32,
    /// Signed shift applied to every supervisor's upper bound.
    pub upper_bound_modifier: i32,
    /// Preference lists are truncated to this many entries. `-1` disables truncation.
    pub max_rank: i32,
    pub built_in: bool,
    pub created_at: DateTime<Utc>,
}

impl AlgorithmConfig {
    /// Maximum cardinality matching which minimises the number of worst-ranked choices first.
    pub fn generous() -> Self {
        AlgorithmConfig {
            id: String::from("generous"),
            display_name: String::from("Generous"),
            description: Some(String::from(
                "Produces a matching that has maximum cardinality, and subject to this, \
                 minimises the number of Rth choices, and subject to this, minimises the \
                 number of (R-1)th choices, etc., where R is the maximum length of a \
                 preference list.",
            )),
            flag1: AlgorithmFlag::Maxsize,
            flag2: Some(AlgorithmFlag::Gen),
            flag3: Some(AlgorithmFlag::Lsb),
            target_modifier: 0,
            upper_bound_modifier: 0,
            max_rank: -1,
            built_in: true,
            created_at: Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        }
    }

    /// Maximum cardinality matching which maximises the number of first choices first.
    pub fn greedy() -> Self {
        AlgorithmConfig {
            id: String::from("greedy"),
            display_name: String::from("Greedy"),
            description: Some(String::from(
                "Produces a matching that has maximum cardinality, and subject to this, \
                 maximises the number of first choices, and subject to this, maximises the \
                 number of second choices, etc.",
            )),
            flag1: AlgorithmFlag::Maxsize,
            flag2: Some(AlgorithmFlag::Gre),
            flag3: Some(AlgorithmFlag::Lsb),
            target_modifier: 0,
            upper_bound_modifier: 0,
            max_rank: -1,
            built_in: true,
            created_at: Utc.with_ymd_and_hms(2024, 8, 1, 0, 1, 0).unwrap(),
        }
    }

    /// Maximum cardinality matching with minimum total rank cost.
    pub fn minimum_cost() -> Self {
        AlgorithmConfig {
            id: String::from("minimum-cost"),
            display_name: String::from("Minimum Cost"),
            description: Some(String::from(
                "Produces a maximum cardinality matching that has minimum cost, where the \
                 cost of a matching is the sum, taken over all matched students, of the rank \
                 of each student's assigned project in their preference list.",
            )),
            flag1: AlgorithmFlag::Maxsize,
            flag2: Some(AlgorithmFlag::Mincost),
            flag3: Some(AlgorithmFlag::Lsb),
            target_modifier: 0,
            upper_bound_modifier: 0,
            max_rank: -1,
            built_in: true,
            created_at: Utc.with_ymd_and_hms(2024, 8, 1, 0, 2, 0).unwrap(),
        }
    }

    /// Greedy matching restricted to the prefix of each list that a generous matching uses.
    pub fn greedy_generous() -> Self {
        AlgorithmConfig {
            id: String::from("greedy-generous"),
            display_name: String::from("Greedy-Generous"),
            description: Some(String::from(
                "Produces a greedy maximum matching relative to the first k elements on every \
                 student's preference list, where k is the maximum integer such that some \
                 agent obtains their kth choice project in a generous maximum matching.",
            )),
            flag1: AlgorithmFlag::Maxsize,
            flag2: Some(AlgorithmFlag::Gre),
            flag3: Some(AlgorithmFlag::Lsb),
            target_modifier: 0,
            upper_bound_modifier: 0,
            max_rank: -1,
            built_in: true,
            created_at: Utc.with_ymd_and_hms(2024, 8, 1, 0, 3, 0).unwrap(),
        }
    }

    /// All built-in configurations, in their canonical creation order.
    pub fn built_ins() -> Vec<AlgorithmConfig> {
        vec![
            AlgorithmConfig::generous(),
            AlgorithmConfig::greedy(),
            AlgorithmConfig::minimum_cost(),
            AlgorithmConfig::greedy_generous(),
        ]
    }

    /// Path of the matching server endpoint this configuration addresses. Built-in
    /// configurations have a dedicated endpoint named after their id; user-created ones hit
    /// the generic root endpoint and describe themselves via `solver_args`.
    pub fn endpoint(&self) -> &str {
        if self.built_in {
            &self.id
        } else {
            ""
        }
    }

    /// Argument vector describing a user-created configuration to the generic solver
    /// endpoint: `-na 3` followed by each set flag with its position.
    pub fn solver_args(&self) -> Vec<String> {
        let mut args = vec![
            String::from("-na"),
            String::from("3"),
            self.flag1.as_arg(),
            String::from("1"),
        ];
        if let Some(flag) = self.flag2 {
            args.push(flag.as_arg());
            args.push(String::from("2"));
        }
        if let Some(flag) = self.flag3 {
            args.push(flag.as_arg());
            args.push(String::from("3"));
        }
        args
    }
}
