//! Optimization objectives.
//!
//! An objective ranks otherwise valid plans. It has no satisfaction
//! semantics and is never checked.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Minimize the mean time to repair, the sum of the action end times.
    MinMttr,
    /// Minimize the number of migrations.
    MinMigrations,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::MinMttr => write!(f, "min_mttr"),
            Objective::MinMigrations => write!(f, "min_migrations"),
        }
    }
}
