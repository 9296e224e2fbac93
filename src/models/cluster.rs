// src/models/cluster.rs
use serde::{Deserialize, Serialize};

use crate::models::comparison::{ComparisonMethod, PersonIndex};

pub type ClusterId = i64;

/// Durable form of one person's cluster assignment within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub person_index: PersonIndex,
    pub cluster_id: ClusterId,
    pub is_representative: bool,
    /// Method and score of the match that brought this person into its cluster.
    pub joined_via: Option<ComparisonMethod>,
    pub joined_score: Option<f64>,
}
