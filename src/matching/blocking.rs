// src/matching/blocking.rs
use std::collections::BTreeMap;

use crate::matching::fingerprint::normalize_place;
use crate::models::comparison::PersonIndex;
use crate::models::person::PopulationSnapshot;

/// Bucket for persons with no recorded district.
pub const UNKNOWN_DISTRICT: &str = "__unknown__";

/// District blocks over a snapshot. Only same-block pairs are ever candidates.
#[derive(Debug, Clone)]
pub struct BlockingIndex {
    blocks: BTreeMap<String, Vec<PersonIndex>>,
    block_of: Vec<String>,
}

pub fn block_key(district: Option<&str>) -> String {
    district
        .map(normalize_place)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| UNKNOWN_DISTRICT.to_string())
}

impl BlockingIndex {
    pub fn build(snapshot: &PopulationSnapshot) -> Self {
        let mut blocks: BTreeMap<String, Vec<PersonIndex>> = BTreeMap::new();
        let mut block_of = Vec::with_capacity(snapshot.len());
        for (idx, person) in snapshot.persons().iter().enumerate() {
            let key = block_key(person.present_district.as_deref());
            // Indices are pushed in ascending order, so every block stays sorted.
            blocks.entry(key.clone()).or_default().push(idx);
            block_of.push(key);
        }
        Self { blocks, block_of }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, key: &str) -> Option<&[PersonIndex]> {
        self.blocks.get(key).map(|v| v.as_slice())
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&str, &[PersonIndex])> {
        self.blocks.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn block_of(&self, idx: PersonIndex) -> &str {
        &self.block_of[idx]
    }

    /// Same-block indices strictly greater than `idx`, ascending.
    pub fn candidates_after(&self, idx: PersonIndex) -> &[PersonIndex] {
        match self.blocks.get(&self.block_of[idx]) {
            Some(members) => {
                let start = members.partition_point(|&m| m <= idx);
                &members[start..]
            }
            None => &[],
        }
    }

    /// Number of candidate pairs the scan would propose without any skipping.
    pub fn candidate_pair_count(&self) -> u64 {
        self.blocks
            .values()
            .map(|m| {
                let n = m.len() as u64;
                n * n.saturating_sub(1) / 2
            })
            .sum()
    }
}
