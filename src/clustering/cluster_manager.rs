// src/clustering/cluster_manager.rs
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};

use crate::models::cluster::{ClusterId, ClusterMembership};
use crate::models::comparison::{ComparisonMethod, PersonIndex};

#[derive(Debug, Clone, PartialEq)]
struct Cluster {
    representative: PersonIndex,
    members: Vec<PersonIndex>,
}

/// How a person entered its cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
struct JoinInfo {
    method: ComparisonMethod,
    score: f64,
}

/// What a `union` call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionOutcome {
    Created(ClusterId),
    Joined(ClusterId),
    Merged { survivor: ClusterId, absorbed: ClusterId },
    AlreadyTogether(ClusterId),
}

/// Arena of clusters keyed by integer id; persons point at their cluster by index.
/// Single writer: the run coordinator owns the only mutable handle.
#[derive(Debug, Clone)]
pub struct ClusterManager {
    cluster_of: Vec<Option<ClusterId>>,
    joined: Vec<Option<JoinInfo>>,
    clusters: HashMap<ClusterId, Cluster>,
    next_id: ClusterId,
    dirty: BTreeSet<PersonIndex>,
}

impl ClusterManager {
    pub fn new(population_size: usize) -> Self {
        Self {
            cluster_of: vec![None; population_size],
            joined: vec![None; population_size],
            clusters: HashMap::new(),
            next_id: 1,
            dirty: BTreeSet::new(),
        }
    }

    /// Rebuilds state from persisted memberships. Out-of-range rows are ignored; a cluster
    /// without exactly one representative gets its lowest member as representative.
    pub fn restore(population_size: usize, memberships: &[ClusterMembership]) -> Self {
        let mut manager = Self::new(population_size);
        let mut declared_reps: HashMap<ClusterId, Vec<PersonIndex>> = HashMap::new();

        for m in memberships {
            if m.person_index >= population_size {
                warn!(
                    "Ignoring membership for index {} outside population of {}",
                    m.person_index, population_size
                );
                continue;
            }
            manager.cluster_of[m.person_index] = Some(m.cluster_id);
            manager.joined[m.person_index] = m
                .joined_via
                .map(|method| JoinInfo {
                    method,
                    score: m.joined_score.unwrap_or(0.0),
                });
            manager
                .clusters
                .entry(m.cluster_id)
                .or_insert_with(|| Cluster {
                    representative: m.person_index,
                    members: Vec::new(),
                })
                .members
                .push(m.person_index);
            if m.is_representative {
                declared_reps.entry(m.cluster_id).or_default().push(m.person_index);
            }
            manager.next_id = manager.next_id.max(m.cluster_id + 1);
        }

        for (id, cluster) in manager.clusters.iter_mut() {
            cluster.members.sort_unstable();
            cluster.representative = match declared_reps.get(id).map(|r| r.as_slice()) {
                Some([only]) => *only,
                _ => {
                    warn!("Cluster {} restored without a unique representative; using lowest member", id);
                    cluster.members[0]
                }
            };
        }

        debug!(
            "Restored {} clusters covering {} persons",
            manager.clusters.len(),
            memberships.len()
        );
        manager
    }

    pub fn population_size(&self) -> usize {
        self.cluster_of.len()
    }

    pub fn find(&self, idx: PersonIndex) -> Option<ClusterId> {
        self.cluster_of.get(idx).copied().flatten()
    }

    pub fn representative(&self, cluster_id: ClusterId) -> Option<PersonIndex> {
        self.clusters.get(&cluster_id).map(|c| c.representative)
    }

    pub fn members(&self, cluster_id: ClusterId) -> Option<&[PersonIndex]> {
        self.clusters.get(&cluster_id).map(|c| c.members.as_slice())
    }

    pub fn is_representative(&self, idx: PersonIndex) -> bool {
        self.find(idx)
            .and_then(|id| self.representative(id))
            .map(|rep| rep == idx)
            .unwrap_or(false)
    }

    /// Clustered and not the representative. The scan skips these persons.
    pub fn is_non_representative_member(&self, idx: PersonIndex) -> bool {
        self.find(idx).is_some() && !self.is_representative(idx)
    }

    pub fn same_cluster(&self, a: PersonIndex, b: PersonIndex) -> bool {
        match (self.find(a), self.find(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn clustered_person_count(&self) -> usize {
        self.cluster_of.iter().filter(|c| c.is_some()).count()
    }

    /// Cluster ids in ascending order with their members.
    pub fn clusters(&self) -> Vec<(ClusterId, PersonIndex, &[PersonIndex])> {
        let mut out: Vec<_> = self
            .clusters
            .iter()
            .map(|(id, c)| (*id, c.representative, c.members.as_slice()))
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out
    }

    pub fn joined_via(&self, idx: PersonIndex) -> Option<(ComparisonMethod, f64)> {
        self.joined
            .get(idx)
            .copied()
            .flatten()
            .map(|j| (j.method, j.score))
    }

    /// Records a match between `i` and `j`.
    pub fn union(&mut self, i: PersonIndex, j: PersonIndex, method: ComparisonMethod, score: f64) -> UnionOutcome {
        let info = JoinInfo { method, score };
        match (self.find(i), self.find(j)) {
            (None, None) => {
                let id = self.next_id;
                self.next_id += 1;
                let (low, high) = if i < j { (i, j) } else { (j, i) };
                self.clusters.insert(
                    id,
                    Cluster {
                        representative: low,
                        members: vec![low, high],
                    },
                );
                self.cluster_of[low] = Some(id);
                self.cluster_of[high] = Some(id);
                self.joined[high] = Some(info);
                self.dirty.insert(low);
                self.dirty.insert(high);
                UnionOutcome::Created(id)
            }
            (Some(id), None) | (None, Some(id)) => {
                let newcomer = if self.cluster_of[i].is_none() { i } else { j };
                if let Some(cluster) = self.clusters.get_mut(&id) {
                    let pos = cluster.members.partition_point(|&m| m < newcomer);
                    cluster.members.insert(pos, newcomer);
                }
                self.cluster_of[newcomer] = Some(id);
                self.joined[newcomer] = Some(info);
                self.dirty.insert(newcomer);
                UnionOutcome::Joined(id)
            }
            (Some(a), Some(b)) if a == b => UnionOutcome::AlreadyTogether(a),
            (Some(a), Some(b)) => self.merge(a, b, info),
        }
    }

    fn merge(&mut self, a: ClusterId, b: ClusterId, info: JoinInfo) -> UnionOutcome {
        let (rep_a, len_a) = self
            .clusters
            .get(&a)
            .map(|c| (c.representative, c.members.len()))
            .unwrap_or((usize::MAX, 0));
        let (rep_b, len_b) = self
            .clusters
            .get(&b)
            .map(|c| (c.representative, c.members.len()))
            .unwrap_or((usize::MAX, 0));

        // Move the smaller member list; the lower-indexed representative survives either way.
        let (survivor, absorbed) = if len_a >= len_b { (a, b) } else { (b, a) };
        let representative = rep_a.min(rep_b);

        let Some(moved) = self.clusters.remove(&absorbed) else {
            return UnionOutcome::AlreadyTogether(survivor);
        };
        // The absorbed representative now hangs off the merging match.
        if moved.representative != representative {
            self.joined[moved.representative] = Some(info);
        }
        let previous_rep = self.clusters.get(&survivor).map(|c| c.representative);
        if let Some(previous) = previous_rep.filter(|p| *p != representative) {
            self.joined[previous] = Some(info);
            self.joined[representative] = None;
            self.dirty.insert(previous);
        }

        for &member in &moved.members {
            self.cluster_of[member] = Some(survivor);
            self.dirty.insert(member);
        }
        if let Some(cluster) = self.clusters.get_mut(&survivor) {
            cluster.members.extend(moved.members);
            cluster.members.sort_unstable();
            cluster.representative = representative;
        }
        self.dirty.insert(representative);

        debug!(
            "Merged cluster {} into {} (representative {})",
            absorbed, survivor, representative
        );
        UnionOutcome::Merged { survivor, absorbed }
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Memberships changed since the last drain, ready to persist.
    pub fn drain_dirty(&mut self) -> Vec<ClusterMembership> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|idx| self.membership(idx))
            .collect()
    }

    pub fn membership(&self, idx: PersonIndex) -> Option<ClusterMembership> {
        let cluster_id = self.find(idx)?;
        let joined = self.joined[idx];
        Some(ClusterMembership {
            person_index: idx,
            cluster_id,
            is_representative: self.representative(cluster_id) == Some(idx),
            joined_via: joined.map(|j| j.method),
            joined_score: joined.map(|j| j.score),
        })
    }

    /// Full membership list, ascending by person index.
    pub fn memberships(&self) -> Vec<ClusterMembership> {
        (0..self.cluster_of.len())
            .filter_map(|idx| self.membership(idx))
            .collect()
    }

    /// Canonical partition: clusters as sorted member lists, sorted. Independent of cluster ids.
    pub fn partition(&self) -> Vec<Vec<PersonIndex>> {
        let mut groups: Vec<Vec<PersonIndex>> = self
            .clusters
            .values()
            .map(|c| c.members.clone())
            .collect();
        groups.sort();
        groups
    }
}
