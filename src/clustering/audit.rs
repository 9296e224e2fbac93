// src/clustering/audit.rs
use log::{info, warn};
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};

use crate::clustering::cluster_manager::ClusterManager;
use crate::models::comparison::PersonIndex;
use crate::models::person::PopulationSnapshot;
use crate::models::stats_models::ClosureAudit;

/// Checks that every recorded match ended up inside a single final cluster.
/// Split pairs are matches the scan never applied, typically lost to representative-only skipping.
pub fn audit_transitive_closure(
    snapshot: &PopulationSnapshot,
    manager: &ClusterManager,
    recorded_matches: &[(PersonIndex, PersonIndex)],
) -> ClosureAudit {
    let mut graph: UnGraph<PersonIndex, ()> = UnGraph::with_capacity(snapshot.len(), recorded_matches.len());
    let nodes: Vec<NodeIndex> = (0..snapshot.len()).map(|idx| graph.add_node(idx)).collect();

    let mut split_pairs = Vec::new();
    let mut edges = 0;
    for &(a, b) in recorded_matches {
        if a >= nodes.len() || b >= nodes.len() || a == b {
            continue;
        }
        graph.add_edge(nodes[a], nodes[b], ());
        edges += 1;
        if !manager.same_cluster(a, b) {
            split_pairs.push((
                snapshot.person(a).person_id.clone(),
                snapshot.person(b).person_id.clone(),
            ));
        }
    }

    // Singletons count as components; subtract persons untouched by any match.
    let isolated = nodes
        .iter()
        .filter(|n| graph.neighbors(**n).next().is_none())
        .count();
    let match_components = connected_components(&graph).saturating_sub(isolated);

    if split_pairs.is_empty() {
        info!(
            "Closure audit: {} recorded matches form {} components, all reflected in final clusters",
            edges, match_components
        );
    } else {
        warn!(
            "Closure audit: {} of {} recorded matches span different clusters",
            split_pairs.len(),
            edges
        );
    }

    ClosureAudit {
        recorded_matches: edges,
        match_components,
        split_pairs,
    }
}
