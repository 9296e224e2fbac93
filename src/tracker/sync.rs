// src/tracker/sync.rs
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::clustering::cluster_manager::ClusterManager;
use crate::matching::fingerprint::tier_strategy;
use crate::models::person::non_blank;
use crate::models::{
    CanonicalIdentityRecord, ComparisonMethod, DataQualityFlags, Person, PersonIndex, PopulationSnapshot,
};

pub const SINGLETON_STRATEGY: &str = "singleton";
pub const EXTERNAL_STRATEGY: &str = "external-assisted";

pub fn confidence_level(score: f64) -> &'static str {
    if score >= 0.9 {
        "Very High"
    } else if score >= 0.8 {
        "High"
    } else if score >= 0.7 {
        "Good"
    } else if score >= 0.6 {
        "Medium"
    } else {
        "Basic"
    }
}

pub fn offender_category(crime_count: usize) -> &'static str {
    if crime_count > 5 {
        "Repeat Offender"
    } else if crime_count > 2 {
        "Multiple Cases"
    } else {
        "Single Case"
    }
}

/// SHA-256 over the sorted member person ids. Stable under re-clustering with the same members.
pub fn group_fingerprint(sorted_person_ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (n, id) in sorted_person_ids.iter().enumerate() {
        if n > 0 {
            hasher.update(b",");
        }
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn quality_flags(person: &Person) -> DataQualityFlags {
    DataQualityFlags {
        has_phone: non_blank(&person.phone_number),
        has_parent_name: non_blank(&person.relative_name),
        has_locality: non_blank(&person.present_locality_village),
        has_age: person.age.is_some(),
        has_gender: non_blank(&person.gender),
        completeness_percent: (person.completeness() * 1000.0).round() / 10.0,
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// One canonical record for a group of snapshot persons headed by `canonical`.
pub fn build_record(
    snapshot: &PopulationSnapshot,
    manager: &ClusterManager,
    canonical: PersonIndex,
    members: &[PersonIndex],
    run_id: &str,
) -> CanonicalIdentityRecord {
    let head = snapshot.person(canonical);

    let mut person_ids: Vec<String> = members
        .iter()
        .map(|&m| snapshot.person(m).person_id.clone())
        .collect();
    person_ids.sort();
    person_ids.dedup();

    let mut accused = BTreeSet::new();
    let mut crimes = BTreeSet::new();
    let mut details = BTreeSet::new();
    let mut names = BTreeSet::new();
    for &m in members {
        let person = snapshot.person(m);
        accused.extend(person.accused_ids.iter().cloned());
        crimes.extend(person.crime_ids.iter().cloned());
        details.extend(person.crime_details.iter().cloned());
        if let Some(name) = trimmed(&person.full_name) {
            names.insert(name);
        }
    }

    let joins: Vec<(ComparisonMethod, f64)> = members
        .iter()
        .filter(|&&m| m != canonical)
        .filter_map(|&m| manager.joined_via(m))
        .collect();
    let matching_tier = joins.iter().filter_map(|(method, _)| method.tier()).max();
    let uses_external_judgment = joins
        .iter()
        .any(|(method, _)| *method == ComparisonMethod::ExternalAssisted);
    let min_match_score = joins.iter().map(|(_, s)| *s).reduce(f64::min);
    let avg_match_score = if joins.is_empty() {
        None
    } else {
        Some(joins.iter().map(|(_, s)| *s).sum::<f64>() / joins.len() as f64)
    };

    let matching_strategy = if members.len() <= 1 {
        SINGLETON_STRATEGY.to_string()
    } else {
        match matching_tier {
            Some(tier) => tier_strategy(tier).to_string(),
            None => EXTERNAL_STRATEGY.to_string(),
        }
    };

    let confidence_score = (min_match_score.unwrap_or(1.0) * head.completeness()).clamp(0.0, 1.0);
    let crime_count = crimes.len();

    CanonicalIdentityRecord {
        person_fingerprint: group_fingerprint(&person_ids),
        canonical_person_id: head.person_id.clone(),
        full_name: trimmed(&head.full_name),
        relative_name: trimmed(&head.relative_name),
        age: head.age,
        gender: trimmed(&head.gender),
        phone_number: trimmed(&head.phone_number),
        present_district: trimmed(&head.present_district),
        present_locality_village: trimmed(&head.present_locality_village),
        person_record_count: person_ids.len() as i32,
        all_person_ids: person_ids,
        all_accused_ids: accused.into_iter().collect(),
        all_crime_ids: crimes.into_iter().collect(),
        crime_count: crime_count as i32,
        crime_details: details.into_iter().collect(),
        name_variations: names.into_iter().collect(),
        matching_tier: matching_tier.map(i32::from),
        matching_strategy,
        uses_external_judgment,
        min_match_score,
        avg_match_score,
        confidence_score,
        confidence_level: confidence_level(confidence_score).to_string(),
        offender_category: offender_category(crime_count).to_string(),
        data_quality_flags: quality_flags(head),
        source_run_id: run_id.to_string(),
    }
}

/// Full tracker contents for the final cluster state: one record per cluster and one per
/// unclustered person, ordered by canonical index. Every snapshot person appears exactly once.
pub fn build_records(
    snapshot: &PopulationSnapshot,
    manager: &ClusterManager,
    run_id: &str,
) -> Vec<CanonicalIdentityRecord> {
    let mut groups: Vec<(PersonIndex, Vec<PersonIndex>)> = manager
        .clusters()
        .into_iter()
        .map(|(_, representative, members)| (representative, members.to_vec()))
        .collect();
    groups.extend(
        (0..snapshot.len())
            .filter(|&idx| manager.find(idx).is_none())
            .map(|idx| (idx, vec![idx])),
    );
    groups.sort_by_key(|(canonical, _)| *canonical);

    groups
        .iter()
        .map(|(canonical, members)| build_record(snapshot, manager, *canonical, members, run_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrimeDetail;
    use std::collections::HashSet;

    fn snapshot() -> PopulationSnapshot {
        PopulationSnapshot::new(vec![
            Person::new("P1")
                .with_name("Ravi Kumar")
                .with_relative("Suresh")
                .with_age(30)
                .with_gender("M")
                .with_phone("9876543210")
                .with_district("Guntur")
                .with_locality("Tenali")
                .with_crimes(&["A1"], &["C1", "C2"]),
            Person::new("P2")
                .with_name("Ravi  Kumar ")
                .with_relative("Suresh")
                .with_age(30)
                .with_phone("9876543210")
                .with_district("Guntur")
                .with_crimes(&["A2"], &["C2", "C3"]),
            Person::new("P3").with_name("Sita").with_district("Guntur"),
            Person::new("P4")
                .with_name("Ravi Kumaar")
                .with_age(30)
                .with_phone("9876543210")
                .with_district("Guntur")
                .with_crimes(&["A4"], &["C4", "C5", "C6", "C7"]),
        ])
    }

    #[test]
    fn test_every_person_appears_once() {
        let snap = snapshot();
        let mut manager = ClusterManager::new(snap.len());
        manager.union(0, 1, ComparisonMethod::Tier(1), 0.95);
        manager.union(0, 3, ComparisonMethod::ExternalAssisted, 0.82);

        let records = build_records(&snap, &manager, "run-1");
        assert_eq!(records.len(), 2);

        let mut seen = HashSet::new();
        for record in &records {
            for id in &record.all_person_ids {
                assert!(seen.insert(id.clone()), "{} listed twice", id);
            }
        }
        assert_eq!(seen.len(), snap.len());
    }

    #[test]
    fn test_cluster_record_aggregates_members() {
        let snap = snapshot();
        let mut manager = ClusterManager::new(snap.len());
        manager.union(0, 1, ComparisonMethod::Tier(1), 0.95);
        manager.union(0, 3, ComparisonMethod::Tier(4), 0.75);

        let records = build_records(&snap, &manager, "run-1");
        let cluster = &records[0];
        assert_eq!(cluster.canonical_person_id, "P1");
        assert_eq!(cluster.all_person_ids, vec!["P1", "P2", "P4"]);
        assert_eq!(cluster.person_record_count, 3);
        assert_eq!(cluster.all_accused_ids, vec!["A1", "A2", "A4"]);
        assert_eq!(cluster.crime_count, 7);
        assert_eq!(cluster.offender_category, "Repeat Offender");
        assert_eq!(cluster.name_variations, vec!["Ravi  Kumar", "Ravi Kumaar", "Ravi Kumar"]);
        assert_eq!(cluster.matching_tier, Some(4));
        assert_eq!(cluster.matching_strategy, "Name + Phone + Age");
        assert!(!cluster.uses_external_judgment);
        assert_eq!(cluster.min_match_score, Some(0.75));
        assert!((cluster.avg_match_score.unwrap() - 0.85).abs() < 1e-9);
        // Canonical person fills all seven identifying fields.
        assert!((cluster.confidence_score - 0.75).abs() < 1e-9);
        assert_eq!(cluster.confidence_level, "Good");
        assert!(cluster.data_quality_flags.has_gender);
        assert_eq!(cluster.data_quality_flags.completeness_percent, 100.0);
        assert_eq!(cluster.source_run_id, "run-1");
    }

    #[test]
    fn test_crime_details_are_merged_across_members() {
        let shared = CrimeDetail {
            fir_num: Some("112/2021".to_string()),
            fir_date: Some("2021-03-04".to_string()),
            ps_name: Some("Tenali Town".to_string()),
            dist_name: Some("Guntur".to_string()),
            accused_type: Some("Accused".to_string()),
            ..CrimeDetail::new("C2", "A1")
        };
        let earlier = CrimeDetail {
            fir_date: Some("2019-11-20".to_string()),
            case_status: Some("Charge Sheeted".to_string()),
            ..CrimeDetail::new("C1", "A1")
        };
        let later = CrimeDetail {
            fir_date: Some("2023-06-01".to_string()),
            ..CrimeDetail::new("C3", "A2")
        };
        let snap = PopulationSnapshot::new(vec![
            Person::new("P1")
                .with_name("Ravi Kumar")
                .with_district("Guntur")
                .with_crime_detail(shared.clone())
                .with_crime_detail(earlier.clone()),
            Person::new("P2")
                .with_name("Ravi Kumar")
                .with_district("Guntur")
                .with_crime_detail(later.clone())
                .with_crime_detail(shared.clone()),
            Person::new("P3").with_name("Sita").with_district("Guntur"),
        ]);
        let mut manager = ClusterManager::new(snap.len());
        manager.union(0, 1, ComparisonMethod::Tier(2), 0.9);

        let records = build_records(&snap, &manager, "run-1");
        assert_eq!(records[0].crime_details, vec![earlier, shared, later]);
        assert!(records[1].crime_details.is_empty());
    }

    #[test]
    fn test_singleton_record() {
        let snap = snapshot();
        let manager = ClusterManager::new(snap.len());
        let records = build_records(&snap, &manager, "run-1");
        assert_eq!(records.len(), 4);

        let sita = &records[2];
        assert_eq!(sita.canonical_person_id, "P3");
        assert_eq!(sita.matching_strategy, SINGLETON_STRATEGY);
        assert_eq!(sita.matching_tier, None);
        assert_eq!(sita.min_match_score, None);
        assert!((sita.confidence_score - 2.0 / 7.0).abs() < 1e-9);
        assert_eq!(sita.confidence_level, "Basic");
        assert_eq!(sita.offender_category, "Single Case");
        assert!(!sita.data_quality_flags.has_phone);
    }

    #[test]
    fn test_external_only_cluster_has_no_tier() {
        let snap = snapshot();
        let mut manager = ClusterManager::new(snap.len());
        manager.union(1, 3, ComparisonMethod::ExternalAssisted, 0.83);
        let records = build_records(&snap, &manager, "run-1");
        let cluster = records
            .iter()
            .find(|r| r.person_record_count == 2)
            .unwrap();
        assert_eq!(cluster.canonical_person_id, "P2");
        assert_eq!(cluster.matching_tier, None);
        assert_eq!(cluster.matching_strategy, EXTERNAL_STRATEGY);
        assert!(cluster.uses_external_judgment);
    }

    #[test]
    fn test_fingerprint_depends_only_on_members() {
        let a = group_fingerprint(&["P1".to_string(), "P2".to_string()]);
        let b = group_fingerprint(&["P1".to_string(), "P2".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, group_fingerprint(&["P1".to_string()]));
        assert_ne!(a, group_fingerprint(&["P1".to_string(), "P3".to_string()]));
    }

    #[test]
    fn test_labels() {
        assert_eq!(confidence_level(0.95), "Very High");
        assert_eq!(confidence_level(0.8), "High");
        assert_eq!(confidence_level(0.7), "Good");
        assert_eq!(confidence_level(0.6), "Medium");
        assert_eq!(confidence_level(0.59), "Basic");
        assert_eq!(offender_category(6), "Repeat Offender");
        assert_eq!(offender_category(3), "Multiple Cases");
        assert_eq!(offender_category(2), "Single Case");
    }
}
