// src/models/person.rs
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::matching::fingerprint::{person_signature, TierFingerprints};
use crate::models::comparison::PersonIndex;

/// Case context of one accused role: the crime, where it was registered and where it stands.
/// Field order gives the tracker its chronological ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrimeDetail {
    pub fir_date: Option<String>,
    pub crime_id: String,
    pub accused_id: String,
    pub fir_num: Option<String>,
    pub fir_reg_num: Option<String>,
    pub case_status: Option<String>,
    pub ps_name: Option<String>,
    pub dist_name: Option<String>,
    pub accused_code: Option<String>,
    pub accused_type: Option<String>,
    pub accused_status: Option<String>,
}

impl CrimeDetail {
    pub fn new(crime_id: &str, accused_id: &str) -> Self {
        Self {
            crime_id: crime_id.to_string(),
            accused_id: accused_id.to_string(),
            ..Default::default()
        }
    }
}

/// A person row as delivered by the population source. Read-only to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub full_name: Option<String>,
    pub relative_name: Option<String>,
    pub relation_type: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub phone_number: Option<String>,
    pub present_district: Option<String>,
    pub present_locality_village: Option<String>,
    pub accused_ids: Vec<String>,
    pub crime_ids: Vec<String>,
    /// Not part of the signature; case context never changes who a person is.
    #[serde(default)]
    pub crime_details: Vec<CrimeDetail>,
}

impl Person {
    pub fn new(person_id: impl Into<String>) -> Self {
        Self {
            person_id: person_id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.full_name = Some(name.to_string());
        self
    }

    pub fn with_relative(mut self, relative_name: &str) -> Self {
        self.relative_name = Some(relative_name.to_string());
        self
    }

    pub fn with_age(mut self, age: i32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_gender(mut self, gender: &str) -> Self {
        self.gender = Some(gender.to_string());
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone_number = Some(phone.to_string());
        self
    }

    pub fn with_district(mut self, district: &str) -> Self {
        self.present_district = Some(district.to_string());
        self
    }

    pub fn with_locality(mut self, locality: &str) -> Self {
        self.present_locality_village = Some(locality.to_string());
        self
    }

    pub fn with_crimes(mut self, accused_ids: &[&str], crime_ids: &[&str]) -> Self {
        self.accused_ids = accused_ids.iter().map(|s| s.to_string()).collect();
        self.crime_ids = crime_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_crime_detail(mut self, detail: CrimeDetail) -> Self {
        self.crime_details.push(detail);
        self
    }

    /// Share of the seven identifying fields that carry a value, in [0, 1].
    pub fn completeness(&self) -> f64 {
        let filled = [
            non_blank(&self.full_name),
            non_blank(&self.relative_name),
            self.age.is_some(),
            non_blank(&self.phone_number),
            non_blank(&self.present_district),
            non_blank(&self.present_locality_village),
            non_blank(&self.gender),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        filled as f64 / 7.0
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// The ordered, 0-indexed population a run operates on. Never reordered after construction.
#[derive(Debug, Clone)]
pub struct PopulationSnapshot {
    persons: Vec<Person>,
    signatures: Vec<String>,
    fingerprints: Vec<TierFingerprints>,
    index_by_id: HashMap<String, PersonIndex>,
    digest: String,
}

impl PopulationSnapshot {
    pub fn new(persons: Vec<Person>) -> Self {
        let signatures: Vec<String> = persons.iter().map(person_signature).collect();
        let fingerprints = persons.iter().map(TierFingerprints::compute).collect();
        let index_by_id = persons
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.person_id.clone(), idx))
            .collect();

        let mut hasher = Sha256::new();
        for (person, signature) in persons.iter().zip(signatures.iter()) {
            hasher.update(person.person_id.as_bytes());
            hasher.update(b":");
            hasher.update(signature.as_bytes());
            hasher.update(b";");
        }
        let digest = hex::encode(hasher.finalize());

        Self {
            persons,
            signatures,
            fingerprints,
            index_by_id,
            digest,
        }
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn person(&self, idx: PersonIndex) -> &Person {
        &self.persons[idx]
    }

    pub fn persons(&self) -> &[Person] {
        &self.persons
    }

    pub fn signature(&self, idx: PersonIndex) -> &str {
        &self.signatures[idx]
    }

    pub fn fingerprints(&self, idx: PersonIndex) -> &TierFingerprints {
        &self.fingerprints[idx]
    }

    pub fn index_of(&self, person_id: &str) -> Option<PersonIndex> {
        self.index_by_id.get(person_id).copied()
    }

    /// Digest over the ordered (person id, signature) sequence.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}
