// src/matching/fingerprint.rs
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::person::Person;

pub const TIER_COUNT: usize = 5;

static HONORIFICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(mr|mrs|ms|dr|md|s/o|d/o|w/o|shri|sri|prof)\b\.?")
        .expect("honorific pattern is valid")
});
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("non-word pattern is valid"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    NameKey,
    Parent,
    Locality,
    District,
    Age,
    Phone,
}

impl Field {
    fn tag(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::NameKey => "name_key",
            Field::Parent => "parent",
            Field::Locality => "locality",
            Field::District => "district",
            Field::Age => "age",
            Field::Phone => "phone",
        }
    }
}

/// A tier's field combination. Required fields must all be present; supplementary
/// fields are hashed as they are, so two persons must agree on them (absence included).
pub struct TierSpec {
    pub tier: u8,
    pub strategy: &'static str,
    required: &'static [Field],
    supplementary: &'static [Field],
}

pub static TIERS: [TierSpec; TIER_COUNT] = [
    TierSpec {
        tier: 1,
        strategy: "Name + Parent + Locality + Age + Phone",
        required: &[Field::Name, Field::Age, Field::Phone],
        supplementary: &[Field::Parent, Field::Locality],
    },
    TierSpec {
        tier: 2,
        strategy: "Name + Parent + Locality + Phone",
        required: &[Field::Name, Field::Parent, Field::Phone],
        supplementary: &[Field::Locality],
    },
    TierSpec {
        tier: 3,
        strategy: "Name + Parent + District + Age",
        required: &[Field::Name, Field::Parent, Field::District, Field::Age],
        supplementary: &[],
    },
    TierSpec {
        tier: 4,
        strategy: "Name + Phone + Age",
        required: &[Field::NameKey, Field::Phone, Field::Age],
        supplementary: &[],
    },
    TierSpec {
        tier: 5,
        strategy: "Name + District + Age",
        required: &[Field::NameKey, Field::District, Field::Age],
        supplementary: &[],
    },
];

pub fn tier_strategy(tier: u8) -> &'static str {
    TIERS
        .iter()
        .find(|spec| spec.tier == tier)
        .map(|spec| spec.strategy)
        .unwrap_or("unknown")
}

/// Lowercases, drops honorifics and relation markers, strips punctuation, collapses whitespace.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let without_titles = HONORIFICS.replace_all(&lowered, " ");
    let without_punct = NON_WORD.replace_all(&without_titles, " ");
    WHITESPACE.replace_all(without_punct.trim(), " ").to_string()
}

/// Lowercase, punctuation-free, single-spaced form of a place name.
pub fn normalize_place(value: &str) -> String {
    let lowered = value.to_lowercase();
    let without_punct = NON_WORD.replace_all(&lowered, " ");
    WHITESPACE.replace_all(without_punct.trim(), " ").to_string()
}

/// Digits only, keeping the trailing ten (drops country codes and trunk prefixes).
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

/// Coarse spelling-tolerant key: per token, the first letter followed by the remaining
/// consonants, with repeated letters collapsed. `kumaar` and `kumar` both become `kmr`.
pub fn name_key(normalized_name: &str) -> String {
    normalized_name
        .split_whitespace()
        .map(|token| {
            let mut key = String::new();
            let mut prev: Option<char> = None;
            for (pos, ch) in token.chars().enumerate() {
                let keep = pos == 0 || !matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u' | 'h');
                if keep && prev != Some(ch) {
                    key.push(ch);
                }
                if keep {
                    prev = Some(ch);
                }
            }
            key
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_gender(gender: &str) -> Option<&'static str> {
    match gender.trim().to_lowercase().as_str() {
        "m" | "male" | "boy" | "man" => Some("male"),
        "f" | "female" | "girl" | "woman" => Some("female"),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Normalized identifying fields of one person.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedFields {
    pub name: Option<String>,
    pub name_key: Option<String>,
    pub parent: Option<String>,
    pub locality: Option<String>,
    pub district: Option<String>,
    pub age: Option<String>,
    pub phone: Option<String>,
}

impl NormalizedFields {
    pub fn from_person(person: &Person) -> Self {
        let name = person
            .full_name
            .as_deref()
            .map(normalize_name)
            .and_then(non_empty);
        let name_key = name.as_deref().map(name_key).and_then(non_empty);
        Self {
            name_key,
            name,
            parent: person
                .relative_name
                .as_deref()
                .map(normalize_name)
                .and_then(non_empty),
            locality: person
                .present_locality_village
                .as_deref()
                .map(normalize_place)
                .and_then(non_empty),
            district: person
                .present_district
                .as_deref()
                .map(normalize_place)
                .and_then(non_empty),
            age: person.age.filter(|a| *a > 0).map(|a| a.to_string()),
            phone: person
                .phone_number
                .as_deref()
                .map(normalize_phone)
                .and_then(non_empty),
        }
    }

    fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.name.as_deref(),
            Field::NameKey => self.name_key.as_deref(),
            Field::Parent => self.parent.as_deref(),
            Field::Locality => self.locality.as_deref(),
            Field::District => self.district.as_deref(),
            Field::Age => self.age.as_deref(),
            Field::Phone => self.phone.as_deref(),
        }
    }
}

fn hash_tier(fields: &NormalizedFields, spec: &TierSpec) -> Option<String> {
    let mut parts = Vec::with_capacity(spec.required.len() + spec.supplementary.len() + 1);
    parts.push(format!("t{}", spec.tier));
    for field in spec.required {
        let value = fields.get(*field)?;
        parts.push(format!("{}={}", field.tag(), value));
    }
    for field in spec.supplementary {
        parts.push(format!("{}={}", field.tag(), fields.get(*field).unwrap_or("")));
    }
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// Tier-`tier` fingerprint of a person, or `None` when the person lacks a required field.
pub fn fingerprint(person: &Person, tier: u8) -> Option<String> {
    let spec = TIERS.iter().find(|spec| spec.tier == tier)?;
    hash_tier(&NormalizedFields::from_person(person), spec)
}

/// All five tier fingerprints of a person, computed once per snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierFingerprints {
    hashes: [Option<String>; TIER_COUNT],
}

impl TierFingerprints {
    pub fn compute(person: &Person) -> Self {
        let fields = NormalizedFields::from_person(person);
        let mut hashes: [Option<String>; TIER_COUNT] = Default::default();
        for (slot, spec) in hashes.iter_mut().zip(TIERS.iter()) {
            *slot = hash_tier(&fields, spec);
        }
        Self { hashes }
    }

    pub fn get(&self, tier: u8) -> Option<&str> {
        let idx = (tier as usize).checked_sub(1)?;
        self.hashes.get(idx)?.as_deref()
    }

    /// Strictest tier on which both persons agree. Tiers are checked 1 to 5 and the first hit wins.
    pub fn first_shared_tier(&self, other: &TierFingerprints) -> Option<u8> {
        TIERS.iter().map(|spec| spec.tier).find(|tier| {
            matches!((self.get(*tier), other.get(*tier)), (Some(a), Some(b)) if a == b)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.iter().all(|h| h.is_none())
    }
}

/// Digest of a person's identifying fields. Cached comparisons are tied to it.
pub fn person_signature(person: &Person) -> String {
    let mut hasher = Sha256::new();
    let fields = [
        person.full_name.as_deref().unwrap_or(""),
        person.relative_name.as_deref().unwrap_or(""),
        person.relation_type.as_deref().unwrap_or(""),
        person.gender.as_deref().unwrap_or(""),
        person.phone_number.as_deref().unwrap_or(""),
        person.present_district.as_deref().unwrap_or(""),
        person.present_locality_village.as_deref().unwrap_or(""),
    ];
    for field in fields {
        hasher.update(field.trim().as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update(person.age.map(|a| a.to_string()).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}
