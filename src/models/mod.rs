pub mod cluster;
pub mod comparison;
pub mod person;
pub mod run;
pub mod stats_models;
pub mod tracker;

pub use cluster::{ClusterId, ClusterMembership};
pub use comparison::{ComparisonLookup, ComparisonMethod, ComparisonRecord, PairKey, PersonIndex, Verdict};
pub use person::{CrimeDetail, Person, PopulationSnapshot};
pub use run::{CheckpointBatch, ResultEntry, RunCounters, RunMetadata, RunStatus};
pub use tracker::{CanonicalIdentityRecord, DataQualityFlags};
