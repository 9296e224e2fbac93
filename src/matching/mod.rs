pub mod blocking;
pub mod comparator;
pub mod external;
pub mod fingerprint;
pub mod similarity;
