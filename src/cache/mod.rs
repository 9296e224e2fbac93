pub mod comparison_cache;

pub use comparison_cache::ComparisonCache;
