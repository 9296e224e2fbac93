// src/lib.rs
pub mod cache;
pub mod clustering;
pub mod coordinator;
pub mod errors;
pub mod matching;
pub mod models;
pub mod report;
pub mod store;
pub mod tracker;
pub mod utils;
