pub mod audit;
pub mod cluster_manager;
pub mod db;
