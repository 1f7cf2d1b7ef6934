// Library for the binary and integration tests

pub mod aggregate_repo;
pub mod aggregation;
pub mod config;
pub mod error;
pub mod etl_worker;
pub mod geo;
pub mod models;
pub mod reading_repo;
pub mod runner;
pub mod store;
