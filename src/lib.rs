//! Multi-tenant URL fetch catalog and fairness-aware download scheduler.

pub mod blob_store;
pub mod cli;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod domain_throttle;
pub mod fetcher;
pub mod http_client;
pub mod models;
pub mod planner;
pub mod recorder;
pub mod repository;
pub mod snapshot;
