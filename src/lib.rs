//! pixivbot-cache - local cache repository for a Pixiv chat bot
//!
//! Detail, set and download caches with TTL freshness checks, incremental
//! set merging and two interchangeable backing engines (an in-process
//! document store and SQLite).

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod repo;
pub mod storage;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use repo::LocalRepo;
pub use tasks::spawn_sweep_task;
