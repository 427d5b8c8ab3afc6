//! # marketsync
//!
//! Resumable, multi-tenant synchronization of marketplace offers and sales into
//! a relational store, with an HTTP surface for triggers, jobs and execution logs.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod cursor;
pub mod db;
pub mod error;
pub mod execution_log;
pub mod handlers;
pub mod marketplace;
pub mod models;
pub mod orchestrator;
pub mod repositories;
pub mod server;
pub mod sync_executor;
pub mod telemetry;
pub use migration;
