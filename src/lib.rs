//! # Plansync Library
//!
//! Synchronizes service plans, songs, team rosters and schedules from an
//! external planning system into per-tenant storage. Upstream credentials are
//! kept encrypted and refreshed on demand, fetches are rate-limit aware, and
//! long plan syncs checkpoint their position so a later run can resume.

pub mod auth;
pub mod classification;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod upstream;
pub use migration;
