//! Persistent store for the Poindexter orchestration engine.
//!
//! Thin wrapper around a PostgreSQL connection pool: row models in
//! [`models`], hand-written queries grouped by table in [`queries`], and
//! pool/migration/config plumbing in [`pool`] and [`config`].

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
