//! Voltgate is a role-gated operations backend for power-unit fleets.
//!
//! The crate is organised in layers:
//!
//! - [`domain`]: roles, records, and domain errors
//! - [`resilience`]: circuit breaker and retry executor guarding network
//!   dependencies
//! - [`cache`]: the two-layer cache (in-process + external key-value service)
//! - [`application`]: the authorization gate, sessions, audit trail, and
//!   services over repository traits
//! - [`infra`]: telemetry, Postgres repositories, and the HTTP surface
//! - [`config`]: layered deployment settings (file → env → CLI)

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod resilience;
