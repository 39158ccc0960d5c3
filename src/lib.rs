//! Client-side cache consistency layer for a job-search client.
//!
//! The [`cache`] module is the core: a keyed query cache that applies
//! optimistic mutations, rolls them back exactly on failure and invalidates
//! every dependent view on success. The remaining modules supply the domain
//! records, configuration, telemetry and an in-process backend for the CLI.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
