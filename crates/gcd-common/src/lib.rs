//! Shared types for the Waterline Cloud Datastore adapter
//!
//! This crate provides the functionality every adapter component relies on:
//! - Error types and handling
//! - Datastore configuration
//! - Metrics and tracing setup

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use config::DatastoreConfig;
pub use error::{BackendError, Error, Result};
